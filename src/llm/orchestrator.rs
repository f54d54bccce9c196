//! The chat loop: model fallback, retry, and structured-output negotiation.
//!
//! A single `chat()` call walks `[primary] + fallbacks`, giving each model
//! up to `max_retries + 1` attempts. Server signals drive three recoveries:
//! the structured-output downgrade ladder (`json_schema` → `json_object` →
//! unstructured), truncation recovery (larger `max_tokens`), and plain
//! backoff. HTTP status errors never escape as `Err` — they become
//! structured error results.

use crate::backoff::{sleep_backoff, BackoffConfig};
use crate::breaker::CircuitBreaker;
use crate::error::Result;
use crate::llm::capabilities::ModelCapabilities;
use crate::llm::models::{CallStatus, ChatRequest, ErrorContext, LlmCallResult, Message, RfMode};
use crate::llm::response::ResponseProcessor;
use crate::llm::validate::{sanitize_messages, scrub_user_messages, validate_chat_request};
use crate::llm::{ChatTransport, ProviderRequestBuilder};
use crate::retry::is_transient_error;
use crate::size_guard::validate_response_size;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

/// Ceiling applied when truncation recovery raises `max_tokens`.
const TRUNCATION_MAX_TOKENS_CAP: u32 = 32_768;
/// Assumed completion budget when the request did not set one.
const TRUNCATION_DEFAULT_MAX_TOKENS: u32 = 8_192;

/// Tuning for one [`LlmChatClient`].
#[derive(Debug, Clone)]
pub struct ChatClientOptions {
    /// Primary model id.
    pub model: String,
    /// Fallback chain, tried in order after the primary exhausts.
    pub fallback_models: Vec<String>,
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    pub max_response_size_bytes: u64,
    pub enable_structured_outputs: bool,
    /// Append known-good structured models when the primary is
    /// reasoning-heavy and structured output is requested.
    pub auto_fallback_structured: bool,
    /// Config-level price override used when the builder has no table entry.
    pub price_input_per_1k: Option<f64>,
    pub price_output_per_1k: Option<f64>,
    pub debug_payloads: bool,
}

impl ChatClientOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fallback_models: Vec::new(),
            max_retries: 3,
            backoff: BackoffConfig::standard(),
            max_response_size_bytes: 10 * 1024 * 1024,
            enable_structured_outputs: true,
            auto_fallback_structured: true,
            price_input_per_1k: None,
            price_output_per_1k: None,
            debug_payloads: false,
        }
    }
}

/// Mutable state for a single `chat()` invocation, carried across model
/// fallbacks and retry attempts.
#[derive(Debug, Default)]
struct ChatState {
    rf_mode: Option<RfMode>,
    last_error_text: Option<String>,
    last_error_context: Option<ErrorContext>,
    last_data: Option<Value>,
    last_latency: Option<u64>,
    last_model_reported: Option<String>,
    last_response_text: Option<String>,
    structured_output_used: bool,
    structured_output_mode_used: Option<RfMode>,
    structured_parse_error: bool,
}

/// What one attempt decided.
enum AttemptOutcome {
    Success(Box<LlmCallResult>),
    /// Try again on the same model.
    Retry {
        backoff: bool,
        /// Server-dictated delay (429 retry-after) overriding backoff.
        delay: Option<Duration>,
        /// `Some(new_mode)` updates the ladder; inner `None` drops
        /// structured output entirely.
        new_mode: Option<Option<RfMode>>,
        new_max_tokens: Option<u32>,
    },
    NextModel,
    /// Non-retryable upstream error: emit immediately, no fallback.
    Fatal(Box<LlmCallResult>),
}

/// Provider-agnostic chat client; [`ProviderRequestBuilder`] supplies the
/// wire shape, [`ChatTransport`] the wire itself.
pub struct LlmChatClient {
    builder: Arc<dyn ProviderRequestBuilder>,
    transport: Arc<dyn ChatTransport>,
    processor: ResponseProcessor,
    capabilities: Option<Arc<ModelCapabilities>>,
    breaker: Option<Arc<Mutex<CircuitBreaker>>>,
    concurrency: Option<Arc<Semaphore>>,
    options: ChatClientOptions,
}

impl std::fmt::Debug for LlmChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmChatClient")
            .field("provider", &self.builder.provider_name())
            .field("model", &self.options.model)
            .field("fallback_models", &self.options.fallback_models)
            .finish()
    }
}

impl LlmChatClient {
    pub fn new(
        builder: Arc<dyn ProviderRequestBuilder>,
        transport: Arc<dyn ChatTransport>,
        options: ChatClientOptions,
    ) -> Self {
        Self {
            builder,
            transport,
            processor: ResponseProcessor::new(true),
            capabilities: None,
            breaker: None,
            concurrency: None,
            options,
        }
    }

    /// Attach the structured-output capability cache (aggregator only).
    pub fn with_capabilities(mut self, capabilities: Arc<ModelCapabilities>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Attach a circuit breaker shared with other call sites.
    pub fn with_breaker(mut self, breaker: Arc<Mutex<CircuitBreaker>>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Cap concurrent `chat()` calls across clones of this client.
    pub fn with_concurrency_limit(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.concurrency = Some(semaphore);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.builder.provider_name()
    }

    /// Send a chat completion request.
    ///
    /// Returns `Err` only for caller mistakes (validation); every wire-level
    /// failure is converted into an error [`LlmCallResult`].
    pub async fn chat(&self, request: ChatRequest) -> Result<LlmCallResult> {
        validate_chat_request(&request)?;

        let _permit = match &self.concurrency {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| crate::error::CoreError::Cancelled)?,
            ),
            None => None,
        };

        if let Some(breaker) = &self.breaker {
            let mut guard = breaker.lock().await;
            if !guard.can_proceed() {
                tracing::warn!(
                    provider = self.builder.provider_name(),
                    state = guard.state().as_str(),
                    "circuit_breaker_open"
                );
                let mut result = LlmCallResult::error(
                    self.builder.endpoint(),
                    "LLM service temporarily unavailable (circuit breaker open)",
                );
                result.latency_ms = Some(0);
                return Ok(result);
            }
        }

        let scrubbed = scrub_user_messages(&request.messages);
        let sanitized = sanitize_messages(&scrubbed);

        let wants_structured =
            request.response_format.is_some() && self.options.enable_structured_outputs;
        let primary = request
            .model_override
            .clone()
            .unwrap_or_else(|| self.options.model.clone());
        let models_to_try = ModelCapabilities::build_model_fallback_list(
            &primary,
            &self.options.fallback_models,
            wants_structured && self.options.auto_fallback_structured,
        );

        let mut state = ChatState {
            rf_mode: wants_structured.then_some(RfMode::JsonSchema),
            ..ChatState::default()
        };

        let mut request = request;

        for (model_idx, model) in models_to_try.iter().enumerate() {
            // Capability gate: skip fallback models that cannot honor the
            // schema; the primary gets a chance unstructured instead.
            let mut model_supports_structured = true;
            if wants_structured {
                if let Some(capabilities) = &self.capabilities {
                    capabilities.ensure_loaded().await;
                    if !capabilities.supports_structured_outputs(model).await {
                        if *model == primary {
                            tracing::info!(model, "structured_outputs_unsupported_primary");
                            model_supports_structured = false;
                            state.structured_output_used = false;
                            state.structured_output_mode_used = None;
                        } else {
                            tracing::info!(model, "skip_model_no_structured_outputs");
                            continue;
                        }
                    }
                }
            }

            // The ladder restarts for each new model.
            state.rf_mode = (wants_structured && model_supports_structured)
                .then_some(RfMode::JsonSchema);

            let mut attempt = 0u32;
            while attempt <= self.options.max_retries {
                let outcome = self
                    .attempt_request(model, attempt, &request, &scrubbed, &sanitized, &mut state)
                    .await;

                match outcome {
                    AttemptOutcome::Success(result) => {
                        if let Some(breaker) = &self.breaker {
                            breaker.lock().await.record_success();
                        }
                        return Ok(*result);
                    }
                    AttemptOutcome::Fatal(result) => {
                        if let Some(breaker) = &self.breaker {
                            breaker.lock().await.record_failure();
                        }
                        return Ok(*result);
                    }
                    AttemptOutcome::Retry {
                        backoff,
                        delay,
                        new_mode,
                        new_max_tokens,
                    } => {
                        if let Some(mode) = new_mode {
                            state.rf_mode = mode;
                        }
                        if let Some(new_max) = new_max_tokens {
                            if request.max_tokens.map(|m| new_max > m).unwrap_or(true) {
                                tracing::info!(
                                    model,
                                    original_max = ?request.max_tokens,
                                    new_max,
                                    attempt = attempt + 1,
                                    "truncation_recovery_increasing_max_tokens"
                                );
                                request.max_tokens = Some(new_max);
                            }
                        }
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        } else if backoff {
                            sleep_backoff(attempt, &self.options.backoff).await;
                        }
                        attempt += 1;
                    }
                    AttemptOutcome::NextModel => break,
                }
            }

            if state.structured_parse_error {
                tracing::info!(
                    model,
                    models_remaining = models_to_try.len() - model_idx - 1,
                    "structured_parse_error_trying_next_model"
                );
            }
            if model_idx < models_to_try.len() - 1 {
                tracing::warn!(
                    from_model = model,
                    to_model = %models_to_try[model_idx + 1],
                    "llm_fallback_to_next_model"
                );
            }
        }

        if let Some(breaker) = &self.breaker {
            breaker.lock().await.record_failure();
        }
        Ok(self.build_exhausted_result(&models_to_try, &sanitized, &state))
    }

    async fn attempt_request(
        &self,
        model: &str,
        attempt: u32,
        request: &ChatRequest,
        scrubbed: &[Message],
        sanitized: &[Message],
        state: &mut ChatState,
    ) -> AttemptOutcome {
        let rf_included = state.rf_mode.is_some();
        let headers = self.builder.build_headers(rf_included);
        let mut body = self.builder.build_request_body(
            model,
            scrubbed,
            request,
            request.response_format.as_ref().filter(|_| rf_included),
            state.rf_mode,
        );

        if let Some(transform) = self.builder.compression_transform(scrubbed, model) {
            body["transforms"] = serde_json::json!([transform]);
            tracing::info!(model, transform, "content_compression_applied");
        }

        tracing::debug!(
            model,
            attempt = attempt + 1,
            request_id = request.request_id,
            structured_output = rf_included,
            rf_mode = state.rf_mode.map(|m| m.as_str()),
            "llm_request"
        );
        if self.options.debug_payloads {
            tracing::debug!(body = %body, "llm_request_payload");
        }

        let started = Instant::now();
        let response = match self
            .transport
            .post_chat(self.builder.endpoint(), &headers, &body)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let latency = started.elapsed().as_millis() as u64;
                state.last_error_text = Some(e.to_string());
                state.last_latency = Some(latency);
                state.last_error_context = Some(ErrorContext {
                    status_code: e.status(),
                    message: "Transport error".to_string(),
                    api_error: Some(e.to_string()),
                    provider: None,
                });
                if attempt < self.options.max_retries && is_transient_error(&e) {
                    return AttemptOutcome::Retry {
                        backoff: true,
                        delay: None,
                        new_mode: None,
                        new_max_tokens: None,
                    };
                }
                return AttemptOutcome::NextModel;
            }
        };

        let latency = started.elapsed().as_millis() as u64;

        if let Err(size_err) = validate_response_size(
            response.content_length,
            Some(response.body.len() as u64),
            self.options.max_response_size_bytes,
            self.builder.provider_name(),
        ) {
            state.last_error_text = Some(format!("Response too large: {size_err}"));
            state.last_latency = Some(latency);
            return AttemptOutcome::NextModel;
        }

        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(e) => {
                state.last_error_text = Some(format!("Failed to parse JSON response: {e}"));
                state.last_latency = Some(latency);
                return AttemptOutcome::NextModel;
            }
        };

        if self.options.debug_payloads {
            tracing::debug!(body = %data, "llm_response_payload");
        }

        let model_reported = data
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string();

        if response.status == 200 {
            self.handle_success_response(
                model,
                &model_reported,
                attempt,
                latency,
                data,
                rf_included,
                request,
                &headers,
                sanitized,
                state,
            )
        } else {
            self.handle_error_response(
                response.status,
                response.retry_after,
                data,
                &model_reported,
                attempt,
                latency,
                rf_included,
                &headers,
                sanitized,
                state,
            )
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_success_response(
        &self,
        model: &str,
        model_reported: &str,
        attempt: u32,
        latency: u64,
        data: Value,
        rf_included: bool,
        request: &ChatRequest,
        headers: &[(String, String)],
        sanitized: &[Message],
        state: &mut ChatState,
    ) -> AttemptOutcome {
        let (text, usage, mut cost_usd) = self.processor.extract_response_data(&data, rf_included);

        let (truncated, finish_reason, native_finish) =
            self.processor.is_completion_truncated(&data);
        if truncated {
            tracing::warn!(
                model,
                finish_reason = finish_reason.as_deref(),
                native_finish_reason = native_finish.as_deref(),
                "llm_completion_truncated"
            );
            let current_max = request.max_tokens.unwrap_or(TRUNCATION_DEFAULT_MAX_TOKENS);
            let suggested_max =
                ((current_max as u64 * 3) / 2).min(TRUNCATION_MAX_TOKENS_CAP as u64) as u32;

            if rf_included {
                match state.rf_mode {
                    Some(RfMode::JsonSchema) => {
                        state.structured_output_used = true;
                        state.structured_output_mode_used = Some(RfMode::JsonObject);
                        return AttemptOutcome::Retry {
                            backoff: true,
                            delay: None,
                            new_mode: Some(Some(RfMode::JsonObject)),
                            new_max_tokens: Some(suggested_max),
                        };
                    }
                    Some(RfMode::JsonObject) => {
                        state.structured_output_used = false;
                        state.structured_output_mode_used = None;
                        return AttemptOutcome::Retry {
                            backoff: true,
                            delay: None,
                            new_mode: Some(None),
                            new_max_tokens: Some(suggested_max),
                        };
                    }
                    None => {}
                }
            }

            if attempt < self.options.max_retries {
                return AttemptOutcome::Retry {
                    backoff: true,
                    delay: None,
                    new_mode: None,
                    new_max_tokens: Some(suggested_max),
                };
            }

            state.last_error_text = Some("completion_truncated".to_string());
            state.last_response_text = text;
            state.last_latency = Some(latency);
            state.last_model_reported = Some(model_reported.to_string());
            state.last_data = Some(data);
            return AttemptOutcome::NextModel;
        }

        let mut text = text;
        if rf_included {
            let (is_valid, processed_text) =
                self.processor.validate_structured_response(text.as_deref(), true);
            if !is_valid {
                match state.rf_mode {
                    Some(RfMode::JsonSchema) if attempt < self.options.max_retries => {
                        tracing::warn!(
                            model,
                            attempt = attempt + 1,
                            "structured_output_downgrading_json_schema_to_json_object"
                        );
                        return AttemptOutcome::Retry {
                            backoff: true,
                            delay: None,
                            new_mode: Some(Some(RfMode::JsonObject)),
                            new_max_tokens: None,
                        };
                    }
                    Some(RfMode::JsonObject) if attempt < self.options.max_retries => {
                        tracing::warn!(
                            model,
                            attempt = attempt + 1,
                            "structured_output_disabling_after_json_object_failure"
                        );
                        return AttemptOutcome::Retry {
                            backoff: true,
                            delay: None,
                            new_mode: Some(None),
                            new_max_tokens: None,
                        };
                    }
                    _ => {
                        state.structured_parse_error = true;
                        state.last_error_text = Some("structured_output_parse_error".to_string());
                        state.last_response_text = processed_text;
                        state.last_latency = Some(latency);
                        state.last_model_reported = Some(model_reported.to_string());
                        state.last_data = Some(data);
                        return AttemptOutcome::NextModel;
                    }
                }
            }
            text = processed_text;
        }

        if cost_usd.is_none() {
            if let (Some(prompt), Some(completion)) = (usage.prompt_tokens, usage.completion_tokens)
            {
                let prices = self
                    .builder
                    .price_per_1k(model)
                    .or(match (self.options.price_input_per_1k, self.options.price_output_per_1k) {
                        (Some(input), Some(output)) => Some((input, output)),
                        _ => None,
                    });
                if let Some((input_per_1k, output_per_1k)) = prices {
                    cost_usd = Some(
                        (prompt as f64 / 1000.0) * input_per_1k
                            + (completion as f64 / 1000.0) * output_per_1k,
                    );
                }
            }
        }

        let cache_metrics = self.processor.extract_cache_metrics(&data);
        if cache_metrics.cache_hit || cache_metrics.cache_creation_tokens > 0 {
            tracing::info!(
                model = model_reported,
                cache_read_tokens = cache_metrics.cache_read_tokens,
                cache_creation_tokens = cache_metrics.cache_creation_tokens,
                cache_hit = cache_metrics.cache_hit,
                "prompt_cache_metrics"
            );
        }

        tracing::info!(
            model = model_reported,
            attempt = attempt + 1,
            latency_ms = latency,
            tokens_prompt = usage.prompt_tokens,
            tokens_completion = usage.completion_tokens,
            structured_output = rf_included,
            rf_mode = state.rf_mode.map(|m| m.as_str()),
            "llm_success"
        );

        AttemptOutcome::Success(Box::new(LlmCallResult {
            status: CallStatus::Ok,
            model: Some(model_reported.to_string()),
            response_text: text,
            response_json: Some(data),
            tokens_prompt: usage.prompt_tokens,
            tokens_completion: usage.completion_tokens,
            tokens_total: usage.total_tokens,
            cost_usd,
            latency_ms: Some(latency),
            error_text: None,
            error_context: None,
            request_headers: self.builder.redact_headers(headers),
            request_messages: sanitized.to_vec(),
            endpoint: self.builder.endpoint().to_string(),
            structured_output_used: rf_included,
            structured_output_mode: state.rf_mode,
            cache_read_tokens: (cache_metrics.cache_read_tokens > 0)
                .then_some(cache_metrics.cache_read_tokens),
            cache_creation_tokens: (cache_metrics.cache_creation_tokens > 0)
                .then_some(cache_metrics.cache_creation_tokens),
            cache_discount: cache_metrics.cache_discount,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_error_response(
        &self,
        status: u16,
        retry_after: Option<Duration>,
        data: Value,
        model_reported: &str,
        attempt: u32,
        latency: u64,
        rf_included: bool,
        headers: &[(String, String)],
        sanitized: &[Message],
        state: &mut ChatState,
    ) -> AttemptOutcome {
        // A 400 blaming response_format walks the ladder before anything else.
        if self
            .processor
            .should_downgrade_response_format(status, &data, rf_included)
        {
            return self.downgrade_or_drop(state, model_reported, attempt);
        }

        let error_context = self.processor.get_error_context(status, &data);
        let error_message = error_context.message.clone();
        let (text, _, _) = self.processor.extract_response_data(&data, rf_included);

        // 408 is a retryable timeout despite being a 4xx.
        if matches!(status, 400 | 401 | 402 | 403) {
            tracing::error!(status, model = model_reported, error = %error_message, "llm_non_retryable_error");
            let mut result = LlmCallResult::error(self.builder.endpoint(), error_message);
            result.model = Some(model_reported.to_string());
            result.response_text = text;
            result.response_json = Some(data);
            result.latency_ms = Some(latency);
            result.error_context = Some(error_context);
            result.request_headers = self.builder.redact_headers(headers);
            result.request_messages = sanitized.to_vec();
            result.structured_output_used = state.structured_output_used;
            result.structured_output_mode = state.structured_output_mode_used;
            return AttemptOutcome::Fatal(Box::new(result));
        }

        let api_error_lower = error_context
            .api_error
            .as_deref()
            .unwrap_or("")
            .to_lowercase();
        let no_endpoints = status == 404
            || error_message.to_lowercase().contains("no endpoints found")
            || api_error_lower.contains("no endpoints found")
            || api_error_lower.contains("does not support structured");

        if no_endpoints {
            if rf_included {
                return self.downgrade_or_drop(state, model_reported, attempt);
            }
            state.last_error_text = Some(error_message);
            state.last_error_context = Some(error_context);
            state.last_latency = Some(latency);
            state.last_model_reported = Some(model_reported.to_string());
            state.last_data = Some(data);
            return AttemptOutcome::NextModel;
        }

        if (status == 429 || status == 408 || status >= 500) && attempt < self.options.max_retries {
            state.last_error_text = Some(error_message.clone());
            state.last_error_context = Some(error_context);
            tracing::warn!(status, model = model_reported, attempt = attempt + 1, "llm_retryable_error");
            return AttemptOutcome::Retry {
                backoff: status != 429,
                delay: (status == 429).then(|| {
                    retry_after
                        .unwrap_or_else(|| self.options.backoff.delay_for_attempt(attempt))
                }),
                new_mode: None,
                new_max_tokens: None,
            };
        }

        tracing::warn!(status, model = model_reported, error = %error_message, "llm_error_trying_next_model");
        state.last_error_text = Some(error_message);
        state.last_error_context = Some(error_context);
        state.last_latency = Some(latency);
        state.last_model_reported = Some(model_reported.to_string());
        state.last_data = Some(data);
        AttemptOutcome::NextModel
    }

    /// One step down the structured-output ladder, dropping the format
    /// entirely after `json_object` fails.
    fn downgrade_or_drop(
        &self,
        state: &mut ChatState,
        model: &str,
        attempt: u32,
    ) -> AttemptOutcome {
        match state.rf_mode {
            Some(RfMode::JsonSchema) => {
                tracing::warn!(model, attempt = attempt + 1, "response_format_downgraded_to_json_object");
                state.structured_output_used = true;
                state.structured_output_mode_used = Some(RfMode::JsonObject);
                AttemptOutcome::Retry {
                    backoff: true,
                    delay: None,
                    new_mode: Some(Some(RfMode::JsonObject)),
                    new_max_tokens: None,
                }
            }
            Some(RfMode::JsonObject) | None => {
                tracing::warn!(model, attempt = attempt + 1, "structured_outputs_disabled");
                state.structured_output_used = false;
                state.structured_output_mode_used = None;
                AttemptOutcome::Retry {
                    backoff: true,
                    delay: None,
                    new_mode: Some(None),
                    new_max_tokens: None,
                }
            }
        }
    }

    fn build_exhausted_result(
        &self,
        models_to_try: &[String],
        sanitized: &[Message],
        state: &ChatState,
    ) -> LlmCallResult {
        tracing::error!(
            models = ?models_to_try,
            attempts_per_model = self.options.max_retries + 1,
            last_error = state.last_error_text.as_deref(),
            "llm_all_models_exhausted"
        );

        let error_text = if state.structured_parse_error {
            "structured_output_parse_error".to_string()
        } else {
            state
                .last_error_text
                .clone()
                .unwrap_or_else(|| "All retries and fallbacks exhausted".to_string())
        };

        LlmCallResult {
            status: CallStatus::Error,
            model: state.last_model_reported.clone(),
            response_text: state.last_response_text.clone(),
            response_json: state.last_data.clone(),
            tokens_prompt: None,
            tokens_completion: None,
            tokens_total: None,
            cost_usd: None,
            latency_ms: state.last_latency,
            error_text: Some(error_text),
            error_context: state.last_error_context.clone(),
            request_headers: self
                .builder
                .redact_headers(&self.builder.build_headers(false)),
            request_messages: sanitized.to_vec(),
            endpoint: self.builder.endpoint().to_string(),
            structured_output_used: state.structured_output_used,
            structured_output_mode: state.structured_output_mode_used,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            cache_discount: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::llm::models::ResponseFormat;
    use crate::llm::openrouter::OpenRouterRequestBuilder;
    use crate::llm::TransportResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted transport: pops one canned reply per request and records
    /// every body it was sent.
    struct ScriptedTransport {
        replies: StdMutex<VecDeque<Result<TransportResponse>>>,
        bodies: StdMutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<TransportResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.into()),
                bodies: StdMutex::new(Vec::new()),
            })
        }

        fn bodies(&self) -> Vec<Value> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn post_chat(
            &self,
            _path: &str,
            _headers: &[(String, String)],
            body: &Value,
        ) -> Result<TransportResponse> {
            self.bodies.lock().unwrap().push(body.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CoreError::Other("script exhausted".into())))
        }
    }

    fn reply(status: u16, body: Value) -> Result<TransportResponse> {
        Ok(TransportResponse {
            status,
            retry_after: None,
            content_length: None,
            body: body.to_string(),
        })
    }

    fn builder() -> Arc<dyn ProviderRequestBuilder> {
        Arc::new(OpenRouterRequestBuilder::new(
            "sk-or-test",
            None,
            None,
            Vec::new(),
            true,
        ))
    }

    fn fast_options(model: &str) -> ChatClientOptions {
        let mut options = ChatClientOptions::new(model);
        options.backoff = BackoffConfig {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        options
    }

    fn structured_request() -> ChatRequest {
        let mut request = ChatRequest::new(vec![Message::system("S"), Message::user("Hi")]);
        request.response_format = Some(ResponseFormat::JsonSchema {
            name: "sum".into(),
            strict: true,
            schema: json!({
                "type": "object",
                "properties": {"summary_250": {"type": "string"}},
                "required": ["summary_250"]
            }),
        });
        request
    }

    #[tokio::test]
    async fn test_successful_structured_chat() {
        let transport = ScriptedTransport::new(vec![reply(
            200,
            json!({
                "choices": [{"message": {"parsed": {"summary_250": "x"}}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5},
                "model": "openai/gpt-4o-mini"
            }),
        )]);
        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        );

        let result = client.chat(structured_request()).await.unwrap();
        assert_eq!(result.status, CallStatus::Ok);
        assert_eq!(result.response_text.unwrap(), r#"{"summary_250":"x"}"#);
        assert_eq!(result.tokens_prompt, Some(10));
        assert_eq!(result.tokens_completion, Some(5));
        assert!(result.structured_output_used);
        assert_eq!(result.structured_output_mode, Some(RfMode::JsonSchema));
        assert_eq!(result.request_headers.get("Authorization").unwrap(), "REDACTED");
        assert_eq!(result.endpoint, "/api/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_downgrade_ladder_on_response_format_rejection() {
        let transport = ScriptedTransport::new(vec![
            reply(400, json!({"error": {"message": "response_format unsupported"}})),
            reply(400, json!({"error": {"message": "response_format unsupported"}})),
            reply(
                200,
                json!({
                    "choices": [{"message": {"content": "{\"summary_250\": \"y\"}"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 8, "completion_tokens": 4}
                }),
            ),
        ]);
        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        );

        let result = client.chat(structured_request()).await.unwrap();
        assert_eq!(result.status, CallStatus::Ok);
        assert!(!result.structured_output_used);
        assert_eq!(result.structured_output_mode, None);

        // Exactly three attempts: schema → object → unstructured.
        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["response_format"]["type"], "json_schema");
        assert_eq!(bodies[1]["response_format"], json!({"type": "json_object"}));
        assert!(bodies[2].get("response_format").is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_401_is_immediate() {
        let transport = ScriptedTransport::new(vec![reply(
            401,
            json!({"error": {"message": "bad key"}}),
        )]);
        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        );

        let mut request = ChatRequest::new(vec![Message::user("Hi")]);
        request.model_override = None;
        let result = client.chat(request).await.unwrap();

        assert_eq!(result.status, CallStatus::Error);
        assert!(result.error_text.unwrap().contains("Authentication failed"));
        assert_eq!(result.error_context.unwrap().status_code, Some(401));
        assert_eq!(transport.bodies().len(), 1);
    }

    #[tokio::test]
    async fn test_500_retries_then_falls_back_to_next_model() {
        let mut replies = Vec::new();
        // Primary: 2 (max_retries=1 → 2 attempts) 500s, then fallback succeeds.
        replies.push(reply(500, json!({"error": "boom"})));
        replies.push(reply(500, json!({"error": "boom"})));
        replies.push(reply(
            200,
            json!({"choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}], "usage": {}}),
        ));
        let transport = ScriptedTransport::new(replies);
        let mut options = fast_options("primary/model");
        options.max_retries = 1;
        options.fallback_models = vec!["fallback/model".into()];
        let client = LlmChatClient::new(builder(), transport.clone(), options);

        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(result.status, CallStatus::Ok);
        assert_eq!(result.response_text.unwrap(), "ok");

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["model"], "primary/model");
        assert_eq!(bodies[1]["model"], "primary/model");
        assert_eq!(bodies[2]["model"], "fallback/model");
    }

    #[tokio::test]
    async fn test_truncation_recovery_bumps_max_tokens() {
        let transport = ScriptedTransport::new(vec![
            reply(
                200,
                json!({"choices": [{"message": {"content": "partial"}, "finish_reason": "length"}], "usage": {}}),
            ),
            reply(
                200,
                json!({"choices": [{"message": {"content": "full answer"}, "finish_reason": "stop"}], "usage": {}}),
            ),
        ]);
        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        );

        let mut request = ChatRequest::new(vec![Message::user("Hi")]);
        request.max_tokens = Some(1000);
        let result = client.chat(request).await.unwrap();
        assert_eq!(result.status, CallStatus::Ok);

        let bodies = transport.bodies();
        assert_eq!(bodies[0]["max_tokens"], 1000);
        assert_eq!(bodies[1]["max_tokens"], 1500);
    }

    #[tokio::test]
    async fn test_truncation_with_structured_downgrades_first() {
        let transport = ScriptedTransport::new(vec![
            reply(
                200,
                json!({"choices": [{"message": {"content": "{\"summary_250\": \"part"}, "finish_reason": "max_tokens"}], "usage": {}}),
            ),
            reply(
                200,
                json!({"choices": [{"message": {"content": "{\"summary_250\": \"done\"}"}, "finish_reason": "stop"}], "usage": {}}),
            ),
        ]);
        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        );

        let result = client.chat(structured_request()).await.unwrap();
        assert_eq!(result.status, CallStatus::Ok);

        let bodies = transport.bodies();
        assert_eq!(bodies[0]["response_format"]["type"], "json_schema");
        assert_eq!(bodies[1]["response_format"], json!({"type": "json_object"}));
    }

    #[tokio::test]
    async fn test_invalid_structured_exhausts_ladder_then_marks_parse_error() {
        // Both attempts return JSON missing the required summary fields;
        // with max_retries=1 the json_object step has no retries left, so
        // the parse error surfaces and no fallback model exists.
        let bad = || {
            reply(
                200,
                json!({"choices": [{"message": {"content": "{\"summary_250\": \"\"}"}, "finish_reason": "stop"}], "usage": {}}),
            )
        };
        let transport = ScriptedTransport::new(vec![bad(), bad()]);
        let mut options = fast_options("openai/gpt-4o-mini");
        options.max_retries = 1;
        let client = LlmChatClient::new(builder(), transport.clone(), options);

        let result = client.chat(structured_request()).await.unwrap();
        assert_eq!(result.status, CallStatus::Error);
        assert_eq!(result.error_text.unwrap(), "structured_output_parse_error");
        assert_eq!(transport.bodies().len(), 2);
    }

    #[tokio::test]
    async fn test_429_consumes_retry_after() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse {
                status: 429,
                retry_after: Some(Duration::from_millis(1)),
                content_length: None,
                body: json!({"error": "slow down"}).to_string(),
            }),
            reply(
                200,
                json!({"choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}], "usage": {}}),
            ),
        ]);
        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        );

        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(result.status, CallStatus::Ok);
        assert_eq!(transport.bodies().len(), 2);
    }

    #[tokio::test]
    async fn test_breaker_denies_without_sending() {
        let transport = ScriptedTransport::new(vec![]);
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            1,
            Duration::from_secs(60),
            1,
        )));
        breaker.lock().await.record_failure();

        let client = LlmChatClient::new(
            builder(),
            transport.clone(),
            fast_options("openai/gpt-4o-mini"),
        )
        .with_breaker(breaker);

        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(result.status, CallStatus::Error);
        assert_eq!(result.latency_ms, Some(0));
        assert!(result.error_text.unwrap().contains("temporarily unavailable"));
        assert!(transport.bodies().is_empty());
    }

    #[tokio::test]
    async fn test_breaker_trips_then_recovers() {
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            3,
            Duration::from_millis(50),
            2,
        )));

        // Three consecutive exhausted calls trip the breaker.
        for _ in 0..3 {
            let transport =
                ScriptedTransport::new(vec![reply(500, json!({"error": "down"}))]);
            let mut options = fast_options("m/one");
            options.max_retries = 0;
            let client = LlmChatClient::new(builder(), transport, options)
                .with_breaker(breaker.clone());
            let result = client
                .chat(ChatRequest::new(vec![Message::user("Hi")]))
                .await
                .unwrap();
            assert_eq!(result.status, CallStatus::Error);
        }

        // Fourth call within the cooldown is rejected without a request.
        let transport = ScriptedTransport::new(vec![]);
        let client = LlmChatClient::new(builder(), transport.clone(), fast_options("m/one"))
            .with_breaker(breaker.clone());
        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert!(result.error_text.unwrap().contains("temporarily unavailable"));
        assert!(transport.bodies().is_empty());

        // After the cooldown, two successes close the breaker.
        tokio::time::sleep(Duration::from_millis(60)).await;
        for _ in 0..2 {
            let transport = ScriptedTransport::new(vec![reply(
                200,
                json!({"choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}], "usage": {}}),
            )]);
            let client = LlmChatClient::new(builder(), transport, fast_options("m/one"))
                .with_breaker(breaker.clone());
            let result = client
                .chat(ChatRequest::new(vec![Message::user("Hi")]))
                .await
                .unwrap();
            assert_eq!(result.status, CallStatus::Ok);
        }
        assert_eq!(
            breaker.lock().await.state(),
            crate::breaker::CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_capability_gate_skips_unsupported_fallback() {
        let capabilities = Arc::new(ModelCapabilities::new(
            reqwest::Client::new(),
            "http://unused.invalid",
            "key",
        ));
        capabilities
            .prime(
                ["supported/model".to_string(), "primary/model".to_string()]
                    .into_iter()
                    .collect(),
            )
            .await;

        let transport = ScriptedTransport::new(vec![
            reply(500, json!({"error": "down"})),
            reply(
                200,
                json!({"choices": [{"message": {"content": "{\"summary_250\": \"z\"}"}, "finish_reason": "stop"}], "usage": {}}),
            ),
        ]);
        let mut options = fast_options("primary/model");
        options.max_retries = 0;
        options.fallback_models = vec!["unsupported/model".into(), "supported/model".into()];
        let client = LlmChatClient::new(builder(), transport.clone(), options)
            .with_capabilities(capabilities);

        let result = client.chat(structured_request()).await.unwrap();
        assert_eq!(result.status, CallStatus::Ok);

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["model"], "primary/model");
        // unsupported/model was skipped entirely.
        assert_eq!(bodies[1]["model"], "supported/model");
    }

    #[tokio::test]
    async fn test_validation_error_is_err_not_result() {
        let transport = ScriptedTransport::new(vec![]);
        let client = LlmChatClient::new(builder(), transport, fast_options("m/one"));
        let err = client.chat(ChatRequest::new(vec![])).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cost_estimated_from_configured_prices() {
        let transport = ScriptedTransport::new(vec![reply(
            200,
            json!({
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 2000, "completion_tokens": 500}
            }),
        )]);
        let mut options = fast_options("m/priced");
        options.price_input_per_1k = Some(0.01);
        options.price_output_per_1k = Some(0.03);
        let client = LlmChatClient::new(builder(), transport, options);

        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        // (2000/1000)*0.01 + (500/1000)*0.03
        assert!((result.cost_usd.unwrap() - 0.035).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_provider_cost_preferred_over_estimate() {
        let transport = ScriptedTransport::new(vec![reply(
            200,
            json!({
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 2000, "completion_tokens": 500, "total_cost": 0.42}
            }),
        )]);
        let mut options = fast_options("m/priced");
        options.price_input_per_1k = Some(0.01);
        options.price_output_per_1k = Some(0.03);
        let client = LlmChatClient::new(builder(), transport, options);

        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(result.cost_usd, Some(0.42));
    }

    #[tokio::test]
    async fn test_exhausted_result_reports_last_error() {
        let transport = ScriptedTransport::new(vec![
            reply(503, json!({"error": {"message": "overloaded"}})),
            reply(503, json!({"error": {"message": "overloaded"}})),
        ]);
        let mut options = fast_options("m/one");
        options.max_retries = 1;
        let client = LlmChatClient::new(builder(), transport, options);

        let result = client
            .chat(ChatRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(result.status, CallStatus::Error);
        assert!(result.error_text.is_some());
        assert_eq!(result.endpoint, "/api/v1/chat/completions");
    }
}
