//! Single construction entry point for LLM clients.
//!
//! Selects the request builder, base URL, capability cache, and pricing
//! source for the configured provider, wiring everything to a pooled HTTP
//! transport.

use crate::breaker::CircuitBreaker;
use crate::config::{AnthropicConfig, LlmProvider, OpenAiConfig, OpenRouterConfig, RuntimeConfig};
use crate::error::{CoreError, Result};
use crate::http_pool::{self, ClientKey, PoolSettings};
use crate::llm::anthropic::AnthropicRequestBuilder;
use crate::llm::capabilities::ModelCapabilities;
use crate::llm::openai::OpenAiRequestBuilder;
use crate::llm::openrouter::OpenRouterRequestBuilder;
use crate::llm::orchestrator::{ChatClientOptions, LlmChatClient};
use crate::llm::HttpChatTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Aggregator API host.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai";
/// Direct provider "O" host.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
/// Direct provider "A" host.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Provider configurations handed to the factory; only the selected
/// provider's section must be populated.
#[derive(Debug, Clone, Default)]
pub struct LlmFactoryConfig {
    pub openrouter: OpenRouterConfig,
    pub openai: OpenAiConfig,
    pub anthropic: AnthropicConfig,
}

/// Build the chat client for `provider`.
///
/// The HTTP transport comes from the process-wide pool, keyed so distinct
/// API keys never share connections. The aggregator client additionally
/// gets the structured-output capability cache.
pub fn build_llm_client(
    provider: LlmProvider,
    config: &LlmFactoryConfig,
    runtime: &RuntimeConfig,
    breaker: Option<Arc<Mutex<CircuitBreaker>>>,
) -> Result<LlmChatClient> {
    runtime.validate()?;
    tracing::info!(provider = provider.as_str(), "llm_client_factory_creating");

    let timeout = Duration::from_secs(runtime.request_timeout_sec);
    let settings = PoolSettings {
        timeout,
        ..PoolSettings::default()
    };

    let client = match provider {
        LlmProvider::OpenRouter => {
            let c = &config.openrouter;
            require_key(&c.api_key, "openrouter.api_key")?;
            require_key(&c.model, "openrouter.model")?;

            let key = ClientKey::new(OPENROUTER_BASE_URL, timeout, 20, Some(&c.api_key));
            let http = http_pool::acquire(&key, &settings)?;

            let builder = Arc::new(OpenRouterRequestBuilder::new(
                c.api_key.clone(),
                c.http_referer.clone(),
                c.x_title.clone(),
                c.provider_order.clone(),
                c.enable_structured_outputs,
            ));
            let capabilities = Arc::new(ModelCapabilities::new(
                http.clone(),
                format!("{OPENROUTER_BASE_URL}/api/v1"),
                c.api_key.clone(),
            ));
            let transport = Arc::new(HttpChatTransport::new(http, OPENROUTER_BASE_URL));

            let mut options = ChatClientOptions::new(c.model.clone());
            options.fallback_models = c.fallback_models.clone();
            options.max_retries = c.max_retries;
            options.max_response_size_bytes = c.max_response_size_mb * 1024 * 1024;
            options.enable_structured_outputs = c.enable_structured_outputs;
            options.auto_fallback_structured = c.auto_fallback_structured;
            options.debug_payloads = runtime.debug_payloads;

            LlmChatClient::new(builder, transport, options).with_capabilities(capabilities)
        }
        LlmProvider::OpenAi => {
            let c = &config.openai;
            require_key(&c.api_key, "openai.api_key")?;
            require_key(&c.model, "openai.model")?;

            let key = ClientKey::new(OPENAI_BASE_URL, timeout, 20, Some(&c.api_key));
            let http = http_pool::acquire(&key, &settings)?;

            let builder = Arc::new(OpenAiRequestBuilder::new(
                c.api_key.clone(),
                c.organization.clone(),
                c.enable_structured_outputs,
            ));
            let transport = Arc::new(HttpChatTransport::new(http, OPENAI_BASE_URL));

            let mut options = ChatClientOptions::new(c.model.clone());
            options.fallback_models = c.fallback_models.clone();
            options.max_retries = c.max_retries;
            options.enable_structured_outputs = c.enable_structured_outputs;
            options.auto_fallback_structured = false;
            options.debug_payloads = runtime.debug_payloads;

            LlmChatClient::new(builder, transport, options)
        }
        LlmProvider::Anthropic => {
            let c = &config.anthropic;
            require_key(&c.api_key, "anthropic.api_key")?;
            require_key(&c.model, "anthropic.model")?;

            let key = ClientKey::new(ANTHROPIC_BASE_URL, timeout, 20, Some(&c.api_key));
            let http = http_pool::acquire(&key, &settings)?;

            let builder = Arc::new(AnthropicRequestBuilder::new(
                c.api_key.clone(),
                c.enable_structured_outputs,
            ));
            let transport = Arc::new(HttpChatTransport::new(http, ANTHROPIC_BASE_URL));

            let mut options = ChatClientOptions::new(c.model.clone());
            options.fallback_models = c.fallback_models.clone();
            options.max_retries = c.max_retries;
            options.enable_structured_outputs = c.enable_structured_outputs;
            options.auto_fallback_structured = false;
            options.debug_payloads = runtime.debug_payloads;

            LlmChatClient::new(builder, transport, options)
        }
    };

    Ok(match breaker {
        Some(breaker) => client.with_breaker(breaker),
        None => client,
    })
}

fn require_key(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::config("required value is empty", field, "<empty>"));
    }
    Ok(())
}
