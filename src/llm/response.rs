//! Response processing for provider chat completions.
//!
//! Providers wrap content in wildly different envelopes: plain strings,
//! typed part lists, tool calls, reasoning fields. The extractor walks all
//! of them and prefers JSON segments over prose when structured output was
//! requested.

use crate::json_guard::extract_json;
use crate::llm::models::{CacheMetrics, ErrorContext};
use serde_json::Value;

/// Token usage reported by the provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub total_cost: Option<f64>,
}

/// Stateless processor for provider response envelopes.
#[derive(Debug, Clone, Default)]
pub struct ResponseProcessor {
    /// Report provider-supplied cost on results.
    pub enable_stats: bool,
}

/// Accumulates content segments found while walking a response, preferring
/// JSON over prose and de-duplicating by serialized form.
#[derive(Default)]
struct ContentWalk {
    json_segments: Vec<String>,
    text_segments: Vec<String>,
    seen_json: std::collections::HashSet<String>,
}

impl ContentWalk {
    fn append_json_value(&mut self, value: &Value) {
        let serialized = match value {
            Value::Object(_) | Value::Array(_) => match serde_json::to_string(value) {
                Ok(s) => s,
                Err(_) => return,
            },
            Value::String(s) => {
                let stripped = s.trim();
                if stripped.is_empty() {
                    return;
                }
                match serde_json::from_str::<Value>(stripped) {
                    Ok(parsed @ (Value::Object(_) | Value::Array(_))) => {
                        serde_json::to_string(&parsed).unwrap_or_default()
                    }
                    _ => return,
                }
            }
            _ => return,
        };
        if !serialized.is_empty() && self.seen_json.insert(serialized.clone()) {
            self.json_segments.push(serialized);
        }
    }

    fn append_text(&mut self, value: &str) {
        let stripped = value.trim();
        if !stripped.is_empty() {
            self.text_segments.push(stripped.to_string());
        }
    }

    fn append_text_or_json(&mut self, value: &str) {
        let stripped = value.trim();
        if stripped.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(stripped) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => self.append_json_value(&parsed),
            _ => self.append_text(stripped),
        }
    }

    fn walk(&mut self, part: &Value) {
        match part {
            Value::Object(map) => {
                for key in ["json", "parsed", "arguments", "output"] {
                    if let Some(value) = map.get(key) {
                        self.append_json_value(value);
                    }
                }

                if let Some(Value::Object(function)) = map.get("function") {
                    if let Some(args) = function.get("arguments") {
                        self.append_json_value(args);
                    }
                }

                if let Some(Value::Array(tool_calls)) = map.get("tool_calls") {
                    for call in tool_calls {
                        self.walk(call);
                    }
                }

                for key in ["text", "content", "reasoning"] {
                    match map.get(key) {
                        Some(Value::String(s)) => self.append_text_or_json(s),
                        Some(nested @ (Value::Object(_) | Value::Array(_))) => self.walk(nested),
                        _ => {}
                    }
                }

                for key in ["data", "payload", "message"] {
                    if let Some(nested @ (Value::Object(_) | Value::Array(_))) = map.get(key) {
                        self.append_json_value(nested);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item);
                }
            }
            Value::String(s) => self.append_text(s),
            _ => {}
        }
    }

    fn into_text(self) -> Option<String> {
        if !self.json_segments.is_empty() {
            Some(self.json_segments.join("\n"))
        } else if !self.text_segments.is_empty() {
            Some(self.text_segments.join("\n"))
        } else {
            None
        }
    }
}

impl ResponseProcessor {
    pub fn new(enable_stats: bool) -> Self {
        Self { enable_stats }
    }

    /// Extract textual content from a response `message` object.
    ///
    /// Inspection order: `parsed` (when structured output was requested),
    /// string `content`, part-list `content` (walked), `reasoning` (with
    /// embedded-JSON extraction), and finally the first tool call's
    /// arguments.
    pub fn extract_structured_content(&self, message: &Value, rf_included: bool) -> Option<String> {
        if rf_included {
            if let Some(parsed) = message.get("parsed") {
                if !parsed.is_null() {
                    let text = serde_json::to_string(parsed)
                        .unwrap_or_else(|_| parsed.to_string());
                    if !text.trim().is_empty() {
                        return Some(text);
                    }
                }
            }
        }

        match message.get("content") {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(list @ Value::Array(_)) => {
                let mut walker = ContentWalk::default();
                walker.walk(list);
                if let Some(text) = walker.into_text() {
                    return Some(text);
                }
            }
            _ => {}
        }

        if let Some(Value::String(reasoning)) = message.get("reasoning") {
            if !reasoning.trim().is_empty() {
                if let Some(embedded) = extract_json(reasoning) {
                    return serde_json::to_string(&embedded).ok();
                }
                return Some(reasoning.clone());
            }
        }

        if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
            if let Some(first) = tool_calls.first() {
                let args = first.get("function").and_then(|f| f.get("arguments"));
                match args {
                    Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
                    Some(obj @ Value::Object(_)) => {
                        return serde_json::to_string(obj).ok();
                    }
                    _ => {
                        tracing::debug!("tool_call_extraction_failed");
                    }
                }
            }
        }

        None
    }

    /// Extract `(text, usage, cost)` from a full response body. Cost is the
    /// provider-reported `usage.total_cost` when stats are enabled; the
    /// orchestrator estimates from pricing tables otherwise.
    pub fn extract_response_data(
        &self,
        data: &Value,
        rf_included: bool,
    ) -> (Option<String>, Usage, Option<f64>) {
        let usage_value = data.get("usage").cloned().unwrap_or(Value::Null);
        let usage = Usage {
            prompt_tokens: usage_value.get("prompt_tokens").and_then(Value::as_u64),
            completion_tokens: usage_value.get("completion_tokens").and_then(Value::as_u64),
            total_tokens: usage_value.get("total_tokens").and_then(Value::as_u64),
            total_cost: usage_value.get("total_cost").and_then(Value::as_f64),
        };

        let text = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| self.extract_structured_content(message, rf_included));

        let cost = if self.enable_stats { usage.total_cost } else { None };

        (text, usage, cost)
    }

    /// Validate a structured response: it must parse as JSON and, for the
    /// summary schema family, contain at least one non-empty string among
    /// `summary_250` / `summary_1000` / `tldr`. Returns
    /// `(is_valid, normalized_text)`.
    pub fn validate_structured_response(
        &self,
        text: Option<&str>,
        rf_included: bool,
    ) -> (bool, Option<String>) {
        if !rf_included {
            return (true, text.map(str::to_string));
        }

        let text_str = text.unwrap_or("");
        let Some(parsed) = extract_json(text_str) else {
            return (false, Some(text_str.to_string()));
        };

        let normalized = serde_json::to_string(&parsed).unwrap_or_else(|_| text_str.to_string());

        if let Value::Object(map) = &parsed {
            let summary_schema = ["summary_250", "summary_1000", "tldr"]
                .iter()
                .any(|k| map.contains_key(*k));
            if summary_schema {
                let has_content = ["summary_250", "summary_1000", "tldr"].iter().any(|k| {
                    map.get(*k)
                        .and_then(Value::as_str)
                        .map(|s| !s.trim().is_empty())
                        .unwrap_or(false)
                });
                if !has_content {
                    return (false, Some(normalized));
                }
            }
        }

        (true, Some(normalized))
    }

    /// Inspect finish reasons: `(truncated, finish_reason, native_finish_reason)`.
    ///
    /// Truncated when `finish_reason` is `length`/`max_tokens`
    /// (case-insensitive) or the native reason, hyphens folded to
    /// underscores, contains `max_token` or `length`.
    pub fn is_completion_truncated(
        &self,
        data: &Value,
    ) -> (bool, Option<String>, Option<String>) {
        let Some(first) = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            return (false, None, None);
        };

        let finish_reason = first
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let native_reason = first
            .get("native_finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut truncated = finish_reason
            .as_deref()
            .map(|r| {
                let lower = r.to_lowercase();
                lower == "length" || lower == "max_tokens"
            })
            .unwrap_or(false);

        if !truncated {
            if let Some(native) = native_reason.as_deref() {
                let normalized = native.replace('-', "_").to_lowercase();
                truncated = normalized.contains("max_token") || normalized.contains("length");
            }
        }

        (truncated, finish_reason, native_reason)
    }

    /// Whether a 400 body blames `response_format` while structured output
    /// was included.
    pub fn should_downgrade_response_format(
        &self,
        status: u16,
        data: &Value,
        rf_included: bool,
    ) -> bool {
        if status != 400 || !rf_included {
            return false;
        }
        serde_json::to_string(data)
            .map(|dump| dump.to_lowercase().contains("response_format"))
            .unwrap_or(false)
    }

    /// Canonical error context for a non-200 response.
    pub fn get_error_context(&self, status: u16, data: &Value) -> ErrorContext {
        let mut message = match status {
            400 => "Invalid or missing request parameters".to_string(),
            401 => "Authentication failed (invalid or expired API key)".to_string(),
            402 => "Insufficient account balance".to_string(),
            403 => "Access forbidden (API key limit exceeded or invalid permissions)".to_string(),
            404 => "Requested resource not found".to_string(),
            429 => "Rate limit exceeded".to_string(),
            500 => "Internal server error".to_string(),
            other => format!("HTTP {other} error"),
        };

        let api_error = match data.get("error") {
            Some(Value::Object(err)) => err
                .get("message")
                .or_else(|| err.get("code"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        if status == 403 {
            if let Some(api_error) = &api_error {
                if api_error.to_lowercase().contains("key limit exceeded") {
                    message = "API key usage limit exceeded. Please check your account limits or upgrade your plan."
                        .to_string();
                }
            }
        }

        let provider = match data.get("provider") {
            Some(Value::Object(p)) => p
                .get("name")
                .or_else(|| p.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        ErrorContext {
            status_code: Some(status),
            message,
            api_error,
            provider,
        }
    }

    /// Prompt-cache metrics from the usage block, when the provider reports
    /// them.
    pub fn extract_cache_metrics(&self, data: &Value) -> CacheMetrics {
        let usage = data.get("usage").cloned().unwrap_or(Value::Null);
        let details = usage.get("prompt_tokens_details").cloned().unwrap_or(Value::Null);

        let cache_read_tokens = details
            .get("cached_tokens")
            .or_else(|| usage.get("cache_read_input_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let cache_creation_tokens = usage
            .get("cache_creation_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let cache_discount = usage.get("cache_discount").and_then(Value::as_f64);

        CacheMetrics {
            cache_read_tokens,
            cache_creation_tokens,
            cache_discount,
            cache_hit: cache_read_tokens > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn processor() -> ResponseProcessor {
        ResponseProcessor::new(true)
    }

    // ── extract_structured_content ──

    #[test]
    fn test_parsed_field_preferred_when_structured() {
        let message = json!({"parsed": {"summary_250": "x"}, "content": "prose"});
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert_eq!(text, r#"{"summary_250":"x"}"#);
    }

    #[test]
    fn test_parsed_ignored_when_unstructured() {
        let message = json!({"parsed": {"summary_250": "x"}, "content": "prose"});
        let text = processor().extract_structured_content(&message, false).unwrap();
        assert_eq!(text, "prose");
    }

    #[test]
    fn test_string_content_passthrough() {
        let message = json!({"content": "hello"});
        assert_eq!(
            processor().extract_structured_content(&message, false).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_part_list_prefers_json_over_text() {
        let message = json!({
            "content": [
                {"text": "Here is the answer:"},
                {"json": {"tldr": "short"}},
            ]
        });
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert_eq!(text, r#"{"tldr":"short"}"#);
    }

    #[test]
    fn test_part_list_dedupes_json() {
        let message = json!({
            "content": [
                {"json": {"a": 1}},
                {"parsed": {"a": 1}},
            ]
        });
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert_eq!(text, r#"{"a":1}"#);
    }

    #[test]
    fn test_part_list_walks_function_arguments() {
        let message = json!({
            "content": [
                {"function": {"arguments": {"tldr": "via tool"}}},
            ]
        });
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert!(text.contains("via tool"));
    }

    #[test]
    fn test_part_list_json_parseable_text() {
        let message = json!({
            "content": [
                {"text": "{\"tldr\": \"embedded\"}"},
            ]
        });
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert_eq!(text, r#"{"tldr":"embedded"}"#);
    }

    #[test]
    fn test_reasoning_with_embedded_json() {
        let message = json!({
            "content": "",
            "reasoning": "Thinking... the answer must be {\"tldr\": \"deduced\"} clearly."
        });
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert_eq!(text, r#"{"tldr":"deduced"}"#);
    }

    #[test]
    fn test_reasoning_without_json_used_raw() {
        let message = json!({"reasoning": "just thoughts"});
        assert_eq!(
            processor().extract_structured_content(&message, true).unwrap(),
            "just thoughts"
        );
    }

    #[test]
    fn test_tool_call_arguments_fallback() {
        let message = json!({
            "tool_calls": [
                {"function": {"arguments": "{\"tldr\": \"tooled\"}"}}
            ]
        });
        let text = processor().extract_structured_content(&message, true).unwrap();
        assert!(text.contains("tooled"));
    }

    #[test]
    fn test_empty_message_yields_none() {
        assert!(processor()
            .extract_structured_content(&json!({}), true)
            .is_none());
    }

    // ── extract_response_data ──

    #[test]
    fn test_extract_response_data_with_cost() {
        let data = json!({
            "choices": [{"message": {"content": "hi"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15, "total_cost": 0.01}
        });
        let (text, usage, cost) = processor().extract_response_data(&data, false);
        assert_eq!(text.unwrap(), "hi");
        assert_eq!(usage.prompt_tokens, Some(10));
        assert_eq!(usage.completion_tokens, Some(5));
        assert_eq!(cost, Some(0.01));
    }

    #[test]
    fn test_extract_response_data_no_stats() {
        let data = json!({
            "choices": [{"message": {"content": "hi"}}],
            "usage": {"total_cost": 0.01}
        });
        let (_, _, cost) = ResponseProcessor::new(false).extract_response_data(&data, false);
        assert_eq!(cost, None);
    }

    // ── validate_structured_response ──

    #[test]
    fn test_validate_requires_summary_content() {
        let (valid, _) = processor().validate_structured_response(
            Some(r#"{"summary_250": "", "tldr": ""}"#),
            true,
        );
        assert!(!valid);

        let (valid, normalized) = processor().validate_structured_response(
            Some(r#"{"summary_250": "x"}"#),
            true,
        );
        assert!(valid);
        assert_eq!(normalized.unwrap(), r#"{"summary_250":"x"}"#);
    }

    #[test]
    fn test_validate_invalid_json_fails() {
        let (valid, text) = processor().validate_structured_response(Some("not json"), true);
        assert!(!valid);
        assert_eq!(text.unwrap(), "not json");
    }

    #[test]
    fn test_validate_skipped_when_unstructured() {
        let (valid, _) = processor().validate_structured_response(Some("anything"), false);
        assert!(valid);
    }

    #[test]
    fn test_validate_non_summary_schema_passes() {
        let (valid, _) = processor().validate_structured_response(Some(r#"{"other": 1}"#), true);
        assert!(valid);
    }

    // ── truncation ──

    #[test]
    fn test_truncated_by_finish_reason() {
        let data = json!({"choices": [{"finish_reason": "Length"}]});
        let (truncated, reason, _) = processor().is_completion_truncated(&data);
        assert!(truncated);
        assert_eq!(reason.unwrap(), "Length");
    }

    #[test]
    fn test_truncated_by_native_reason() {
        let data = json!({"choices": [{"finish_reason": "stop", "native_finish_reason": "MAX-TOKENS"}]});
        let (truncated, _, native) = processor().is_completion_truncated(&data);
        assert!(truncated);
        assert_eq!(native.unwrap(), "MAX-TOKENS");
    }

    #[test]
    fn test_not_truncated() {
        let data = json!({"choices": [{"finish_reason": "stop"}]});
        let (truncated, _, _) = processor().is_completion_truncated(&data);
        assert!(!truncated);
    }

    #[test]
    fn test_truncated_empty_choices() {
        let (truncated, reason, native) = processor().is_completion_truncated(&json!({}));
        assert!(!truncated);
        assert!(reason.is_none() && native.is_none());
    }

    // ── downgrade & error context ──

    #[test]
    fn test_should_downgrade_on_response_format_400() {
        let data = json!({"error": {"message": "response_format unsupported"}});
        assert!(processor().should_downgrade_response_format(400, &data, true));
        assert!(!processor().should_downgrade_response_format(400, &data, false));
        assert!(!processor().should_downgrade_response_format(500, &data, true));
        let other = json!({"error": {"message": "bad params"}});
        assert!(!processor().should_downgrade_response_format(400, &other, true));
    }

    #[test]
    fn test_error_context_canonical_messages() {
        let ctx = processor().get_error_context(401, &json!({}));
        assert!(ctx.message.contains("Authentication failed"));
        assert_eq!(ctx.status_code, Some(401));

        let ctx = processor().get_error_context(418, &json!({}));
        assert_eq!(ctx.message, "HTTP 418 error");
    }

    #[test]
    fn test_error_context_key_limit_enrichment() {
        let data = json!({"error": {"message": "Key limit exceeded for this month"}});
        let ctx = processor().get_error_context(403, &data);
        assert!(ctx.message.contains("usage limit exceeded"));
        assert_eq!(ctx.api_error.unwrap(), "Key limit exceeded for this month");
    }

    #[test]
    fn test_error_context_provider_detail() {
        let data = json!({"error": "boom", "provider": {"name": "fireworks"}});
        let ctx = processor().get_error_context(500, &data);
        assert_eq!(ctx.provider.unwrap(), "fireworks");
        assert_eq!(ctx.api_error.unwrap(), "boom");
    }

    // ── cache metrics ──

    #[test]
    fn test_cache_metrics_extraction() {
        let data = json!({
            "usage": {
                "prompt_tokens_details": {"cached_tokens": 128},
                "cache_discount": 0.5
            }
        });
        let metrics = processor().extract_cache_metrics(&data);
        assert_eq!(metrics.cache_read_tokens, 128);
        assert!(metrics.cache_hit);
        assert_eq!(metrics.cache_discount, Some(0.5));
    }

    #[test]
    fn test_cache_metrics_absent() {
        let metrics = processor().extract_cache_metrics(&json!({"usage": {}}));
        assert_eq!(metrics, CacheMetrics::default());
    }
}
