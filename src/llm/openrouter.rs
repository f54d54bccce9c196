//! Request builder for the aggregator provider (OpenRouter wire format).

use crate::llm::models::{ChatRequest, Message, ResponseFormat, RfMode};
use crate::llm::ProviderRequestBuilder;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Chat completions path on the aggregator.
pub const OPENROUTER_CHAT_ENDPOINT: &str = "/api/v1/chat/completions";

/// Builds headers and bodies for the aggregator API.
///
/// The aggregator accepts OpenAI-compatible bodies plus routing preferences
/// (`provider.order`) and content-compression transforms (`middle-out`) for
/// oversized conversations.
#[derive(Clone)]
pub struct OpenRouterRequestBuilder {
    api_key: String,
    http_referer: Option<String>,
    x_title: Option<String>,
    provider_order: Vec<String>,
    enable_structured_outputs: bool,
}

impl std::fmt::Debug for OpenRouterRequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterRequestBuilder")
            .field("api_key", &"***")
            .field("provider_order", &self.provider_order)
            .field("enable_structured_outputs", &self.enable_structured_outputs)
            .finish()
    }
}

impl OpenRouterRequestBuilder {
    pub fn new(
        api_key: impl Into<String>,
        http_referer: Option<String>,
        x_title: Option<String>,
        provider_order: Vec<String>,
        enable_structured_outputs: bool,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            http_referer,
            x_title,
            provider_order,
            enable_structured_outputs,
        }
    }

    /// Wrap the abstract response format into the aggregator's native shape
    /// for the given mode. Already-wrapped objects pass through untouched
    /// when the caller hands one in via `schema`.
    fn build_response_format(&self, rf: &ResponseFormat, mode: RfMode) -> Value {
        if mode == RfMode::JsonObject {
            return json!({"type": "json_object"});
        }
        match rf {
            ResponseFormat::JsonObject => json!({"type": "json_object"}),
            ResponseFormat::JsonSchema {
                name,
                strict,
                schema,
            } => {
                // Pass-through when the schema is already a fully wrapped
                // response_format object.
                if schema.get("type").and_then(Value::as_str) == Some("json_schema")
                    && schema.get("json_schema").is_some()
                {
                    return schema.clone();
                }
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": name,
                        "strict": strict,
                        "schema": schema,
                    },
                })
            }
        }
    }

    /// Character threshold above which the middle-out transform is applied,
    /// by model family.
    fn compression_threshold(model: &str) -> usize {
        let model_lower = model.to_lowercase();
        if model_lower.contains("gpt-5") {
            800_000
        } else if model_lower.contains("gpt-4o") {
            350_000
        } else if model_lower.contains("gemini-2.5") {
            1_200_000
        } else {
            200_000
        }
    }
}

impl ProviderRequestBuilder for OpenRouterRequestBuilder {
    fn provider_name(&self) -> &'static str {
        "openrouter"
    }

    fn endpoint(&self) -> &'static str {
        OPENROUTER_CHAT_ENDPOINT
    }

    fn build_headers(&self, _use_structured: bool) -> Vec<(String, String)> {
        vec![
            ("Authorization".into(), format!("Bearer {}", self.api_key)),
            ("Content-Type".into(), "application/json".into()),
            (
                "HTTP-Referer".into(),
                self.http_referer
                    .clone()
                    .unwrap_or_else(|| "https://github.com/your-repo".into()),
            ),
            (
                "X-Title".into(),
                self.x_title
                    .clone()
                    .unwrap_or_else(|| "Digest Pipeline".into()),
            ),
        ]
    }

    fn build_request_body(
        &self,
        model: &str,
        messages: &[Message],
        request: &ChatRequest,
        response_format: Option<&ResponseFormat>,
        rf_mode: Option<RfMode>,
    ) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(model));
        body.insert(
            "messages".into(),
            json!(messages
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                .collect::<Vec<_>>()),
        );
        body.insert("temperature".into(), json!(request.temperature));

        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if request.stream {
            body.insert("stream".into(), json!(true));
        }

        // GPT-5 family wants headroom for extended reasoning.
        let model_lower = model.to_lowercase();
        if model_lower.contains("gpt-5") {
            body.insert("thinking".into(), json!("extended"));
            let current_max = body.get("max_tokens").and_then(Value::as_u64).unwrap_or(0);
            if current_max < 16_384 {
                body.insert("max_tokens".into(), json!(16_384));
            }
            if request.temperature > 0.5 {
                body.insert("temperature".into(), json!(0.4));
            }
            if request.top_p.is_none() {
                body.insert("top_p".into(), json!(0.9));
            }
        }

        if let (Some(rf), Some(mode)) = (response_format, rf_mode) {
            if self.enable_structured_outputs {
                body.insert("response_format".into(), self.build_response_format(rf, mode));
            }
        }

        if !self.provider_order.is_empty() {
            body.insert("provider".into(), json!({"order": self.provider_order}));
        }

        Value::Object(body)
    }

    fn redact_headers(&self, headers: &[(String, String)]) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.clone(), "REDACTED".to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }

    fn compression_transform(&self, messages: &[Message], model: &str) -> Option<&'static str> {
        let total: usize = messages.iter().map(|m| m.content.len()).sum();
        if total > Self::compression_threshold(model) {
            Some("middle-out")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> OpenRouterRequestBuilder {
        OpenRouterRequestBuilder::new("sk-or-test", None, None, Vec::new(), true)
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![Message::system("S"), Message::user("Hi")])
    }

    fn schema_rf() -> ResponseFormat {
        ResponseFormat::JsonSchema {
            name: "sum".into(),
            strict: true,
            schema: json!({"type": "object", "properties": {"summary_250": {"type": "string"}}}),
        }
    }

    #[test]
    fn test_headers_include_referer_and_title() {
        let headers = builder().build_headers(false);
        let map: BTreeMap<_, _> = headers.iter().cloned().collect();
        assert!(map["Authorization"].starts_with("Bearer "));
        assert!(map.contains_key("HTTP-Referer"));
        assert!(map.contains_key("X-Title"));
    }

    #[test]
    fn test_body_json_schema_mode() {
        let body = builder().build_request_body(
            "openai/gpt-4o-mini",
            &request().messages,
            &request(),
            Some(&schema_rf()),
            Some(RfMode::JsonSchema),
        );
        let rf = &body["response_format"];
        assert_eq!(rf["type"], "json_schema");
        assert_eq!(rf["json_schema"]["name"], "sum");
        assert_eq!(rf["json_schema"]["strict"], true);
        assert!(rf["json_schema"]["schema"]["properties"]["summary_250"].is_object());
    }

    #[test]
    fn test_body_json_object_mode_overrides_schema() {
        let body = builder().build_request_body(
            "openai/gpt-4o-mini",
            &request().messages,
            &request(),
            Some(&schema_rf()),
            Some(RfMode::JsonObject),
        );
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
    }

    #[test]
    fn test_body_unstructured_omits_response_format() {
        let body = builder().build_request_body(
            "openai/gpt-4o-mini",
            &request().messages,
            &request(),
            None,
            None,
        );
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_prewrapped_schema_passes_through() {
        let wrapped = json!({
            "type": "json_schema",
            "json_schema": {"name": "custom", "strict": false, "schema": {}}
        });
        let rf = ResponseFormat::JsonSchema {
            name: "ignored".into(),
            strict: true,
            schema: wrapped.clone(),
        };
        let body = builder().build_request_body(
            "openai/gpt-4o-mini",
            &request().messages,
            &request(),
            Some(&rf),
            Some(RfMode::JsonSchema),
        );
        assert_eq!(body["response_format"], wrapped);
    }

    #[test]
    fn test_provider_order_attached() {
        let builder = OpenRouterRequestBuilder::new(
            "sk-or-test",
            None,
            None,
            vec!["together".into(), "fireworks".into()],
            true,
        );
        let body = builder.build_request_body(
            "openai/gpt-4o-mini",
            &request().messages,
            &request(),
            None,
            None,
        );
        assert_eq!(body["provider"]["order"], json!(["together", "fireworks"]));
    }

    #[test]
    fn test_gpt5_reasoning_floor() {
        let mut req = request();
        req.temperature = 0.7;
        let body = builder().build_request_body(
            "openai/gpt-5-mini",
            &req.messages,
            &req,
            None,
            None,
        );
        assert_eq!(body["thinking"], "extended");
        assert_eq!(body["max_tokens"], 16_384);
        assert_eq!(body["temperature"], 0.4);
        assert_eq!(body["top_p"], 0.9);
    }

    #[test]
    fn test_compression_thresholds() {
        let b = builder();
        let small = vec![Message::user("short")];
        assert_eq!(b.compression_transform(&small, "openai/gpt-4o"), None);

        let big = vec![Message::user("x".repeat(250_000))];
        assert_eq!(b.compression_transform(&big, "some/other-model"), Some("middle-out"));
        // gpt-4o threshold is higher.
        assert_eq!(b.compression_transform(&big, "openai/gpt-4o"), None);

        let huge = vec![Message::user("x".repeat(1_300_000))];
        assert_eq!(
            b.compression_transform(&huge, "google/gemini-2.5-pro"),
            Some("middle-out")
        );
    }

    #[test]
    fn test_redacted_headers() {
        let b = builder();
        let headers = b.build_headers(false);
        let redacted = b.redact_headers(&headers);
        assert_eq!(redacted["Authorization"], "REDACTED");
        assert_eq!(redacted["Content-Type"], "application/json");
    }

    #[test]
    fn test_debug_hides_key() {
        assert!(!format!("{:?}", builder()).contains("sk-or-test"));
    }
}
