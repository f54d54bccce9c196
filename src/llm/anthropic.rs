//! Request builder and pricing for direct provider "A" (Anthropic wire format).
//!
//! The messages API differs from the OpenAI shape in three ways the builder
//! must bridge: the system prompt is a top-level parameter (system messages
//! are filtered out of the array and concatenated), `max_tokens` is
//! mandatory, and structured output is opt-in via `output_format` plus a
//! beta header.

use crate::llm::models::{ChatRequest, Message, ResponseFormat, RfMode, Role};
use crate::llm::ProviderRequestBuilder;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Messages API path.
pub const ANTHROPIC_MESSAGES_ENDPOINT: &str = "/v1/messages";

/// API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta header enabling structured outputs.
pub const STRUCTURED_OUTPUTS_BETA: &str = "structured-outputs-2025-11-13";

/// Default completion cap when the caller does not supply one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Pricing per 1M tokens, keyed on the exact model id; lookup falls back to
/// a family-prefix match (id minus its trailing date segment).
const PRICING_PER_1M: &[(&str, f64, f64)] = &[
    ("claude-opus-4-5-20250929", 15.00, 75.00),
    ("claude-sonnet-4-5-20250929", 3.00, 15.00),
    ("claude-3-5-sonnet-20241022", 3.00, 15.00),
    ("claude-3-5-haiku-20241022", 0.80, 4.00),
    ("claude-3-opus-20240229", 15.00, 75.00),
    ("claude-3-sonnet-20240229", 3.00, 15.00),
    ("claude-3-haiku-20240307", 0.25, 1.25),
];

/// Look up `(input_per_1k, output_per_1k)` for a model id.
pub fn price_per_1k(model: &str) -> Option<(f64, f64)> {
    let hit = PRICING_PER_1M
        .iter()
        .find(|(id, _, _)| *id == model)
        .or_else(|| {
            PRICING_PER_1M.iter().find(|(id, _, _)| {
                let family = id.rsplit_once('-').map(|(f, _)| f).unwrap_or(id);
                model.starts_with(family)
            })
        });
    hit.map(|(_, input, output)| (input / 1000.0, output / 1000.0))
}

/// Builds headers and bodies for the Anthropic messages API.
#[derive(Clone)]
pub struct AnthropicRequestBuilder {
    api_key: String,
    enable_structured_outputs: bool,
    anthropic_version: String,
}

impl std::fmt::Debug for AnthropicRequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicRequestBuilder")
            .field("api_key", &"***")
            .field("anthropic_version", &self.anthropic_version)
            .finish()
    }
}

impl AnthropicRequestBuilder {
    pub fn new(api_key: impl Into<String>, enable_structured_outputs: bool) -> Self {
        Self {
            api_key: api_key.into(),
            enable_structured_outputs,
            anthropic_version: ANTHROPIC_VERSION.to_string(),
        }
    }

    /// Split out the system prompt (concatenating multiple system messages)
    /// and keep only user/assistant messages for the array.
    fn extract_system_message(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system: Option<String> = None;
        let mut filtered = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => {
                    system = Some(match system {
                        Some(existing) => format!("{existing}\n\n{}", msg.content),
                        None => msg.content.clone(),
                    });
                }
                _ => filtered.push(msg),
            }
        }
        (system, filtered)
    }

    fn build_output_format(&self, rf: &ResponseFormat, mode: RfMode) -> Value {
        if mode == RfMode::JsonObject {
            return json!({"type": "json"});
        }
        match rf {
            ResponseFormat::JsonObject => json!({"type": "json"}),
            ResponseFormat::JsonSchema { name, schema, .. } => {
                if schema.as_object().map(|m| m.is_empty()).unwrap_or(true) {
                    return json!({"type": "json"});
                }
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": name,
                        "schema": schema,
                    },
                })
            }
        }
    }
}

impl ProviderRequestBuilder for AnthropicRequestBuilder {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self) -> &'static str {
        ANTHROPIC_MESSAGES_ENDPOINT
    }

    fn build_headers(&self, use_structured: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            ("x-api-key".into(), self.api_key.clone()),
            ("Content-Type".into(), "application/json".into()),
            ("anthropic-version".into(), self.anthropic_version.clone()),
        ];
        if use_structured && self.enable_structured_outputs {
            headers.push(("anthropic-beta".into(), STRUCTURED_OUTPUTS_BETA.into()));
        }
        headers
    }

    fn build_request_body(
        &self,
        model: &str,
        messages: &[Message],
        request: &ChatRequest,
        response_format: Option<&ResponseFormat>,
        rf_mode: Option<RfMode>,
    ) -> Value {
        let (system, filtered) = Self::extract_system_message(messages);

        let mut body = Map::new();
        body.insert("model".into(), json!(model));
        body.insert(
            "messages".into(),
            json!(filtered
                .iter()
                .map(|m| {
                    let role = match m.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    };
                    json!({"role": role, "content": m.content})
                })
                .collect::<Vec<_>>()),
        );
        body.insert(
            "max_tokens".into(),
            json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );

        if let Some(system) = system {
            body.insert("system".into(), json!(system));
        }

        // Anthropic caps temperature at 1.0.
        body.insert("temperature".into(), json!(request.temperature.min(1.0)));

        if let Some(top_p) = request.top_p {
            body.insert("top_p".into(), json!(top_p));
        }

        if let (Some(rf), Some(mode)) = (response_format, rf_mode) {
            if self.enable_structured_outputs {
                body.insert("output_format".into(), self.build_output_format(rf, mode));
            }
        }

        Value::Object(body)
    }

    fn redact_headers(&self, headers: &[(String, String)]) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("x-api-key") {
                    (k.clone(), "[REDACTED]".to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }

    fn price_per_1k(&self, model: &str) -> Option<(f64, f64)> {
        price_per_1k(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> AnthropicRequestBuilder {
        AnthropicRequestBuilder::new("sk-ant-test", true)
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![
            Message::system("Be terse."),
            Message::user("Hi"),
            Message::assistant("Hello"),
            Message::user("Summarize"),
        ])
    }

    #[test]
    fn test_system_messages_hoisted() {
        let req = request();
        let body = builder().build_request_body("claude-3-5-haiku-20241022", &req.messages, &req, None, None);
        assert_eq!(body["system"], "Be terse.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages
            .iter()
            .all(|m| m["role"] == "user" || m["role"] == "assistant"));
    }

    #[test]
    fn test_multiple_system_messages_concatenated() {
        let req = ChatRequest::new(vec![
            Message::system("One."),
            Message::system("Two."),
            Message::user("Hi"),
        ]);
        let body = builder().build_request_body("claude-3-5-haiku-20241022", &req.messages, &req, None, None);
        assert_eq!(body["system"], "One.\n\nTwo.");
    }

    #[test]
    fn test_max_tokens_mandatory() {
        let req = request();
        let body = builder().build_request_body("claude-3-5-haiku-20241022", &req.messages, &req, None, None);
        assert_eq!(body["max_tokens"], 4096);

        let mut capped = request();
        capped.max_tokens = Some(2000);
        let body =
            builder().build_request_body("claude-3-5-haiku-20241022", &capped.messages, &capped, None, None);
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn test_temperature_clamped_to_one() {
        let mut req = request();
        req.temperature = 1.8;
        let body = builder().build_request_body("claude-3-5-haiku-20241022", &req.messages, &req, None, None);
        assert_eq!(body["temperature"], 1.0);
    }

    #[test]
    fn test_structured_beta_header() {
        let headers: BTreeMap<_, _> = builder().build_headers(true).into_iter().collect();
        assert_eq!(headers["anthropic-beta"], STRUCTURED_OUTPUTS_BETA);
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);

        let plain: BTreeMap<_, _> = builder().build_headers(false).into_iter().collect();
        assert!(!plain.contains_key("anthropic-beta"));
    }

    #[test]
    fn test_output_format_shapes() {
        let req = request();
        let rf = ResponseFormat::JsonSchema {
            name: "sum".into(),
            strict: true,
            schema: json!({"type": "object", "properties": {}}),
        };
        let body = builder().build_request_body(
            "claude-3-5-haiku-20241022",
            &req.messages,
            &req,
            Some(&rf),
            Some(RfMode::JsonSchema),
        );
        assert_eq!(body["output_format"]["type"], "json_schema");
        assert!(body.get("response_format").is_none());

        let body = builder().build_request_body(
            "claude-3-5-haiku-20241022",
            &req.messages,
            &req,
            Some(&rf),
            Some(RfMode::JsonObject),
        );
        assert_eq!(body["output_format"], json!({"type": "json"}));
    }

    #[test]
    fn test_empty_schema_degrades_to_json() {
        let req = request();
        let rf = ResponseFormat::JsonSchema {
            name: "sum".into(),
            strict: true,
            schema: json!({}),
        };
        let body = builder().build_request_body(
            "claude-3-5-haiku-20241022",
            &req.messages,
            &req,
            Some(&rf),
            Some(RfMode::JsonSchema),
        );
        assert_eq!(body["output_format"], json!({"type": "json"}));
    }

    #[test]
    fn test_pricing_family_match() {
        assert!(price_per_1k("claude-3-5-haiku-20241022").is_some());
        // Future date resolves through the family prefix.
        assert!(price_per_1k("claude-3-5-haiku-20990101").is_some());
        assert!(price_per_1k("claude-unknown").is_none());
    }

    #[test]
    fn test_redaction() {
        let b = builder();
        let redacted = b.redact_headers(&b.build_headers(true));
        assert_eq!(redacted["x-api-key"], "[REDACTED]");
    }
}
