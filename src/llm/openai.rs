//! Request builder and pricing for direct provider "O" (OpenAI wire format).

use crate::llm::models::{ChatRequest, Message, ResponseFormat, RfMode};
use crate::llm::ProviderRequestBuilder;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Chat completions path.
pub const OPENAI_CHAT_ENDPOINT: &str = "/v1/chat/completions";

/// Pricing per 1M tokens, keyed on the exact model id. Lookup falls back to
/// a family-prefix match.
const PRICING_PER_1M: &[(&str, f64, f64)] = &[
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-2024-11-20", 2.50, 10.00),
    ("gpt-4o-2024-08-06", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o-mini-2024-07-18", 0.15, 0.60),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("o1", 15.00, 60.00),
    ("o1-preview", 15.00, 60.00),
    ("o1-mini", 3.00, 12.00),
    ("o3-mini", 1.10, 4.40),
];

/// Look up `(input_per_1k, output_per_1k)` for a model id.
pub fn price_per_1k(model: &str) -> Option<(f64, f64)> {
    let exact = PRICING_PER_1M.iter().find(|(id, _, _)| *id == model);
    let hit = exact.or_else(|| {
        // Longest-prefix family match so "gpt-4o-mini-2024-xx" resolves to
        // gpt-4o-mini, not gpt-4.
        PRICING_PER_1M
            .iter()
            .filter(|(id, _, _)| model.starts_with(id))
            .max_by_key(|(id, _, _)| id.len())
    });
    hit.map(|(_, input, output)| (input / 1000.0, output / 1000.0))
}

/// Builds headers and bodies for the OpenAI chat completions API.
#[derive(Clone)]
pub struct OpenAiRequestBuilder {
    api_key: String,
    organization: Option<String>,
    enable_structured_outputs: bool,
}

impl std::fmt::Debug for OpenAiRequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiRequestBuilder")
            .field("api_key", &"***")
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiRequestBuilder {
    pub fn new(
        api_key: impl Into<String>,
        organization: Option<String>,
        enable_structured_outputs: bool,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            organization,
            enable_structured_outputs,
        }
    }

    fn build_response_format(&self, rf: &ResponseFormat, mode: RfMode) -> Value {
        if mode == RfMode::JsonObject {
            return json!({"type": "json_object"});
        }
        match rf {
            ResponseFormat::JsonObject => json!({"type": "json_object"}),
            ResponseFormat::JsonSchema { name, schema, .. } => json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "strict": true,
                    "schema": schema,
                },
            }),
        }
    }
}

impl ProviderRequestBuilder for OpenAiRequestBuilder {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self) -> &'static str {
        OPENAI_CHAT_ENDPOINT
    }

    fn build_headers(&self, _use_structured: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Authorization".into(), format!("Bearer {}", self.api_key)),
            ("Content-Type".into(), "application/json".into()),
        ];
        if let Some(org) = &self.organization {
            headers.push(("OpenAI-Organization".into(), org.clone()));
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

        if let (Some(rf), Some(mode)) = (response_format, rf_mode) {
            if self.enable_structured_outputs {
                body.insert("response_format".into(), self.build_response_format(rf, mode));
            }
        }

        Value::Object(body)
    }

    fn redact_headers(&self, headers: &[(String, String)]) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.clone(), "Bearer [REDACTED]".to_string())
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

    fn builder() -> OpenAiRequestBuilder {
        OpenAiRequestBuilder::new("sk-test", Some("org-abc".into()), true)
    }

    #[test]
    fn test_headers_with_org() {
        let map: BTreeMap<_, _> = builder().build_headers(false).into_iter().collect();
        assert_eq!(map["Authorization"], "Bearer sk-test");
        assert_eq!(map["OpenAI-Organization"], "org-abc");
    }

    #[test]
    fn test_headers_without_org() {
        let builder = OpenAiRequestBuilder::new("sk-test", None, true);
        let map: BTreeMap<_, _> = builder.build_headers(false).into_iter().collect();
        assert!(!map.contains_key("OpenAI-Organization"));
    }

    #[test]
    fn test_json_schema_forces_strict() {
        let rf = ResponseFormat::JsonSchema {
            name: "sum".into(),
            strict: false,
            schema: json!({"type": "object"}),
        };
        let request = ChatRequest::new(vec![Message::user("hi")]);
        let body = builder().build_request_body(
            "gpt-4o-mini",
            &request.messages,
            &request,
            Some(&rf),
            Some(RfMode::JsonSchema),
        );
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn test_json_object_mode() {
        let rf = ResponseFormat::JsonObject;
        let request = ChatRequest::new(vec![Message::user("hi")]);
        let body = builder().build_request_body(
            "gpt-4o-mini",
            &request.messages,
            &request,
            Some(&rf),
            Some(RfMode::JsonObject),
        );
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
    }

    #[test]
    fn test_pricing_exact_and_family() {
        let (input, output) = price_per_1k("gpt-4o-mini").unwrap();
        assert!((input - 0.00015).abs() < 1e-9);
        assert!((output - 0.0006).abs() < 1e-9);

        // Versioned id resolves through the family prefix.
        let (input, _) = price_per_1k("gpt-4o-mini-2025-01-01").unwrap();
        assert!((input - 0.00015).abs() < 1e-9);

        assert!(price_per_1k("unknown-model").is_none());
    }

    #[test]
    fn test_redaction() {
        let b = builder();
        let redacted = b.redact_headers(&b.build_headers(false));
        assert_eq!(redacted["Authorization"], "Bearer [REDACTED]");
    }
}
