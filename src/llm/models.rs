//! Normalized request/response types for the LLM layer.
//!
//! Providers translate between these types and their wire shapes; the
//! orchestrator and every caller above it only see these.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Abstract structured-output request, rewritten by each provider into its
/// native shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Generic "reply with a JSON object" request.
    JsonObject,
    /// Strict schema-constrained output.
    JsonSchema {
        name: String,
        strict: bool,
        schema: Value,
    },
}

/// Structured-output mode actually in effect for an attempt. The downgrade
/// ladder walks `JsonSchema` → `JsonObject` → unstructured (`None` at the
/// call sites).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfMode {
    JsonSchema,
    JsonObject,
}

impl RfMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RfMode::JsonSchema => "json_schema",
            RfMode::JsonObject => "json_object",
        }
    }

    /// One step down the ladder; `None` means drop structured output.
    pub fn downgrade(&self) -> Option<RfMode> {
        match self {
            RfMode::JsonSchema => Some(RfMode::JsonObject),
            RfMode::JsonObject => None,
        }
    }
}

/// Input to the LLM layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Ordered conversation; validated non-empty and ≤ 50 entries.
    pub messages: Vec<Message>,
    /// Sampling temperature in `[0, 2]`.
    pub temperature: f64,
    /// Optional completion cap in `(0, 100000]`.
    pub max_tokens: Option<u32>,
    /// Nucleus sampling in `[0, 1]`.
    pub top_p: Option<f64>,
    pub stream: bool,
    /// Internal request id for tracing and persistence (positive).
    pub request_id: Option<i64>,
    pub response_format: Option<ResponseFormat>,
    pub model_override: Option<String>,
}

impl ChatRequest {
    /// A request with the given messages and defaults everywhere else.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: 0.2,
            max_tokens: None,
            top_p: None,
            stream: false,
            request_id: None,
            response_format: None,
            model_override: None,
        }
    }
}

/// Canonical error context surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub status_code: Option<u16>,
    pub message: String,
    pub api_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Prompt-cache metrics reported by some providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_discount: Option<f64>,
    pub cache_hit: bool,
}

/// Call outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ok,
    Error,
}

/// Outcome of one call to the LLM layer.
///
/// Invariant: `status == Ok` implies `response_text` or `response_json` is
/// non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallResult {
    pub status: CallStatus,
    /// Model the provider reports having used.
    pub model: Option<String>,
    pub response_text: Option<String>,
    /// Full structured response body when one was received.
    pub response_json: Option<Value>,
    pub tokens_prompt: Option<u64>,
    pub tokens_completion: Option<u64>,
    pub tokens_total: Option<u64>,
    /// Estimated or provider-reported cost; `None` when unknown.
    pub cost_usd: Option<f64>,
    pub latency_ms: Option<u64>,
    pub error_text: Option<String>,
    pub error_context: Option<ErrorContext>,
    /// Request headers with authorization redacted.
    pub request_headers: BTreeMap<String, String>,
    /// Request messages truncated for safe logging.
    pub request_messages: Vec<Message>,
    pub endpoint: String,
    pub structured_output_used: bool,
    pub structured_output_mode: Option<RfMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_discount: Option<f64>,
}

impl LlmCallResult {
    /// Skeleton error result; callers fill in what they know.
    pub fn error(endpoint: &str, error_text: impl Into<String>) -> Self {
        Self {
            status: CallStatus::Error,
            model: None,
            response_text: None,
            response_json: None,
            tokens_prompt: None,
            tokens_completion: None,
            tokens_total: None,
            cost_usd: None,
            latency_ms: None,
            error_text: Some(error_text.into()),
            error_context: None,
            request_headers: BTreeMap::new(),
            request_messages: Vec::new(),
            endpoint: endpoint.to_string(),
            structured_output_used: false,
            structured_output_mode: None,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            cache_discount: None,
        }
    }
}
