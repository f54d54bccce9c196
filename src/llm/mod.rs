//! Provider-agnostic LLM chat layer.
//!
//! ## Architecture
//!
//! ```text
//! ChatRequest ──► LlmChatClient::chat() ──► LlmCallResult
//!                       │
//!          ┌────────────┼──────────────┐
//!   ProviderRequestBuilder      ChatTransport
//!   (openrouter / openai /      (pooled reqwest client,
//!    anthropic wire shapes)      scripted fake in tests)
//! ```
//!
//! The orchestrator owns the model × attempt loop: fallback chains, jittered
//! retry, the structured-output downgrade ladder, truncation recovery, and
//! circuit-breaker integration. Builders translate one abstract request into
//! provider wire shapes; the transport seam keeps the loop testable without
//! a network.

pub mod anthropic;
pub mod capabilities;
pub mod factory;
pub mod models;
pub mod openai;
pub mod openrouter;
pub mod orchestrator;
pub mod response;
pub mod validate;

pub use anthropic::AnthropicRequestBuilder;
pub use capabilities::ModelCapabilities;
pub use factory::build_llm_client;
pub use models::{
    CacheMetrics, CallStatus, ChatRequest, ErrorContext, LlmCallResult, Message, ResponseFormat,
    RfMode, Role,
};
pub use openai::OpenAiRequestBuilder;
pub use openrouter::OpenRouterRequestBuilder;
pub use orchestrator::{ChatClientOptions, LlmChatClient};
pub use response::ResponseProcessor;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// One provider's request-shaping contract.
///
/// Implementations are stateless translators: the same abstract
/// [`ChatRequest`](models::ChatRequest) plus a structured-output mode in,
/// provider-native headers and body out.
pub trait ProviderRequestBuilder: Send + Sync {
    /// Provider tag for logging ("openrouter" | "openai" | "anthropic").
    fn provider_name(&self) -> &'static str;

    /// Chat endpoint path, reported on results.
    fn endpoint(&self) -> &'static str;

    /// HTTP headers for a request. `use_structured` lets providers attach
    /// opt-in headers (the Anthropic beta header).
    fn build_headers(&self, use_structured: bool) -> Vec<(String, String)>;

    /// Provider-native request body.
    fn build_request_body(
        &self,
        model: &str,
        messages: &[models::Message],
        request: &models::ChatRequest,
        response_format: Option<&models::ResponseFormat>,
        rf_mode: Option<models::RfMode>,
    ) -> Value;

    /// Headers with credentials redacted, for logging and result metadata.
    fn redact_headers(&self, headers: &[(String, String)]) -> BTreeMap<String, String>;

    /// Content-compression transform to attach, when the conversation
    /// exceeds the model family's threshold. Aggregator-only.
    fn compression_transform(
        &self,
        _messages: &[models::Message],
        _model: &str,
    ) -> Option<&'static str> {
        None
    }

    /// `(input_per_1k, output_per_1k)` pricing for cost estimation.
    fn price_per_1k(&self, _model: &str) -> Option<(f64, f64)> {
        None
    }
}

/// A chat HTTP response, reduced to what the orchestrator interprets.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, when present.
    pub retry_after: Option<Duration>,
    /// `Content-Length` header, when present.
    pub content_length: Option<u64>,
    pub body: String,
}

/// Transport seam between the orchestrator and the wire.
///
/// The production implementation posts through a pooled `reqwest` client;
/// tests substitute a scripted fake.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_chat(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<TransportResponse>;
}

/// Pooled-client transport against a provider base URL.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn post_chat(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<TransportResponse> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(&url).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let content_length = response.content_length();
        let body = response.text().await?;

        Ok(TransportResponse {
            status,
            retry_after,
            content_length,
            body,
        })
    }
}
