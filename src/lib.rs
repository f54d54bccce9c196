//! # Digest Pipeline
//!
//! The external-service orchestration core of an article/video
//! summarization service. It sits between the ingestion triggers (chat
//! bot, mobile API) and the persistence layer, and owns four subsystems:
//!
//! - **[`llm`]** — a provider-agnostic chat client (aggregator, OpenAI,
//!   Anthropic) with fallback-model chains, jittered retry, a circuit
//!   breaker, and multi-stage structured-output negotiation
//!   (`json_schema` → `json_object` → unstructured).
//! - **[`scrape`]** — a retrying, size-bounded client for a
//!   content-extraction API with per-attempt option mutation and rich
//!   error classification.
//! - **[`youtube`]** — a three-stage acquisition pipeline (transcript API
//!   → video download → subtitle fallback) with per-URL dedupe locking,
//!   a storage budget, and partial-file cleanup on every exit path.
//! - **[`sync`]** — a cached, paginated, retry-wrapped bidirectional
//!   reconciler between the local summary store and an external bookmark
//!   service.
//!
//! Shared infrastructure: a keyed HTTP client pool ([`http_pool`]), a
//! circuit breaker ([`breaker`]), jittered backoff ([`backoff`]) with a
//! transient-error classifier ([`retry`]), a response-size guard
//! ([`size_guard`]), bounded JSON parsing ([`json_guard`]), and URL
//! normalization/hashing ([`url_norm`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use digest_pipeline::config::{LlmProvider, OpenRouterConfig, RuntimeConfig};
//! use digest_pipeline::llm::factory::LlmFactoryConfig;
//! use digest_pipeline::llm::{build_llm_client, ChatRequest, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LlmFactoryConfig {
//!         openrouter: OpenRouterConfig {
//!             api_key: std::env::var("OPENROUTER_API_KEY")?,
//!             model: "openai/gpt-4o-mini".into(),
//!             fallback_models: vec!["google/gemini-2.5-pro".into()],
//!             ..OpenRouterConfig::default()
//!         },
//!         ..LlmFactoryConfig::default()
//!     };
//!     let client = build_llm_client(
//!         LlmProvider::OpenRouter,
//!         &config,
//!         &RuntimeConfig::default(),
//!         None,
//!     )?;
//!
//!     let result = client
//!         .chat(ChatRequest::new(vec![
//!             Message::system("Summarize the article."),
//!             Message::user("…article text…"),
//!         ]))
//!         .await?;
//!     println!("{:?}", result.response_text);
//!     Ok(())
//! }
//! ```
//!
//! The persistence layer is abstracted behind traits
//! ([`youtube::VideoRepository`], [`sync::SyncRepository`]); the core
//! creates entities and hands them off, keeping no long-lived pointers.

pub mod backoff;
pub mod breaker;
pub mod config;
pub mod error;
pub mod http_pool;
pub mod json_guard;
pub mod llm;
pub mod retry;
pub mod scrape;
pub mod size_guard;
pub mod sync;
pub mod url_norm;
pub mod youtube;

pub use backoff::BackoffConfig;
pub use breaker::{CircuitBreaker, CircuitState};
pub use error::{CoreError, Result};
pub use llm::{build_llm_client, ChatRequest, LlmCallResult, LlmChatClient, Message, Role};
pub use scrape::{ScrapeClient, ScrapeResult, SearchResult};
pub use sync::{FullSyncResult, SyncDirection, SyncResult, SyncService};
pub use youtube::{VideoExtraction, VideoMetadata, VideoPipeline};
