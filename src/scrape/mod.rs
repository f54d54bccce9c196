//! Retrying, size-bounded client for the content-extraction API.
//!
//! The scrape loop mutates its options between attempts (mobile/desktop
//! toggle, PDF parser hint) to work around rendering-mode-specific upstream
//! failures, honors rate-limit hints, and classifies embedded body errors
//! that arrive with 2xx statuses.

pub mod client;
pub mod options;
pub mod parsing;

pub use client::{ScrapeClient, ScrapeHttp, ScrapeHttpResponse};
pub use options::ScrapeOptionsBuilder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scrape endpoint path, reported on results.
pub const SCRAPE_ENDPOINT: &str = "/v2/scrape";
/// Search endpoint path.
pub const SEARCH_ENDPOINT: &str = "/v2/search";
/// Crawl endpoint path.
pub const CRAWL_ENDPOINT: &str = "/v2/crawl";
/// Batch scrape endpoint path.
pub const BATCH_SCRAPE_ENDPOINT: &str = "/v2/batch/scrape";
/// Extract endpoint path.
pub const EXTRACT_ENDPOINT: &str = "/v2/extract";

/// High-level outcome of a scrape or search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Ok,
    Error,
}

/// Normalized representation of a `/v2/scrape` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub status: ScrapeStatus,
    pub http_status: Option<u16>,
    pub content_markdown: Option<String>,
    pub content_html: Option<String>,
    pub structured_json: Option<Value>,
    pub metadata_json: Option<Value>,
    pub links_json: Option<Value>,
    /// Whether the service itself reported success.
    pub response_success: Option<bool>,
    pub response_error_code: Option<String>,
    pub response_error_message: Option<String>,
    pub response_details: Option<Value>,
    pub latency_ms: Option<u64>,
    pub error_text: Option<String>,
    pub source_url: Option<String>,
    pub endpoint: String,
    /// Options payload of the attempt that produced this result.
    pub options_json: Option<Value>,
    pub correlation_id: Option<String>,
}

impl ScrapeResult {
    /// True when either the client or the service reports success.
    pub fn success(&self) -> bool {
        self.status == ScrapeStatus::Ok || self.response_success == Some(true)
    }
}

/// One normalized `/v2/search` result item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<String>,
}

/// Result container for search queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub status: ScrapeStatus,
    pub http_status: Option<u16>,
    pub results: Vec<SearchItem>,
    pub total_results: Option<u64>,
    pub latency_ms: Option<u64>,
    pub error_text: Option<String>,
    pub correlation_id: Option<String>,
}
