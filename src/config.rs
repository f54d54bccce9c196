//! Configuration for the orchestration core.
//!
//! The deployment layer reads environment variables and hands the core
//! these structs; the core validates ranges at construction and rejects
//! bad values with a context-carrying configuration error.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which LLM provider backs the summarization path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenRouter,
    OpenAi,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }

    /// Parse a provider tag ("openrouter" | "openai" | "anthropic").
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_lowercase().as_str() {
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(CoreError::config(
                "invalid LLM provider (must be one of: anthropic, openai, openrouter)",
                "llm_provider",
                other,
            )),
        }
    }
}

/// Shared runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-request timeout in seconds for LLM and scrape calls.
    pub request_timeout_sec: u64,
    /// Log full request/response payloads at debug level.
    pub debug_payloads: bool,
    /// Cap on concurrent high-level orchestration calls (1..=100).
    pub max_concurrent_calls: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout_sec: 60,
            debug_payloads: false,
            max_concurrent_calls: 4,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_sec == 0 || self.request_timeout_sec > 300 {
            return Err(CoreError::config(
                "request timeout must be in 1..=300 seconds",
                "request_timeout_sec",
                self.request_timeout_sec,
            ));
        }
        if self.max_concurrent_calls == 0 || self.max_concurrent_calls > 100 {
            return Err(CoreError::config(
                "max concurrent calls must be in 1..=100",
                "max_concurrent_calls",
                self.max_concurrent_calls,
            ));
        }
        Ok(())
    }
}

/// Aggregator provider ("R") configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
    /// Ordered provider allowlist forwarded as routing preferences.
    pub provider_order: Vec<String>,
    pub enable_structured_outputs: bool,
    /// Add known-good structured models behind the fallback chain when the
    /// primary is a reasoning-heavy model.
    pub auto_fallback_structured: bool,
    /// Report estimated cost on results.
    pub enable_stats: bool,
    pub max_response_size_mb: u64,
    pub max_retries: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            fallback_models: Vec::new(),
            http_referer: None,
            x_title: None,
            provider_order: Vec::new(),
            enable_structured_outputs: true,
            auto_fallback_structured: true,
            enable_stats: true,
            max_response_size_mb: 10,
            max_retries: 3,
        }
    }
}

/// Direct provider ("O") configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub organization: Option<String>,
    pub enable_structured_outputs: bool,
    pub max_retries: u32,
}

/// Direct provider ("A") configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub enable_structured_outputs: bool,
    pub max_retries: u32,
}

/// Content-extraction service configuration; ranges match the construction
/// validation of the scrape client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub api_key: String,
    pub timeout_sec: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_connections: usize,
    pub max_keepalive_connections: usize,
    pub keepalive_expiry_sec: u64,
    pub credit_warning_threshold: u64,
    pub credit_critical_threshold: u64,
    pub max_response_size_mb: u64,
    pub max_age_seconds: u64,
    pub remove_base64_images: bool,
    pub block_ads: bool,
    pub skip_tls_verification: bool,
    pub include_markdown_format: bool,
    pub include_html_format: bool,
    pub include_links_format: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout_sec: 60,
            max_retries: 3,
            backoff_base_ms: 500,
            max_connections: 10,
            max_keepalive_connections: 5,
            keepalive_expiry_sec: 30,
            credit_warning_threshold: 1000,
            credit_critical_threshold: 100,
            max_response_size_mb: 50,
            max_age_seconds: 172_800,
            remove_base64_images: true,
            block_ads: true,
            skip_tls_verification: true,
            include_markdown_format: true,
            include_html_format: true,
            include_links_format: false,
        }
    }
}

impl ScrapeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(CoreError::config("api_key is required", "api_key", "<empty>"));
        }
        if !self.api_key.starts_with("fc-") {
            return Err(CoreError::config(
                "api_key must start with 'fc-'",
                "api_key",
                "<redacted>",
            ));
        }
        if self.timeout_sec == 0 || self.timeout_sec > 300 {
            return Err(CoreError::config(
                "timeout must be in 1..=300 seconds",
                "timeout_sec",
                self.timeout_sec,
            ));
        }
        if self.max_retries > 10 {
            return Err(CoreError::config(
                "max_retries must be in 0..=10",
                "max_retries",
                self.max_retries,
            ));
        }
        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(CoreError::config(
                "max_connections must be in 1..=100",
                "max_connections",
                self.max_connections,
            ));
        }
        if self.max_keepalive_connections == 0 || self.max_keepalive_connections > 50 {
            return Err(CoreError::config(
                "max_keepalive_connections must be in 1..=50",
                "max_keepalive_connections",
                self.max_keepalive_connections,
            ));
        }
        if self.keepalive_expiry_sec == 0 || self.keepalive_expiry_sec > 300 {
            return Err(CoreError::config(
                "keepalive_expiry must be in 1..=300 seconds",
                "keepalive_expiry_sec",
                self.keepalive_expiry_sec,
            ));
        }
        if self.credit_critical_threshold > self.credit_warning_threshold {
            return Err(CoreError::config(
                "critical credit threshold must not exceed the warning threshold",
                "credit_critical_threshold",
                self.credit_critical_threshold,
            ));
        }
        if self.max_response_size_mb == 0 || self.max_response_size_mb > 1024 {
            return Err(CoreError::config(
                "max_response_size must be in 1..=1024 MB",
                "max_response_size_mb",
                self.max_response_size_mb,
            ));
        }
        Ok(())
    }
}

/// YouTube acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    /// Root directory for downloaded video files.
    pub storage_path: PathBuf,
    pub max_storage_gb: u64,
    pub auto_cleanup_enabled: bool,
    /// Files older than this many days are cleanup candidates.
    pub cleanup_after_days: u32,
    /// Highest video quality to select (e.g. "1080p").
    pub preferred_quality: String,
    /// Language preference order for transcripts and subtitles.
    pub subtitle_languages: Vec<String>,
    pub max_video_size_mb: u64,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./videos"),
            max_storage_gb: 20,
            auto_cleanup_enabled: true,
            cleanup_after_days: 30,
            preferred_quality: "1080p".to_string(),
            subtitle_languages: vec!["en".to_string()],
            max_video_size_mb: 2048,
        }
    }
}

impl YouTubeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_storage_gb == 0 {
            return Err(CoreError::config(
                "max storage must be positive",
                "max_storage_gb",
                self.max_storage_gb,
            ));
        }
        if self.subtitle_languages.is_empty() {
            return Err(CoreError::config(
                "at least one subtitle language is required",
                "subtitle_languages",
                "[]",
            ));
        }
        Ok(())
    }
}

/// Bookmark sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_key: String,
    /// Tag attached to every bookmark the sync creates or updates.
    pub sync_tag: String,
    /// Tag marking a bookmark as read.
    pub read_tag: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            sync_tag: "bsr-synced".to_string(),
            read_tag: "bsr-read".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(CoreError::config("api_url is required", "api_url", "<empty>"));
        }
        if self.api_key.trim().is_empty() {
            return Err(CoreError::config("api_key is required", "api_key", "<empty>"));
        }
        Ok(())
    }
}
