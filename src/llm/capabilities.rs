//! Model capability detection and caching for the aggregator provider.
//!
//! The aggregator's model catalogue advertises which models accept
//! structured outputs; the orchestrator consults a TTL-cached copy before
//! sending a schema-constrained request to a model that would reject it.

use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Patterns mapping model ids to their upstream provider.
const PROVIDER_PATTERNS: &[(&str, &[&str])] = &[
    ("anthropic", &["anthropic/", "claude-"]),
    ("google", &["google/", "gemini-"]),
    ("openai", &["openai/", "gpt-"]),
    ("deepseek", &["deepseek/"]),
    ("qwen", &["qwen/"]),
    ("minimax", &["minimax/"]),
    ("moonshotai", &["moonshotai/", "kimi-"]),
    ("meta", &["meta-llama/", "llama-"]),
    ("mistral", &["mistral/", "mistral-"]),
    ("cohere", &["cohere/"]),
];

/// Providers that require explicit cache_control breakpoints.
const EXPLICIT_CACHING_PROVIDERS: &[&str] = &["anthropic", "google"];

/// Providers with automatic server-side prompt caching.
const AUTOMATIC_CACHING_PROVIDERS: &[&str] =
    &["openai", "deepseek", "qwen", "moonshotai", "minimax"];

/// Detect the upstream provider for a model id, or "unknown".
pub fn detect_provider(model: &str) -> &'static str {
    let model_lower = model.to_lowercase();
    for (provider, patterns) in PROVIDER_PATTERNS {
        if patterns.iter().any(|p| model_lower.contains(p)) {
            return provider;
        }
    }
    "unknown"
}

/// Whether the model's provider needs explicit cache_control breakpoints.
pub fn supports_explicit_caching(model: &str) -> bool {
    EXPLICIT_CACHING_PROVIDERS.contains(&detect_provider(model))
}

/// Whether the model's provider caches prompts automatically.
pub fn supports_automatic_caching(model: &str) -> bool {
    AUTOMATIC_CACHING_PROVIDERS.contains(&detect_provider(model))
}

/// Models known to support structured outputs, used when the catalogue
/// cannot be fetched.
fn known_structured_models() -> HashSet<String> {
    [
        "google/gemini-2.5-pro",
        "deepseek/deepseek-v3.2:free",
        "deepseek/deepseek-v3.2",
        "deepseek/deepseek-r1:free",
        "deepseek/deepseek-r1",
        "moonshotai/kimi-k2:free",
        "moonshotai/kimi-k2",
        "moonshotai/kimi-k2.5",
        "qwen/qwen3-max",
        "qwen/qwen3-235b-a22b-instruct-2507",
        "qwen/qwen3-coder:free",
        "minimax/minimax-m2",
        "minimax/minimax-m2:free",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Default)]
struct CapabilityCache {
    structured_models: Option<HashSet<String>>,
    last_load: Option<Instant>,
}

/// TTL-cached structured-output capability index.
pub struct ModelCapabilities {
    client: Client,
    base_url: String,
    api_key: String,
    ttl: Duration,
    cache: Mutex<CapabilityCache>,
}

impl std::fmt::Debug for ModelCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCapabilities")
            .field("base_url", &self.base_url)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ModelCapabilities {
    /// Capability cache against `base_url` (e.g. `https://openrouter.ai/api/v1`).
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            ttl: Duration::from_secs(3600),
            cache: Mutex::new(CapabilityCache::default()),
        }
    }

    /// Override the cache TTL (default 1 hour).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether a model is reasoning-heavy (DeepSeek R1, o1, thinking
    /// variants); such primaries get safe structured fallbacks appended.
    pub fn is_reasoning_heavy_model(model: &str) -> bool {
        let model_lower = model.to_lowercase();
        ["o1", "reasoning", "-r1", "thinking", "deepseek-r1"]
            .iter()
            .any(|needle| model_lower.contains(needle))
    }

    /// Models known to honor structured outputs reliably, appended behind
    /// the caller's fallback chain when the primary is reasoning-heavy.
    pub fn safe_structured_fallbacks() -> Vec<String> {
        vec![
            "deepseek/deepseek-v3.2:free".to_string(),
            "deepseek/deepseek-r1:free".to_string(),
            "qwen/qwen3-max".to_string(),
            "google/gemini-2.5-pro".to_string(),
        ]
    }

    /// Check a model against the cached capability set, falling back to the
    /// built-in known list when nothing has been fetched yet.
    pub async fn supports_structured_outputs(&self, model: &str) -> bool {
        let cache = self.cache.lock().await;
        match &cache.structured_models {
            Some(models) => models.contains(model),
            None => known_structured_models().contains(model),
        }
    }

    /// Fetch and cache the structured-capable model set; no-op while the
    /// cache is fresh. Fetch failures fall back to the known list.
    pub async fn ensure_loaded(&self) {
        let mut cache = self.cache.lock().await;
        if let (Some(_), Some(loaded)) = (&cache.structured_models, cache.last_load) {
            if loaded.elapsed() < self.ttl {
                return;
            }
        }

        match self.fetch_structured_models().await {
            Ok(models) if !models.is_empty() => {
                tracing::debug!(models_count = models.len(), "structured_outputs_capabilities_loaded");
                cache.structured_models = Some(models);
            }
            Ok(_) | Err(_) => {
                if cache.structured_models.is_none() {
                    let fallback = known_structured_models();
                    tracing::warn!(
                        models_count = fallback.len(),
                        "openrouter_capabilities_probe_failed_using_fallback"
                    );
                    cache.structured_models = Some(fallback);
                }
            }
        }
        cache.last_load = Some(Instant::now());
    }

    /// Inject a capability set directly (used by tests and warm starts).
    pub async fn prime(&self, models: HashSet<String>) {
        let mut cache = self.cache.lock().await;
        cache.structured_models = Some(models);
        cache.last_load = Some(Instant::now());
    }

    /// Build the model trial order: primary, then fallbacks (minus the
    /// primary), then — when structured output is requested and the primary
    /// is reasoning-heavy — the safe structured fallbacks, de-duplicated.
    pub fn build_model_fallback_list(
        primary: &str,
        fallbacks: &[String],
        wants_structured: bool,
    ) -> Vec<String> {
        let mut models = vec![primary.to_string()];
        for model in fallbacks {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        if wants_structured && Self::is_reasoning_heavy_model(primary) {
            for model in Self::safe_structured_fallbacks() {
                if !models.contains(&model) {
                    models.push(model);
                }
            }
        }
        models
    }

    async fn fetch_structured_models(&self) -> crate::error::Result<HashSet<String>> {
        let url = format!(
            "{}/models?supported_parameters=structured_outputs",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;

        let data = payload
            .get("data")
            .or_else(|| payload.get("models"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut models = HashSet::new();
        for item in data {
            let id = item
                .get("id")
                .or_else(|| item.get("name"))
                .or_else(|| item.get("model"))
                .and_then(Value::as_str);
            if let Some(id) = id {
                if !id.is_empty() {
                    models.insert(id.to_string());
                }
            }
        }
        Ok(models)
    }
}
