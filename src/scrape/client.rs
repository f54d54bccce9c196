//! The scrape/search client.

use crate::backoff::BackoffConfig;
use crate::config::ScrapeConfig;
use crate::error::{CoreError, Result};
use crate::http_pool::{self, ClientKey, PoolSettings};
use crate::scrape::options::ScrapeOptionsBuilder;
use crate::scrape::parsing::{
    extract_error_message, extract_result_items, extract_total_results, normalize_search_item,
};
use crate::scrape::{
    ScrapeResult, ScrapeStatus, SearchItem, SearchResult, BATCH_SCRAPE_ENDPOINT, CRAWL_ENDPOINT,
    EXTRACT_ENDPOINT, SCRAPE_ENDPOINT, SEARCH_ENDPOINT,
};
use crate::size_guard::validate_response_size;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default API host.
pub const SCRAPE_BASE_URL: &str = "https://api.firecrawl.dev";

/// Fallback rate-limit delay when the body carries no hint, in seconds.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// An HTTP response reduced to what the scrape loop interprets.
#[derive(Debug, Clone)]
pub struct ScrapeHttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: String,
}

/// HTTP seam for the scrape client; tests script it.
#[async_trait]
pub trait ScrapeHttp: Send + Sync {
    async fn post(&self, path: &str, api_key: &str, body: &Value) -> Result<ScrapeHttpResponse>;
    async fn get(&self, path: &str, api_key: &str) -> Result<ScrapeHttpResponse>;
}

struct ReqwestScrapeHttp {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl ScrapeHttp for ReqwestScrapeHttp {
    async fn post(&self, path: &str, api_key: &str, body: &Value) -> Result<ScrapeHttpResponse> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response.text().await?;
        Ok(ScrapeHttpResponse {
            status,
            content_length,
            body,
        })
    }

    async fn get(&self, path: &str, api_key: &str) -> Result<ScrapeHttpResponse> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response.text().await?;
        Ok(ScrapeHttpResponse {
            status,
            content_length,
            body,
        })
    }
}

/// Async client for the content-extraction API (scrape, search, crawl,
/// batch, extract).
pub struct ScrapeClient {
    http: Arc<dyn ScrapeHttp>,
    api_key: String,
    options: ScrapeOptionsBuilder,
    max_retries: u32,
    backoff: BackoffConfig,
    max_response_size_bytes: u64,
    debug_payloads: bool,
}

impl std::fmt::Debug for ScrapeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeClient")
            .field("max_retries", &self.max_retries)
            .field("max_response_size_bytes", &self.max_response_size_bytes)
            .finish()
    }
}

impl ScrapeClient {
    /// Build a client from config, validating every range, with a pooled
    /// HTTP transport.
    pub fn new(config: &ScrapeConfig, debug_payloads: bool) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::from_secs(config.timeout_sec);
        let key = ClientKey::new(
            SCRAPE_BASE_URL,
            timeout,
            config.max_connections,
            Some(&config.api_key),
        );
        let settings = PoolSettings {
            timeout,
            max_idle_per_host: config.max_keepalive_connections,
            idle_timeout: Duration::from_secs(config.keepalive_expiry_sec),
            ..PoolSettings::default()
        };
        let client = http_pool::acquire(&key, &settings)?;
        Ok(Self::with_http(
            Arc::new(ReqwestScrapeHttp {
                client,
                base_url: SCRAPE_BASE_URL.to_string(),
            }),
            config,
            debug_payloads,
        ))
    }

    /// Build against an arbitrary transport (tests, alternate hosts).
    pub fn with_http(http: Arc<dyn ScrapeHttp>, config: &ScrapeConfig, debug_payloads: bool) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            options: ScrapeOptionsBuilder::from_config(config),
            max_retries: config.max_retries,
            backoff: BackoffConfig::with_base(Duration::from_millis(config.backoff_base_ms)),
            max_response_size_bytes: config.max_response_size_mb * 1024 * 1024,
            debug_payloads,
        }
    }

    /// Scrape a URL to markdown/HTML with retry and option mutation.
    ///
    /// The mobile rendering flag toggles on 5xx and transport failures to
    /// work around rendering-mode-specific upstream errors; the PDF parser
    /// hint follows the URL and stays applied on every attempt.
    pub async fn scrape_markdown(
        &self,
        url: &str,
        mobile: bool,
        request_id: Option<i64>,
    ) -> ScrapeResult {
        if let Err(e) = self.validate_scrape_inputs(url, request_id) {
            return self.error_result(None, None, e.to_string(), url, Value::Null);
        }

        let pdf_hint = {
            let lower = url.to_lowercase();
            lower.ends_with(".pdf") || lower.contains("pdf")
        };
        let mut cur_mobile = mobile;

        let mut last_error: Option<String> = None;
        let mut last_latency: Option<u64> = None;
        let mut last_data: Option<Value> = None;

        for attempt in 0..=self.max_retries {
            let options_snapshot = self.options.options_snapshot(cur_mobile, pdf_hint);
            let mut body = json!({
                "url": url,
                "formats": self.options.build_formats(),
            });
            for (key, value) in self.options.base_options(cur_mobile, pdf_hint) {
                body[key] = value;
            }

            tracing::debug!(
                attempt,
                url,
                mobile = cur_mobile,
                pdf = pdf_hint,
                request_id,
                "scrape_request"
            );
            if self.debug_payloads {
                tracing::debug!(body = %body, "scrape_request_payload");
            }

            let started = Instant::now();
            let response = match self.http.post(SCRAPE_ENDPOINT, &self.api_key, &body).await {
                Ok(response) => response,
                Err(e) => {
                    let latency = started.elapsed().as_millis() as u64;
                    last_error = Some(e.to_string());
                    last_latency = Some(latency);
                    tracing::warn!(error = %e, attempt, "scrape_transport_error");
                    if attempt < self.max_retries {
                        cur_mobile = !cur_mobile;
                        crate::backoff::sleep_backoff(attempt, &self.backoff).await;
                        continue;
                    }
                    break;
                }
            };
            let latency = started.elapsed().as_millis() as u64;

            if let Err(size_err) = validate_response_size(
                response.content_length,
                Some(response.body.len() as u64),
                self.max_response_size_bytes,
                "Scrape",
            ) {
                last_error = Some(size_err.to_string());
                last_latency = Some(latency);
                tracing::error!(error = %size_err, url, "scrape_response_too_large");
                if attempt < self.max_retries {
                    crate::backoff::sleep_backoff(attempt, &self.backoff).await;
                    continue;
                }
                return self.error_result(
                    Some(response.status),
                    Some(latency),
                    last_error.unwrap(),
                    url,
                    options_snapshot,
                );
            }

            let data: Value = match serde_json::from_str(&response.body) {
                Ok(data) => data,
                Err(e) => {
                    last_error = Some(format!("invalid_json: {e}"));
                    last_latency = Some(latency);
                    tracing::error!(error = %e, status = response.status, "scrape_invalid_json");
                    if attempt < self.max_retries {
                        crate::backoff::sleep_backoff(attempt, &self.backoff).await;
                        continue;
                    }
                    return self.error_result(
                        Some(response.status),
                        Some(latency),
                        last_error.unwrap(),
                        url,
                        options_snapshot,
                    );
                }
            };
            last_data = Some(data.clone());
            last_latency = Some(latency);

            if response.status < 400 {
                return self.handle_success_body(data, latency, url, options_snapshot, request_id);
            }

            if response.status == 429 {
                if attempt < self.max_retries {
                    let retry_after = data
                        .get("retry_after")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    let backoff = self.backoff.base.as_secs_f64() * 2f64.powi(attempt as i32);
                    let delay = Duration::from_secs_f64((retry_after as f64).min(backoff.max(0.0)));
                    tracing::warn!(
                        status = response.status,
                        retry_after,
                        attempt,
                        "scrape_rate_limit"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            } else if response.status >= 500 && attempt < self.max_retries {
                tracing::warn!(status = response.status, attempt, "scrape_server_error_retrying");
                cur_mobile = !cur_mobile;
                crate::backoff::sleep_backoff(attempt, &self.backoff).await;
                continue;
            }

            // Non-retryable (or exhausted 429): map and return.
            return self.non_retryable_error(data, response.status, latency, url, options_snapshot);
        }

        tracing::error!(
            attempts = self.max_retries + 1,
            error = last_error.as_deref(),
            request_id,
            "scrape_exhausted"
        );
        let mut result = self.error_result(
            None,
            last_latency,
            last_error.unwrap_or_else(|| "all attempts exhausted".into()),
            url,
            self.options.options_snapshot(cur_mobile, pdf_hint),
        );
        if let Some(data) = last_data {
            result.content_markdown = data
                .get("markdown")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        result
    }

    /// Web search with input validation and item normalization.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        request_id: Option<i64>,
    ) -> SearchResult {
        let trimmed = query.trim();
        if trimmed.is_empty() || trimmed.len() > 500 {
            return self.search_error(None, None, "query must be 1..=500 characters".into());
        }
        if limit == 0 || limit > 10 {
            return self.search_error(None, None, "limit must be in 1..=10".into());
        }
        if let Some(request_id) = request_id {
            if request_id <= 0 {
                return self.search_error(None, None, "request_id must be positive".into());
            }
        }

        let body = json!({"query": trimmed, "numResults": limit, "page": 1});
        tracing::debug!(query = trimmed, limit, request_id, "scrape_search_request");

        let started = Instant::now();
        let response = match self.http.post(SEARCH_ENDPOINT, &self.api_key, &body).await {
            Ok(response) => response,
            Err(e) => {
                let latency = started.elapsed().as_millis() as u64;
                tracing::error!(error = %e, query = trimmed, "scrape_search_http_error");
                return self.search_error(None, Some(latency), e.to_string());
            }
        };
        let latency = started.elapsed().as_millis() as u64;

        if let Err(size_err) = validate_response_size(
            response.content_length,
            Some(response.body.len() as u64),
            self.max_response_size_bytes,
            "Scrape Search",
        ) {
            return self.search_error(
                None,
                Some(latency),
                format!("Response too large: {size_err}"),
            );
        }

        let data: Value = match serde_json::from_str(&response.body) {
            Ok(data) => data,
            Err(e) => {
                return self.search_error(
                    Some(response.status),
                    Some(latency),
                    format!("invalid_json: {e}"),
                );
            }
        };

        let correlation_id = data.get("cid").and_then(Value::as_str).map(str::to_string);
        let total_results = extract_total_results(&data);
        let raw_error = extract_error_message(&data);

        let mut items: Vec<SearchItem> = Vec::new();
        let mut seen_urls = std::collections::HashSet::new();
        for raw in extract_result_items(&data) {
            if let Some(item) = normalize_search_item(&raw) {
                if seen_urls.insert(item.url.clone()) {
                    items.push(item);
                    if items.len() >= limit {
                        break;
                    }
                }
            }
        }

        let (status, error_text) = if response.status >= 400 || raw_error.is_some() {
            (
                ScrapeStatus::Error,
                Some(raw_error.unwrap_or_else(|| format!("HTTP {}", response.status))),
            )
        } else {
            (ScrapeStatus::Ok, None)
        };

        tracing::debug!(
            status = ?status,
            http_status = response.status,
            results = items.len(),
            latency_ms = latency,
            "scrape_search_response"
        );

        SearchResult {
            status,
            http_status: Some(response.status),
            results: items,
            total_results,
            latency_ms: Some(latency),
            error_text,
            correlation_id,
        }
    }

    /// Start an asynchronous crawl job.
    pub async fn start_crawl(&self, url: &str, options: Option<Value>) -> Result<Value> {
        let mut payload = options.unwrap_or_else(|| json!({}));
        payload["url"] = json!(url);
        if payload.get("formats").is_none() {
            payload["formats"] = json!(self.options.build_formats());
        }
        self.checked_post(CRAWL_ENDPOINT, &payload, "Scrape Crawl").await
    }

    /// Poll a crawl job's status.
    pub async fn get_crawl_status(&self, job_id: &str) -> Result<Value> {
        self.checked_get(&format!("{CRAWL_ENDPOINT}/{job_id}"), "Scrape Crawl").await
    }

    /// Start a crawl and poll until it settles or `timeout` elapses.
    pub async fn crawl(
        &self,
        url: &str,
        options: Option<Value>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Value> {
        let started = self.start_crawl(url, options).await?;
        let job_id = started
            .get("jobId")
            .or_else(|| started.get("job_id"))
            .or_else(|| started.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(job_id) = job_id else {
            return Ok(started);
        };

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let status = self.get_crawl_status(&job_id).await?;
            let state = status
                .get("status")
                .or_else(|| status.get("state"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if matches!(state, "completed" | "success" | "succeeded" | "failed" | "error" | "cancelled")
            {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval.max(Duration::from_millis(100))).await;
        }
        Ok(json!({"status": "timeout", "jobId": job_id}))
    }

    /// Start a batch scrape job.
    pub async fn start_batch_scrape(&self, urls: &[String], options: Option<Value>) -> Result<Value> {
        let mut payload = options.unwrap_or_else(|| json!({}));
        payload["urls"] = json!(urls);
        if payload.get("formats").is_none() {
            payload["formats"] = json!(self.options.build_formats());
        }
        self.checked_post(BATCH_SCRAPE_ENDPOINT, &payload, "Scrape Batch").await
    }

    /// Poll a batch scrape job's status.
    pub async fn get_batch_scrape_status(&self, job_id: &str) -> Result<Value> {
        self.checked_get(&format!("{BATCH_SCRAPE_ENDPOINT}/{job_id}"), "Scrape Batch")
            .await
    }

    /// Structured extraction over one or more URLs.
    pub async fn extract(&self, args: Value) -> Result<Value> {
        let mut payload = args;
        if payload.get("formats").is_none() {
            payload["formats"] = json!(self.options.build_formats());
        }
        self.checked_post(EXTRACT_ENDPOINT, &payload, "Scrape Extract").await
    }

    async fn checked_post(&self, path: &str, payload: &Value, service: &str) -> Result<Value> {
        let response = self.http.post(path, &self.api_key, payload).await?;
        validate_response_size(
            response.content_length,
            Some(response.body.len() as u64),
            self.max_response_size_bytes,
            service,
        )?;
        Ok(serde_json::from_str(&response.body)?)
    }

    async fn checked_get(&self, path: &str, service: &str) -> Result<Value> {
        let response = self.http.get(path, &self.api_key).await?;
        validate_response_size(
            response.content_length,
            Some(response.body.len() as u64),
            self.max_response_size_bytes,
            service,
        )?;
        Ok(serde_json::from_str(&response.body)?)
    }

    fn validate_scrape_inputs(&self, url: &str, request_id: Option<i64>) -> Result<()> {
        if url.trim().is_empty() {
            return Err(CoreError::validation("url is required", "url", "<empty>"));
        }
        if let Some(request_id) = request_id {
            if request_id <= 0 {
                return Err(CoreError::validation(
                    "request_id must be a positive integer",
                    "request_id",
                    request_id,
                ));
            }
        }
        Ok(())
    }

    /// Detect an error reported inside a 2xx body.
    fn detect_error_in_body(data: &Value) -> (bool, Option<String>) {
        if let Some(error) = data.get("error") {
            match error {
                Value::String(s) if !s.trim().is_empty() => {
                    return (true, Some(s.trim().to_string()))
                }
                Value::Object(_) => return (true, extract_error_message(data)),
                _ => {}
            }
        }
        if data.get("success") == Some(&Value::Bool(false)) {
            return (true, extract_error_message(data).or_else(|| Some("service reported failure".into())));
        }
        match data.get("data") {
            Some(Value::Array(items)) => {
                if items.is_empty() {
                    return (true, Some("empty data array".into()));
                }
                let all_errors = items.iter().all(|item| {
                    item.get("error")
                        .map(|e| !e.is_null())
                        .unwrap_or(false)
                });
                if all_errors {
                    return (true, extract_error_message(data));
                }
            }
            _ => {}
        }
        let (markdown, html, _, _) = Self::extract_content_fields(data);
        if markdown.is_none() && html.is_none() && data.get("structured").is_none() {
            return (true, Some("no content in response".into()));
        }
        (false, None)
    }

    /// Pull content fields from wherever this API version nested them:
    /// `data` as object, `data[0]`, or top-level.
    fn extract_content_fields(
        data: &Value,
    ) -> (
        Option<String>,
        Option<String>,
        Option<Value>,
        Option<Value>,
    ) {
        let container = match data.get("data") {
            Some(Value::Object(_)) => data.get("data").unwrap(),
            Some(Value::Array(items)) if !items.is_empty() => &items[0],
            _ => data,
        };
        let markdown = container
            .get("markdown")
            .and_then(Value::as_str)
            .map(str::to_string);
        let html = container
            .get("html")
            .and_then(Value::as_str)
            .map(str::to_string);
        let metadata = container.get("metadata").cloned();
        let links = container.get("links").cloned();
        (markdown, html, metadata, links)
    }

    fn handle_success_body(
        &self,
        data: Value,
        latency: u64,
        url: &str,
        options_snapshot: Value,
        request_id: Option<i64>,
    ) -> ScrapeResult {
        let correlation_id = data.get("cid").and_then(Value::as_str).map(str::to_string);
        let response_success = data.get("success").and_then(Value::as_bool);
        let response_error_code = data.get("code").and_then(Value::as_str).map(str::to_string);
        let response_details = data.get("details").cloned();

        let (has_error, error_message) = Self::detect_error_in_body(&data);
        let (markdown, html, metadata, links) = Self::extract_content_fields(&data);

        if has_error {
            tracing::error!(
                error = error_message.as_deref(),
                url,
                request_id,
                "scrape_error_in_body"
            );
            return ScrapeResult {
                status: ScrapeStatus::Error,
                http_status: data.get("status_code").and_then(Value::as_u64).map(|s| s as u16),
                content_markdown: markdown,
                content_html: html,
                structured_json: data.get("structured").cloned(),
                metadata_json: metadata,
                links_json: links,
                response_success,
                response_error_code,
                response_error_message: error_message.clone(),
                response_details,
                latency_ms: Some(latency),
                error_text: error_message,
                source_url: Some(url.to_string()),
                endpoint: SCRAPE_ENDPOINT.to_string(),
                options_json: Some(options_snapshot),
                correlation_id,
            };
        }

        tracing::info!(
            status = "ok",
            latency_ms = latency,
            markdown_len = markdown.as_deref().map(str::len),
            html_len = html.as_deref().map(str::len),
            request_id,
            "scrape_result_summary"
        );

        ScrapeResult {
            status: ScrapeStatus::Ok,
            http_status: data.get("status_code").and_then(Value::as_u64).map(|s| s as u16),
            content_markdown: markdown,
            content_html: html,
            structured_json: data.get("structured").cloned(),
            metadata_json: metadata,
            links_json: links,
            response_success,
            response_error_code,
            response_error_message: None,
            response_details,
            latency_ms: Some(latency),
            error_text: None,
            source_url: Some(url.to_string()),
            endpoint: SCRAPE_ENDPOINT.to_string(),
            options_json: Some(options_snapshot),
            correlation_id,
        }
    }

    fn non_retryable_error(
        &self,
        data: Value,
        status: u16,
        latency: u64,
        url: &str,
        options_snapshot: Value,
    ) -> ScrapeResult {
        let raw_error = extract_error_message(&data);
        let error_message = Self::map_status_error(status, raw_error.as_deref());
        tracing::error!(status, error = %error_message, url, "scrape_error");

        let (markdown, html, metadata, links) = Self::extract_content_fields(&data);
        ScrapeResult {
            status: ScrapeStatus::Error,
            http_status: Some(status),
            content_markdown: markdown,
            content_html: html,
            structured_json: data.get("structured").cloned(),
            metadata_json: metadata,
            links_json: links,
            response_success: data.get("success").and_then(Value::as_bool),
            response_error_code: data.get("code").and_then(Value::as_str).map(str::to_string),
            response_error_message: raw_error,
            response_details: data.get("details").cloned(),
            latency_ms: Some(latency),
            error_text: Some(error_message),
            source_url: Some(url.to_string()),
            endpoint: SCRAPE_ENDPOINT.to_string(),
            options_json: Some(options_snapshot),
            correlation_id: data.get("cid").and_then(Value::as_str).map(str::to_string),
        }
    }

    fn map_status_error(status: u16, raw: Option<&str>) -> String {
        let base = match status {
            400 => "Invalid scrape request",
            401 => "Authentication failed (check the API key)",
            402 => "Insufficient credits",
            403 => "Access forbidden",
            404 => "Endpoint or page not found",
            429 => "Rate limit exceeded",
            500..=599 => "Upstream server error",
            _ => "Unexpected response",
        };
        match raw {
            Some(raw) if !raw.is_empty() => format!("{base}: {raw}"),
            _ => format!("{base} (HTTP {status})"),
        }
    }

    fn error_result(
        &self,
        http_status: Option<u16>,
        latency_ms: Option<u64>,
        error_text: String,
        url: &str,
        options_snapshot: Value,
    ) -> ScrapeResult {
        ScrapeResult {
            status: ScrapeStatus::Error,
            http_status,
            content_markdown: None,
            content_html: None,
            structured_json: None,
            metadata_json: None,
            links_json: None,
            response_success: None,
            response_error_code: None,
            response_error_message: None,
            response_details: None,
            latency_ms,
            error_text: Some(error_text),
            source_url: Some(url.to_string()),
            endpoint: SCRAPE_ENDPOINT.to_string(),
            options_json: match options_snapshot {
                Value::Null => None,
                other => Some(other),
            },
            correlation_id: None,
        }
    }

    fn search_error(
        &self,
        http_status: Option<u16>,
        latency_ms: Option<u64>,
        error_text: String,
    ) -> SearchResult {
        SearchResult {
            status: ScrapeStatus::Error,
            http_status,
            results: Vec::new(),
            total_results: None,
            latency_ms,
            error_text: Some(error_text),
            correlation_id: None,
        }
    }
}
