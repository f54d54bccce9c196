//! Scrape request option building.
//!
//! `formats` mixes plain string formats with object entries for JSON and
//! screenshot modes, so it is built as raw `serde_json` values.

use crate::config::ScrapeConfig;
use serde_json::{json, Map, Value};

/// Builds the v2 formats list and per-attempt scrape options.
#[derive(Debug, Clone)]
pub struct ScrapeOptionsBuilder {
    max_age_seconds: u64,
    remove_base64_images: bool,
    block_ads: bool,
    skip_tls_verification: bool,
    include_markdown_format: bool,
    include_html_format: bool,
    include_links_format: bool,
    json_prompt: Option<String>,
    json_schema: Option<Value>,
    screenshot: Option<ScreenshotOptions>,
}

/// Screenshot format parameters.
#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub quality: u8,
    pub viewport: Option<(u32, u32)>,
}

impl ScrapeOptionsBuilder {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            max_age_seconds: config.max_age_seconds,
            remove_base64_images: config.remove_base64_images,
            block_ads: config.block_ads,
            skip_tls_verification: config.skip_tls_verification,
            include_markdown_format: config.include_markdown_format,
            include_html_format: config.include_html_format,
            include_links_format: config.include_links_format,
            json_prompt: None,
            json_schema: None,
            screenshot: None,
        }
    }

    /// Request JSON-mode extraction with an optional prompt and schema.
    pub fn with_json_mode(mut self, prompt: Option<String>, schema: Option<Value>) -> Self {
        self.json_prompt = prompt;
        self.json_schema = schema;
        self
    }

    /// Request a screenshot format entry.
    pub fn with_screenshot(mut self, screenshot: ScreenshotOptions) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    /// The formats list: string entries plus JSON/screenshot objects.
    /// Always non-empty; markdown is the floor.
    pub fn build_formats(&self) -> Vec<Value> {
        let mut formats = Vec::new();
        if self.include_markdown_format {
            formats.push(json!("markdown"));
        }
        if self.include_html_format {
            formats.push(json!("html"));
        }
        if self.include_links_format {
            formats.push(json!("links"));
        }

        if self.json_prompt.is_some() || self.json_schema.is_some() {
            let mut entry = Map::new();
            entry.insert("type".into(), json!("json"));
            if let Some(prompt) = &self.json_prompt {
                entry.insert("prompt".into(), json!(prompt));
            }
            if let Some(schema) = &self.json_schema {
                entry.insert("schema".into(), schema.clone());
            }
            formats.push(Value::Object(entry));
        }

        if let Some(screenshot) = &self.screenshot {
            let mut entry = Map::new();
            entry.insert("type".into(), json!("screenshot"));
            entry.insert("fullPage".into(), json!(screenshot.full_page));
            entry.insert("quality".into(), json!(screenshot.quality));
            if let Some((width, height)) = screenshot.viewport {
                entry.insert("viewport".into(), json!({"width": width, "height": height}));
            }
            formats.push(Value::Object(entry));
        }

        if formats.is_empty() {
            formats.push(json!("markdown"));
        }
        formats
    }

    /// Per-attempt options; `mobile` and `pdf` are the fields the retry
    /// loop toggles.
    pub fn base_options(&self, mobile: bool, pdf: bool) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("mobile".into(), json!(mobile));
        options.insert("maxAge".into(), json!(self.max_age_seconds));
        options.insert("removeBase64Images".into(), json!(self.remove_base64_images));
        options.insert("blockAds".into(), json!(self.block_ads));
        options.insert(
            "skipTlsVerification".into(),
            json!(self.skip_tls_verification),
        );
        if pdf {
            options.insert("parsers".into(), json!(["pdf"]));
        }
        options
    }

    /// Full options snapshot recorded on results for replay/debugging.
    pub fn options_snapshot(&self, mobile: bool, pdf: bool) -> Value {
        let mut options = self.base_options(mobile, pdf);
        options.insert("formats".into(), json!(self.build_formats()));
        Value::Object(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ScrapeOptionsBuilder {
        ScrapeOptionsBuilder::from_config(&ScrapeConfig::default())
    }

    #[test]
    fn test_default_formats() {
        let formats = builder().build_formats();
        assert!(formats.contains(&json!("markdown")));
        assert!(formats.contains(&json!("html")));
        assert!(!formats.contains(&json!("links")));
    }

    #[test]
    fn test_json_mode_format_entry() {
        let formats = builder()
            .with_json_mode(Some("extract title".into()), Some(json!({"type": "object"})))
            .build_formats();
        let entry = formats.iter().find(|f| f["type"] == "json").unwrap();
        assert_eq!(entry["prompt"], "extract title");
        assert!(entry["schema"].is_object());
    }

    #[test]
    fn test_screenshot_format_entry() {
        let formats = builder()
            .with_screenshot(ScreenshotOptions {
                full_page: true,
                quality: 80,
                viewport: Some((1280, 720)),
            })
            .build_formats();
        let entry = formats.iter().find(|f| f["type"] == "screenshot").unwrap();
        assert_eq!(entry["fullPage"], true);
        assert_eq!(entry["quality"], 80);
        assert_eq!(entry["viewport"]["width"], 1280);
    }

    #[test]
    fn test_pdf_parser_hint() {
        let with_pdf = builder().base_options(true, true);
        assert_eq!(with_pdf["parsers"], json!(["pdf"]));
        let without = builder().base_options(true, false);
        assert!(!without.contains_key("parsers"));
    }

    #[test]
    fn test_snapshot_includes_formats_and_mobile() {
        let snapshot = builder().options_snapshot(false, true);
        assert_eq!(snapshot["mobile"], false);
        assert_eq!(snapshot["parsers"], json!(["pdf"]));
        assert!(snapshot["formats"].is_array());
    }
}
