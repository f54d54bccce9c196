//! Tag and favourite replication for a single bookmark.

use crate::sync::bookmarks::{Bookmark, BookmarkClient, BookmarkUpdate};
use crate::sync::repository::SummaryRecord;
use crate::sync::retry::RetryExecutor;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Most topic tags replicated per bookmark.
pub const TOPIC_TAG_LIMIT: usize = 5;

/// Counters the applier increments across a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataCounters {
    pub tags_attached: u32,
    pub favourites_updated: u32,
}

/// The summary's normalized URL, the sync key.
pub fn extract_summary_url(summary: &SummaryRecord) -> Option<&str> {
    summary.normalized_url.as_deref()
}

/// Note for the bookmark: prefer `tldr`, fall back to `summary_250`.
pub fn extract_summary_note(summary: &SummaryRecord) -> Option<String> {
    let payload = summary.json_payload.as_ref()?;
    payload
        .get("tldr")
        .or_else(|| payload.get("summary_250"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Up to [`TOPIC_TAG_LIMIT`] topic tags, `#` prefixes stripped, blanks
/// dropped.
pub fn extract_topic_tags(summary: &SummaryRecord) -> Vec<String> {
    let Some(payload) = summary.json_payload.as_ref() else {
        return Vec::new();
    };
    let Some(raw_tags) = payload.get("topic_tags").and_then(Value::as_array) else {
        return Vec::new();
    };
    if raw_tags.len() > TOPIC_TAG_LIMIT {
        tracing::debug!(count = raw_tags.len(), limit = TOPIC_TAG_LIMIT, "truncating_topic_tags");
    }
    raw_tags
        .iter()
        .take(TOPIC_TAG_LIMIT)
        .filter_map(Value::as_str)
        .map(|tag| tag.trim_start_matches('#').trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Applies favourite status and tags to one bookmark, collecting failures
/// as non-fatal `(message, retryable)` pairs.
pub struct MetadataApplier {
    retry: RetryExecutor,
    sync_tag: String,
    read_tag: String,
}

impl MetadataApplier {
    pub fn new(retry: RetryExecutor, sync_tag: impl Into<String>, read_tag: impl Into<String>) -> Self {
        Self {
            retry,
            sync_tag: sync_tag.into(),
            read_tag: read_tag.into(),
        }
    }

    /// Tag set for a summary: the sync tag always, the read tag when read,
    /// then topic tags.
    pub fn build_tags(&self, summary: &SummaryRecord) -> Vec<String> {
        let mut tags = vec![self.sync_tag.clone()];
        if summary.is_read {
            tags.push(self.read_tag.clone());
        }
        tags.extend(extract_topic_tags(summary));
        tags
    }

    /// Apply metadata; returns the non-fatal errors and the latest remote
    /// modification time observed.
    pub async fn apply(
        &self,
        client: &dyn BookmarkClient,
        bookmark: &Bookmark,
        summary: &SummaryRecord,
        counters: &mut MetadataCounters,
    ) -> (Vec<(String, bool)>, Option<DateTime<Utc>>) {
        let mut non_fatal = Vec::new();
        let mut last_modified = bookmark.modified_at;

        if summary.is_favorited {
            let outcome = self
                .retry
                .run("update_bookmark_favourite", || {
                    client.update_bookmark(
                        &bookmark.id,
                        BookmarkUpdate {
                            favourited: Some(true),
                            ..BookmarkUpdate::default()
                        },
                    )
                })
                .await;
            if outcome.success {
                if let Some(updated) = outcome.result {
                    if updated.modified_at.is_some() {
                        last_modified = updated.modified_at;
                    }
                }
                counters.favourites_updated += 1;
            } else {
                let message = format!(
                    "Failed to update favourite for summary {}: {}",
                    summary.id,
                    outcome.error_text()
                );
                tracing::warn!(bookmark_id = %bookmark.id, error = %outcome.error_text(), "update_favourite_failed");
                non_fatal.push((message, outcome.retryable));
            }
        }

        let tags = self.build_tags(summary);
        if !tags.is_empty() {
            let outcome = self
                .retry
                .run("attach_tags", || client.attach_tags(&bookmark.id, &tags))
                .await;
            if outcome.success {
                counters.tags_attached += tags.len() as u32;
            } else {
                let message = format!(
                    "Failed to attach tags for summary {}: {}",
                    summary.id,
                    outcome.error_text()
                );
                tracing::warn!(bookmark_id = %bookmark.id, error = %outcome.error_text(), "attach_tags_failed");
                non_fatal.push((message, outcome.retryable));
            }
        }

        (non_fatal, last_modified)
    }
}
