//! The persistence read/write surface the sync subsystem depends on, plus
//! timestamp coercion for stores that hand datetimes back as strings.

use crate::error::Result;
use crate::sync::SyncDirection;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// A local summary row as the sync layer sees it.
#[derive(Debug, Clone, Default)]
pub struct SummaryRecord {
    pub id: i64,
    /// The ingestion request this summary came from.
    pub request_id: Option<i64>,
    pub normalized_url: Option<String>,
    /// Summary payload with `tldr`, `summary_250`, `topic_tags`, …
    pub json_payload: Option<Value>,
    pub is_read: bool,
    pub is_favorited: bool,
    /// Raw stored timestamp; may be an ISO string without zone info.
    pub updated_at: Option<String>,
}

/// Fields for a new sync record. `create_sync_record` returns `None` when
/// the unique constraint on the linkage fires — callers treat that as a
/// lost race, not an error.
#[derive(Debug, Clone)]
pub struct NewSyncRecord {
    pub summary_id: Option<i64>,
    pub bookmark_id: String,
    pub url_hash: String,
    pub direction: SyncDirection,
    pub synced_at: DateTime<Utc>,
    pub local_modified_at: Option<String>,
    pub remote_modified_at: Option<DateTime<Utc>>,
}

/// An existing sync linkage joined with its ids.
#[derive(Debug, Clone)]
pub struct SyncLinkage {
    pub sync_id: i64,
    pub summary_id: Option<i64>,
    pub bookmark_id: String,
    pub direction: SyncDirection,
    /// Last-seen local modification time, raw from the store.
    pub local_modified_at: Option<String>,
    /// Last-seen remote modification time, raw from the store.
    pub remote_modified_at: Option<String>,
}

/// Persistence operations used by the sync orchestrators.
#[async_trait]
pub trait SyncRepository: Send + Sync {
    async fn get_synced_hashes_by_direction(
        &self,
        direction: SyncDirection,
    ) -> Result<HashSet<String>>;
    async fn get_summaries_for_sync(&self, user_id: Option<i64>) -> Result<Vec<SummaryRecord>>;
    async fn get_summary_by_id(&self, id: i64) -> Result<Option<SummaryRecord>>;
    async fn update_summary_status(
        &self,
        id: i64,
        is_read: Option<bool>,
        is_favorited: Option<bool>,
    ) -> Result<()>;
    async fn get_crawl_result_title(&self, request_id: i64) -> Result<Option<String>>;

    async fn get_existing_request_hashes(&self) -> Result<HashSet<String>>;
    /// Submit a remote URL into the local ingestion pipeline.
    async fn create_request_from_remote(
        &self,
        user_id: i64,
        input_url: &str,
        normalized_url: Option<&str>,
        dedupe_hash: Option<&str>,
    ) -> Result<i64>;

    /// Returns `None` on a unique-constraint collision.
    async fn create_sync_record(&self, record: NewSyncRecord) -> Result<Option<i64>>;
    async fn upsert_sync_record(&self, record: NewSyncRecord) -> Result<i64>;
    async fn update_sync_timestamps(
        &self,
        sync_id: i64,
        local_modified_at: Option<DateTime<Utc>>,
        remote_modified_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete_all_sync_records(&self, direction: Option<SyncDirection>) -> Result<u64>;
    async fn get_synced_items_with_bookmark_and_summary(&self) -> Result<Vec<SyncLinkage>>;
    async fn get_sync_stats(&self) -> Result<Value>;
}

/// Coerce a stored timestamp into a timezone-aware value.
///
/// `None`/empty → `None`; an ISO string with an offset is converted to UTC;
/// a naive ISO string is assumed UTC; anything unparseable is logged and
/// dropped rather than half-converted.
pub fn ensure_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Some(aware.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    tracing::warn!(value = raw, "ensure_datetime_parse_failed");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_none_and_empty() {
        assert!(ensure_datetime(None).is_none());
        assert!(ensure_datetime(Some("")).is_none());
        assert!(ensure_datetime(Some("   ")).is_none());
    }

    #[test]
    fn test_aware_string_converted_to_utc() {
        let parsed = ensure_datetime(Some("2024-03-01T12:00:00+02:00")).unwrap();
        assert_eq!(parsed.hour(), 10);
    }

    #[test]
    fn test_naive_string_assumed_utc() {
        let parsed = ensure_datetime(Some("2024-03-01T12:00:00")).unwrap();
        assert_eq!(parsed.hour(), 12);
    }

    #[test]
    fn test_sqlite_space_separator() {
        assert!(ensure_datetime(Some("2024-03-01 12:00:00")).is_some());
        assert!(ensure_datetime(Some("2024-03-01 12:00:00.123456")).is_some());
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(ensure_datetime(Some("not a date")).is_none());
    }
}
