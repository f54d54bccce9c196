//! Bidirectional bookmark synchronization.
//!
//! Reconciles the local summary store with an external bookmark service:
//! local summaries become remote bookmarks (tags, notes, favourite flag),
//! unknown remote bookmarks are submitted to the local ingestion pipeline,
//! and read/favourite status flows both ways with a timestamp tie-break.
//! Dedupe keys on the SHA-256 of the normalized URL, accepting the legacy
//! 16-char short form; races on the unique sync-record constraint are
//! compensated, not prevented.

pub mod bookmarks;
pub mod cache;
pub mod from_remote;
pub mod metadata;
pub mod preview;
pub mod repository;
pub mod retry;
pub mod service;
pub mod status;
pub mod to_remote;

pub use bookmarks::{Bookmark, BookmarkClient, BookmarkPage, BookmarkTag, BookmarkUpdate, RemoteBookmarkClient};
pub use cache::BookmarkCache;
pub use metadata::{MetadataApplier, MetadataCounters};
pub use repository::{NewSyncRecord, SummaryRecord, SyncLinkage, SyncRepository};
pub use retry::{RetryExecutor, RetryOutcome};
pub use service::SyncService;

use crate::sync::repository::ensure_datetime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which way a sync pass (or a sync record) points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local summaries to the remote bookmark store.
    LocalToRemote,
    /// Remote bookmarks into the local ingestion pipeline.
    RemoteToLocal,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::LocalToRemote => "bsr_to_remote",
            SyncDirection::RemoteToLocal => "remote_to_bsr",
        }
    }
}

/// Counters and errors accumulated by one sync direction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub direction: SyncDirection,
    pub items_synced: u32,
    pub items_failed: u32,
    pub skipped_already_synced: u32,
    pub skipped_exists_in_target: u32,
    pub skipped_hash_failed: u32,
    pub skipped_no_url: u32,
    pub errors: Vec<String>,
    pub retryable_errors: Vec<String>,
    pub permanent_errors: Vec<String>,
    pub duration: Duration,
}

impl SyncResult {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            items_synced: 0,
            items_failed: 0,
            skipped_already_synced: 0,
            skipped_exists_in_target: 0,
            skipped_hash_failed: 0,
            skipped_no_url: 0,
            errors: Vec::new(),
            retryable_errors: Vec::new(),
            permanent_errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Sum of every skip counter.
    pub fn total_skipped(&self) -> u32 {
        self.skipped_already_synced
            + self.skipped_exists_in_target
            + self.skipped_hash_failed
            + self.skipped_no_url
    }
}

/// Append an error to a result, partitioned by retryability. Duplicate
/// messages collapse in the combined list but still count per partition.
pub fn record_error(result: &mut SyncResult, message: String, retryable: bool) {
    if !result.errors.contains(&message) {
        result.errors.push(message.clone());
    }
    if retryable {
        result.retryable_errors.push(message);
    } else {
        result.permanent_errors.push(message);
    }
}

/// Counters from the status reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSyncResult {
    pub local_to_remote_updated: u32,
    pub remote_to_local_updated: u32,
    pub tags_added: u32,
    pub tags_removed: u32,
    pub favourites_updated: u32,
    pub errors: Vec<String>,
}

/// Result of a full bidirectional sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSyncResult {
    pub local_to_remote: SyncResult,
    pub remote_to_local: SyncResult,
    pub status_updates: StatusSyncResult,
    pub total_synced: u32,
    pub total_duration: Duration,
}

/// The smallest unit of outbound sync work: one summary, its URL hash, and
/// optionally an existing remote bookmark to update instead of create.
#[derive(Debug, Clone)]
pub struct SyncWorkItem {
    pub summary: SummaryRecord,
    pub url_hash: String,
    pub existing_bookmark: Option<Bookmark>,
}

/// Pick the source of truth for a linked pair.
///
/// Default is the direction recorded on the link; when both sides carry a
/// trustworthy modification time the later one wins, and one-sided
/// comparisons against the stored last-seen times break remaining ties.
pub fn local_is_source_of_truth(
    link_direction: SyncDirection,
    summary_updated_at: Option<&str>,
    bookmark_modified_at: Option<chrono::DateTime<chrono::Utc>>,
    stored_local_modified_at: Option<&str>,
    stored_remote_modified_at: Option<&str>,
) -> bool {
    let mut local_wins = link_direction == SyncDirection::LocalToRemote;

    let summary_at = ensure_datetime(summary_updated_at);
    let stored_local = ensure_datetime(stored_local_modified_at);
    let stored_remote = ensure_datetime(stored_remote_modified_at);

    if let (Some(local), Some(remote)) = (summary_at, bookmark_modified_at) {
        if local > remote {
            local_wins = true;
        } else if remote > local {
            local_wins = false;
        }
    } else if let (Some(local), Some(stored)) = (summary_at, stored_local) {
        if local > stored {
            local_wins = true;
        }
    } else if let (Some(remote), Some(stored)) = (bookmark_modified_at, stored_remote) {
        if remote > stored {
            local_wins = false;
        }
    }

    local_wins
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_direction_tags() {
        assert_eq!(SyncDirection::LocalToRemote.as_str(), "bsr_to_remote");
        assert_eq!(SyncDirection::RemoteToLocal.as_str(), "remote_to_bsr");
    }

    #[test]
    fn test_total_skipped_sums_all_counters() {
        let mut result = SyncResult::new(SyncDirection::LocalToRemote);
        result.skipped_already_synced = 1;
        result.skipped_exists_in_target = 2;
        result.skipped_hash_failed = 3;
        result.skipped_no_url = 4;
        assert_eq!(result.total_skipped(), 10);
    }

    #[test]
    fn test_record_error_partitions() {
        let mut result = SyncResult::new(SyncDirection::LocalToRemote);
        record_error(&mut result, "transient".into(), true);
        record_error(&mut result, "permanent".into(), false);
        record_error(&mut result, "transient".into(), true);

        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.retryable_errors.len(), 2);
        assert_eq!(result.permanent_errors, vec!["permanent"]);
    }

    #[test]
    fn test_source_of_truth_defaults_to_link_direction() {
        assert!(local_is_source_of_truth(
            SyncDirection::LocalToRemote,
            None,
            None,
            None,
            None
        ));
        assert!(!local_is_source_of_truth(
            SyncDirection::RemoteToLocal,
            None,
            None,
            None,
            None
        ));
    }

    #[test]
    fn test_source_of_truth_later_timestamp_wins() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(!local_is_source_of_truth(
            SyncDirection::LocalToRemote,
            Some("2024-01-01T00:00:00Z"),
            Some(early + chrono::Duration::hours(1)),
            None,
            None
        ));
        assert!(local_is_source_of_truth(
            SyncDirection::RemoteToLocal,
            Some("2024-01-01T02:00:00Z"),
            Some(early),
            None,
            None
        ));
    }

    #[test]
    fn test_source_of_truth_one_sided_fallback() {
        // Only local side known: newer than its stored last-seen → local wins.
        assert!(local_is_source_of_truth(
            SyncDirection::RemoteToLocal,
            Some("2024-02-01T00:00:00Z"),
            None,
            Some("2024-01-01T00:00:00Z"),
            None
        ));
        // Only remote side known: newer than its stored last-seen → remote wins.
        let remote = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(!local_is_source_of_truth(
            SyncDirection::LocalToRemote,
            None,
            Some(remote),
            None,
            Some("2024-01-01T00:00:00Z")
        ));
    }
}
