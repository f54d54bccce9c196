//! Dry-run preview: the same decisions as both syncers, no writes.

use crate::sync::bookmarks::BookmarkClient;
use crate::sync::cache::BookmarkCache;
use crate::sync::metadata::extract_summary_url;
use crate::sync::repository::SyncRepository;
use crate::sync::SyncDirection;
use crate::url_norm::{check_hash_in_set, normalize_url, sync_url_hash, url_hash_sha256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One item a sync pass would touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewItem {
    pub summary_id: Option<i64>,
    pub bookmark_id: Option<String>,
    pub url: String,
}

/// Planned outcome for one direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectionPreview {
    pub would_sync: Vec<PreviewItem>,
    pub would_skip: u32,
    pub already_exists_in_target: Vec<PreviewItem>,
}

/// Full dry-run report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPreview {
    pub local_to_remote: DirectionPreview,
    pub remote_to_local: DirectionPreview,
    pub errors: Vec<String>,
}

/// Computes a [`SyncPreview`] without mutating local or remote state.
pub struct SyncPreviewer {
    cache: Arc<BookmarkCache>,
}

impl SyncPreviewer {
    pub fn new(cache: Arc<BookmarkCache>) -> Self {
        Self { cache }
    }

    pub async fn preview(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: Option<i64>,
        limit: Option<usize>,
    ) -> SyncPreview {
        let mut preview = SyncPreview::default();

        if let Err(e) = self
            .preview_inner(client, repo, user_id, limit, &mut preview)
            .await
        {
            preview.errors.push(format!("Preview failed: {e}"));
        }
        preview
    }

    async fn preview_inner(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: Option<i64>,
        limit: Option<usize>,
        preview: &mut SyncPreview,
    ) -> crate::error::Result<()> {
        let url_index = self.cache.get_url_index(client).await?;

        // Local → remote decisions.
        let synced_out = repo
            .get_synced_hashes_by_direction(SyncDirection::LocalToRemote)
            .await?;
        let summaries = repo.get_summaries_for_sync(user_id).await?;
        for summary in summaries {
            let Some(url) = extract_summary_url(&summary).map(str::to_string) else {
                preview.local_to_remote.would_skip += 1;
                continue;
            };
            let url_hash = sync_url_hash(&url);
            if check_hash_in_set(&url_hash, &synced_out) {
                preview.local_to_remote.would_skip += 1;
                continue;
            }
            let comparison_url = normalize_url(&url).unwrap_or_else(|| url.clone());
            if let Some(existing) = url_index.get(&comparison_url) {
                preview.local_to_remote.already_exists_in_target.push(PreviewItem {
                    summary_id: Some(summary.id),
                    bookmark_id: Some(existing.id.clone()),
                    url,
                });
                continue;
            }
            if limit
                .map(|l| preview.local_to_remote.would_sync.len() >= l)
                .unwrap_or(false)
            {
                continue;
            }
            preview.local_to_remote.would_sync.push(PreviewItem {
                summary_id: Some(summary.id),
                bookmark_id: None,
                url,
            });
        }

        // Remote → local decisions, over the index already in memory.
        let synced_in = repo
            .get_synced_hashes_by_direction(SyncDirection::RemoteToLocal)
            .await?;
        let existing_requests = repo.get_existing_request_hashes().await?;
        for (normalized_url, bookmark) in &url_index {
            let Some(url) = bookmark.url.as_deref() else {
                continue;
            };
            let url_hash = sync_url_hash(url);
            if check_hash_in_set(&url_hash, &synced_in) {
                preview.remote_to_local.would_skip += 1;
                continue;
            }
            if existing_requests.contains(&url_hash_sha256(normalized_url)) {
                preview.remote_to_local.already_exists_in_target.push(PreviewItem {
                    summary_id: None,
                    bookmark_id: Some(bookmark.id.clone()),
                    url: url.to_string(),
                });
                continue;
            }
            if limit
                .map(|l| preview.remote_to_local.would_sync.len() >= l)
                .unwrap_or(false)
            {
                continue;
            }
            preview.remote_to_local.would_sync.push(PreviewItem {
                summary_id: None,
                bookmark_id: Some(bookmark.id.clone()),
                url: url.to_string(),
            });
        }

        Ok(())
    }
}
