//! Remote-to-local sync: unknown remote bookmarks enter the local
//! ingestion pipeline.

use crate::error::CoreError;
use crate::retry::is_transient_error;
use crate::sync::bookmarks::{Bookmark, BookmarkClient};
use crate::sync::cache::BookmarkCache;
use crate::sync::repository::{NewSyncRecord, SyncRepository};
use crate::sync::{record_error, SyncDirection, SyncResult};
use crate::url_norm::{check_hash_in_set, normalize_url, sync_url_hash, url_hash_sha256};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Iterates remote bookmarks and submits unknown URLs locally.
pub struct RemoteToLocalSyncer {
    cache: Arc<BookmarkCache>,
}

impl RemoteToLocalSyncer {
    pub fn new(cache: Arc<BookmarkCache>) -> Self {
        Self { cache }
    }

    pub async fn sync(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: i64,
        limit: Option<usize>,
    ) -> SyncResult {
        let started = Instant::now();
        let mut result = SyncResult::new(SyncDirection::RemoteToLocal);

        tracing::info!(user_id, limit, "sync_remote_to_local_start");

        if let Err(e) = self
            .sync_inner(client, repo, user_id, limit, &mut result)
            .await
        {
            record_error(&mut result, format!("Sync failed: {e}"), is_transient_error(&e));
            tracing::error!(error = %e, "sync_remote_to_local_error");
        }

        result.duration = started.elapsed();
        tracing::info!(
            synced = result.items_synced,
            skipped = result.total_skipped(),
            failed = result.items_failed,
            duration_ms = result.duration.as_millis() as u64,
            "sync_remote_to_local_complete"
        );
        result
    }

    async fn sync_inner(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: i64,
        limit: Option<usize>,
        result: &mut SyncResult,
    ) -> crate::error::Result<()> {
        let mut synced_hashes = repo
            .get_synced_hashes_by_direction(SyncDirection::RemoteToLocal)
            .await?;
        let mut existing_request_hashes = repo.get_existing_request_hashes().await?;

        // Prefer the list a surrounding cache scope already paid for;
        // stream page by page otherwise.
        if let Some(cached) = self.cache.cached_bookmarks() {
            for bookmark in cached {
                let Some(url) = bookmark.url.clone() else {
                    continue;
                };
                let normalized = normalize_url(&url).unwrap_or(url);
                if self
                    .process_bookmark(
                        client,
                        repo,
                        user_id,
                        &normalized,
                        &bookmark,
                        &mut synced_hashes,
                        &mut existing_request_hashes,
                        result,
                    )
                    .await?
                    && limit.map(|l| result.items_synced as usize >= l).unwrap_or(false)
                {
                    break;
                }
            }
        } else {
            let mut pager = self.cache.iter_bookmarks(client);
            while let Some((normalized, bookmark)) = pager.next().await? {
                if self
                    .process_bookmark(
                        client,
                        repo,
                        user_id,
                        &normalized,
                        &bookmark,
                        &mut synced_hashes,
                        &mut existing_request_hashes,
                        result,
                    )
                    .await?
                    && limit.map(|l| result.items_synced as usize >= l).unwrap_or(false)
                {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle one remote bookmark. Returns whether it counted toward the
    /// sync limit.
    #[allow(clippy::too_many_arguments)]
    async fn process_bookmark(
        &self,
        _client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: i64,
        normalized_url: &str,
        bookmark: &Bookmark,
        synced_hashes: &mut HashSet<String>,
        existing_request_hashes: &mut HashSet<String>,
        result: &mut SyncResult,
    ) -> crate::error::Result<bool> {
        let Some(url) = bookmark.url.as_deref() else {
            result.skipped_no_url += 1;
            return Ok(false);
        };

        let url_hash = sync_url_hash(url);
        if check_hash_in_set(&url_hash, synced_hashes) {
            result.skipped_already_synced += 1;
            return Ok(false);
        }

        let dedupe_hash = url_hash_sha256(normalized_url);
        if existing_request_hashes.contains(&dedupe_hash) {
            // Already ingested locally: just link the pair.
            let _ = repo
                .create_sync_record(NewSyncRecord {
                    summary_id: None,
                    bookmark_id: bookmark.id.clone(),
                    url_hash: url_hash.clone(),
                    direction: SyncDirection::RemoteToLocal,
                    synced_at: Utc::now(),
                    local_modified_at: None,
                    remote_modified_at: bookmark.modified_at,
                })
                .await?;
            result.skipped_exists_in_target += 1;
            synced_hashes.insert(url_hash);
            return Ok(false);
        }

        match self
            .submit_url(repo, user_id, url, normalized_url, &dedupe_hash, bookmark)
            .await
        {
            Ok(()) => {
                result.items_synced += 1;
                synced_hashes.insert(url_hash);
                existing_request_hashes.insert(dedupe_hash);
                Ok(true)
            }
            Err(e) => {
                result.items_failed += 1;
                let message = format!("Failed to sync bookmark {}: {e}", bookmark.id);
                record_error(result, message, is_transient_error(&e));
                tracing::warn!(bookmark_id = %bookmark.id, error = %e, "sync_bookmark_failed");
                Ok(false)
            }
        }
    }

    async fn submit_url(
        &self,
        repo: &dyn SyncRepository,
        user_id: i64,
        url: &str,
        normalized_url: &str,
        dedupe_hash: &str,
        bookmark: &Bookmark,
    ) -> crate::error::Result<()> {
        repo.create_request_from_remote(user_id, url, Some(normalized_url), Some(dedupe_hash))
            .await?;

        let sync_id = repo
            .create_sync_record(NewSyncRecord {
                summary_id: None,
                bookmark_id: bookmark.id.clone(),
                url_hash: sync_url_hash(url),
                direction: SyncDirection::RemoteToLocal,
                synced_at: Utc::now(),
                local_modified_at: None,
                remote_modified_at: bookmark.modified_at,
            })
            .await?;

        if sync_id.is_none() {
            tracing::warn!(bookmark_id = %bookmark.id, url, "submit_url_duplicate");
            return Err(CoreError::Other(
                "Duplicate sync record detected, try again".to_string(),
            ));
        }

        tracing::info!(bookmark_id = %bookmark.id, url, "url_submitted_to_ingestion");
        Ok(())
    }
}
