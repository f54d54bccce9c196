//! Local-to-remote sync: local summaries become remote bookmarks.

use crate::error::CoreError;
use crate::retry::is_transient_error;
use crate::sync::bookmarks::{Bookmark, BookmarkClient, BookmarkUpdate};
use crate::sync::cache::BookmarkCache;
use crate::sync::metadata::{extract_summary_note, extract_summary_url, MetadataApplier, MetadataCounters};
use crate::sync::repository::{NewSyncRecord, SyncRepository};
use crate::sync::retry::RetryExecutor;
use crate::sync::{record_error, SyncDirection, SyncResult, SyncWorkItem};
use crate::url_norm::{check_hash_in_set, normalize_url, sync_url_hash};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// Chooses work among local summaries and pushes them to the remote store.
pub struct LocalToRemoteSyncer {
    cache: Arc<BookmarkCache>,
    retry: RetryExecutor,
    metadata: Arc<MetadataApplier>,
}

impl LocalToRemoteSyncer {
    pub fn new(
        cache: Arc<BookmarkCache>,
        retry: RetryExecutor,
        metadata: Arc<MetadataApplier>,
    ) -> Self {
        Self {
            cache,
            retry,
            metadata,
        }
    }

    /// Run one pass. `force` re-syncs already-linked summaries; `limit`
    /// caps the number of remote writes queued.
    pub async fn sync(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: Option<i64>,
        limit: Option<usize>,
        force: bool,
    ) -> SyncResult {
        let started = Instant::now();
        let mut result = SyncResult::new(SyncDirection::LocalToRemote);
        let mut counters = MetadataCounters::default();

        tracing::info!(user_id, limit, force, "sync_local_to_remote_start");

        if let Err(e) = self
            .sync_inner(client, repo, user_id, limit, force, &mut result, &mut counters)
            .await
        {
            record_error(&mut result, format!("Sync failed: {e}"), is_transient_error(&e));
            tracing::error!(error = %e, "sync_local_to_remote_error");
        }

        result.duration = started.elapsed();
        tracing::info!(
            synced = result.items_synced,
            skipped = result.total_skipped(),
            failed = result.items_failed,
            tags_attached = counters.tags_attached,
            favourites_updated = counters.favourites_updated,
            duration_ms = result.duration.as_millis() as u64,
            "sync_local_to_remote_complete"
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_inner(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        user_id: Option<i64>,
        limit: Option<usize>,
        force: bool,
        result: &mut SyncResult,
        counters: &mut MetadataCounters,
    ) -> crate::error::Result<()> {
        let url_index = self.cache.get_url_index(client).await?;
        let mut synced_hashes = repo
            .get_synced_hashes_by_direction(SyncDirection::LocalToRemote)
            .await?;
        let summaries = repo.get_summaries_for_sync(user_id).await?;

        let mut work_items: Vec<SyncWorkItem> = Vec::new();
        for summary in summaries {
            let Some(url) = extract_summary_url(&summary).map(str::to_string) else {
                result.skipped_no_url += 1;
                continue;
            };

            let url_hash = sync_url_hash(&url);
            if url_hash.len() != 64 {
                result.skipped_hash_failed += 1;
                continue;
            }

            if !force && check_hash_in_set(&url_hash, &synced_hashes) {
                result.skipped_already_synced += 1;
                continue;
            }

            let comparison_url = normalize_url(&url).unwrap_or_else(|| url.clone());
            if let Some(existing) = url_index.get(&comparison_url) {
                if force {
                    work_items.push(SyncWorkItem {
                        summary,
                        url_hash,
                        existing_bookmark: Some(existing.clone()),
                    });
                } else {
                    // Already present remotely: just link the pair.
                    let _ = repo
                        .create_sync_record(NewSyncRecord {
                            summary_id: Some(summary.id),
                            bookmark_id: existing.id.clone(),
                            url_hash: url_hash.clone(),
                            direction: SyncDirection::LocalToRemote,
                            synced_at: Utc::now(),
                            local_modified_at: summary.updated_at.clone(),
                            remote_modified_at: existing.modified_at,
                        })
                        .await?;
                    result.skipped_exists_in_target += 1;
                    synced_hashes.insert(url_hash);
                }
                continue;
            }

            work_items.push(SyncWorkItem {
                summary,
                url_hash,
                existing_bookmark: None,
            });
            if let Some(limit) = limit {
                if work_items.len() >= limit {
                    break;
                }
            }
        }

        for item in work_items {
            let summary_id = item.summary.id;
            match self.sync_one(client, repo, &item, counters).await {
                Ok(non_fatal) => {
                    result.items_synced += 1;
                    synced_hashes.insert(item.url_hash.clone());
                    for (message, retryable) in non_fatal {
                        record_error(result, message, retryable);
                    }
                }
                Err(e) => {
                    result.items_failed += 1;
                    let message = format!("Failed to sync summary {summary_id}: {e}");
                    record_error(result, message, is_transient_error(&e));
                    tracing::warn!(summary_id, error = %e, "sync_item_failed");
                }
            }
        }

        Ok(())
    }

    /// Push one summary: create or update the bookmark, record the linkage,
    /// and apply metadata. A lost uniqueness race on the sync record is
    /// compensated by deleting the bookmark we just created.
    async fn sync_one(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
        item: &SyncWorkItem,
        counters: &mut MetadataCounters,
    ) -> crate::error::Result<Vec<(String, bool)>> {
        let summary = &item.summary;
        let url = extract_summary_url(summary)
            .map(str::to_string)
            .unwrap_or_default();
        if url.is_empty() {
            return Ok(Vec::new());
        }

        let title = match summary.request_id {
            Some(request_id) => match repo.get_crawl_result_title(request_id).await {
                Ok(title) => title,
                Err(e) => {
                    tracing::warn!(request_id, error = %e, "crawl_result_title_fetch_failed");
                    None
                }
            },
            None => None,
        };
        let note = extract_summary_note(summary);

        let (bookmark, sync_id): (Bookmark, i64) = match &item.existing_bookmark {
            Some(existing) => {
                let outcome = self
                    .retry
                    .run("update_bookmark", || {
                        client.update_bookmark(
                            &existing.id,
                            BookmarkUpdate {
                                title: title.clone(),
                                note: note.clone(),
                                ..BookmarkUpdate::default()
                            },
                        )
                    })
                    .await;
                let Some(bookmark) = outcome.result else {
                    return Err(CoreError::Other(format!(
                        "Failed to update bookmark for summary {}: {}",
                        summary.id,
                        outcome.error_text()
                    )));
                };

                let sync_id = repo
                    .upsert_sync_record(NewSyncRecord {
                        summary_id: Some(summary.id),
                        bookmark_id: bookmark.id.clone(),
                        url_hash: item.url_hash.clone(),
                        direction: SyncDirection::LocalToRemote,
                        synced_at: Utc::now(),
                        local_modified_at: summary.updated_at.clone(),
                        remote_modified_at: bookmark.modified_at,
                    })
                    .await?;
                (bookmark, sync_id)
            }
            None => {
                let outcome = self
                    .retry
                    .run("create_bookmark", || {
                        client.create_bookmark(&url, title.as_deref(), note.as_deref())
                    })
                    .await;
                let Some(bookmark) = outcome.result else {
                    return Err(CoreError::Other(format!(
                        "Failed to create bookmark for summary {}: {}",
                        summary.id,
                        outcome.error_text()
                    )));
                };

                let created = repo
                    .create_sync_record(NewSyncRecord {
                        summary_id: Some(summary.id),
                        bookmark_id: bookmark.id.clone(),
                        url_hash: item.url_hash.clone(),
                        direction: SyncDirection::LocalToRemote,
                        synced_at: Utc::now(),
                        local_modified_at: summary.updated_at.clone(),
                        remote_modified_at: bookmark.modified_at,
                    })
                    .await?;

                match created {
                    Some(sync_id) => (bookmark, sync_id),
                    None => {
                        // Another instance linked this pair first; undo our
                        // bookmark and let the caller retry.
                        tracing::warn!(
                            bookmark_id = %bookmark.id,
                            summary_id = summary.id,
                            "sync_record_duplicate_cleanup"
                        );
                        if let Err(cleanup_err) = client.delete_bookmark(&bookmark.id).await {
                            tracing::error!(
                                bookmark_id = %bookmark.id,
                                error = %cleanup_err,
                                "duplicate_cleanup_failed"
                            );
                        }
                        return Err(CoreError::Other(
                            "Duplicate sync record detected, try again".to_string(),
                        ));
                    }
                }
            }
        };

        let (non_fatal, last_modified) = self
            .metadata
            .apply(client, &bookmark, summary, counters)
            .await;

        if let Some(last_modified) = last_modified {
            if Some(last_modified) != bookmark.modified_at {
                repo.update_sync_timestamps(sync_id, None, Some(last_modified))
                    .await?;
            }
        }

        Ok(non_fatal)
    }
}
