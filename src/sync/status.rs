//! Bidirectional read/favourite status reconciliation for linked pairs.

use crate::sync::bookmarks::{BookmarkClient, BookmarkUpdate};
use crate::sync::cache::BookmarkCache;
use crate::sync::repository::SyncRepository;
use crate::sync::retry::RetryExecutor;
use crate::sync::{local_is_source_of_truth, StatusSyncResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Reconciles read/favourite status across already-linked pairs.
pub struct StatusReconciler {
    cache: Arc<BookmarkCache>,
    retry: RetryExecutor,
    read_tag: String,
}

impl StatusReconciler {
    pub fn new(cache: Arc<BookmarkCache>, retry: RetryExecutor, read_tag: impl Into<String>) -> Self {
        Self {
            cache,
            retry,
            read_tag: read_tag.into(),
        }
    }

    pub async fn sync(
        &self,
        client: &dyn BookmarkClient,
        repo: &dyn SyncRepository,
    ) -> StatusSyncResult {
        let mut result = StatusSyncResult::default();
        tracing::info!("status_sync_start");

        let linkages = match repo.get_synced_items_with_bookmark_and_summary().await {
            Ok(linkages) => linkages,
            Err(e) => {
                result.errors.push(format!("Status sync failed: {e}"));
                return result;
            }
        };
        if linkages.is_empty() {
            tracing::info!("status_sync_no_items");
            return result;
        }

        let bookmarks = match self.cache.get_bookmarks(client).await {
            Ok(bookmarks) => bookmarks,
            Err(e) => {
                result.errors.push(format!("Status sync failed: {e}"));
                return result;
            }
        };
        let by_id: HashMap<&str, _> = bookmarks
            .iter()
            .map(|bookmark| (bookmark.id.as_str(), bookmark))
            .collect();

        for linkage in linkages {
            let Some(summary_id) = linkage.summary_id else {
                continue;
            };
            let summary = match repo.get_summary_by_id(summary_id).await {
                Ok(Some(summary)) => summary,
                Ok(None) => continue,
                Err(e) => {
                    result
                        .errors
                        .push(format!("Failed to sync status for {}: {e}", linkage.sync_id));
                    continue;
                }
            };
            let Some(bookmark) = by_id.get(linkage.bookmark_id.as_str()).copied() else {
                continue;
            };

            let remote_read = bookmark.has_tag(&self.read_tag);
            let remote_favourited = bookmark.favourited;
            let local_read = summary.is_read;
            let local_favourited = summary.is_favorited;

            let local_wins = local_is_source_of_truth(
                linkage.direction,
                summary.updated_at.as_deref(),
                bookmark.modified_at,
                linkage.local_modified_at.as_deref(),
                linkage.remote_modified_at.as_deref(),
            );

            if local_wins {
                let mut needs_update = false;
                let mut last_remote_modified = bookmark.modified_at;

                if local_favourited != remote_favourited {
                    let outcome = self
                        .retry
                        .run("update_bookmark_favourite", || {
                            client.update_bookmark(
                                &bookmark.id,
                                BookmarkUpdate {
                                    favourited: Some(local_favourited),
                                    ..BookmarkUpdate::default()
                                },
                            )
                        })
                        .await;
                    if outcome.success {
                        result.favourites_updated += 1;
                        needs_update = true;
                        if let Some(updated) = outcome.result {
                            if updated.modified_at.is_some() {
                                last_remote_modified = updated.modified_at;
                            }
                        }
                    } else {
                        result.errors.push(format!(
                            "Failed to update favourite for bookmark {}: {}",
                            bookmark.id,
                            outcome.error_text()
                        ));
                    }
                }

                if local_read && !remote_read {
                    let tags = vec![self.read_tag.clone()];
                    let outcome = self
                        .retry
                        .run("attach_tags", || client.attach_tags(&bookmark.id, &tags))
                        .await;
                    if outcome.success {
                        result.tags_added += 1;
                        needs_update = true;
                    } else {
                        result.errors.push(format!(
                            "Failed to attach tags for bookmark {}: {}",
                            bookmark.id,
                            outcome.error_text()
                        ));
                    }
                } else if !local_read && remote_read {
                    // Tag deletions address the tag by id.
                    if let Some(tag_id) = bookmark.tag_id(&self.read_tag).map(str::to_string) {
                        let outcome = self
                            .retry
                            .run("detach_tag", || client.detach_tag(&bookmark.id, &tag_id))
                            .await;
                        if outcome.success {
                            result.tags_removed += 1;
                            needs_update = true;
                            last_remote_modified = Some(Utc::now());
                        } else {
                            result.errors.push(format!(
                                "Failed to detach tag for bookmark {}: {}",
                                bookmark.id,
                                outcome.error_text()
                            ));
                        }
                    }
                }

                if needs_update {
                    if let Err(e) = repo
                        .update_sync_timestamps(
                            linkage.sync_id,
                            crate::sync::repository::ensure_datetime(summary.updated_at.as_deref()),
                            Some(last_remote_modified.unwrap_or_else(Utc::now)),
                        )
                        .await
                    {
                        result
                            .errors
                            .push(format!("Failed to sync status for {}: {e}", linkage.sync_id));
                        continue;
                    }
                    result.local_to_remote_updated += 1;
                    tracing::debug!(
                        bookmark_id = %bookmark.id,
                        read = local_read,
                        favourited = local_favourited,
                        "status_synced_to_remote"
                    );
                }
            } else if remote_read != local_read || remote_favourited != local_favourited {
                if let Err(e) = repo
                    .update_summary_status(summary_id, Some(remote_read), Some(remote_favourited))
                    .await
                {
                    result
                        .errors
                        .push(format!("Failed to sync status for {}: {e}", linkage.sync_id));
                    continue;
                }
                if let Err(e) = repo
                    .update_sync_timestamps(
                        linkage.sync_id,
                        Some(Utc::now()),
                        Some(bookmark.modified_at.unwrap_or_else(Utc::now)),
                    )
                    .await
                {
                    result
                        .errors
                        .push(format!("Failed to sync status for {}: {e}", linkage.sync_id));
                    continue;
                }
                result.remote_to_local_updated += 1;
                tracing::debug!(
                    summary_id,
                    is_read = remote_read,
                    is_favorited = remote_favourited,
                    "status_synced_to_local"
                );
            }
        }

        tracing::info!(
            local_to_remote = result.local_to_remote_updated,
            remote_to_local = result.remote_to_local_updated,
            tags_added = result.tags_added,
            tags_removed = result.tags_removed,
            favourites_updated = result.favourites_updated,
            errors = result.errors.len(),
            "status_sync_complete"
        );
        result
    }
}
