//! Public sync service facade.
//!
//! Thin orchestrator over the focused collaborators: both direction
//! syncers, the status reconciler, and the previewer. Every public method
//! opens a remote client through the factory and health-checks it before
//! doing any work.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::sync::bookmarks::{BookmarkClient, RemoteBookmarkClient};
use crate::sync::cache::BookmarkCache;
use crate::sync::from_remote::RemoteToLocalSyncer;
use crate::sync::metadata::MetadataApplier;
use crate::sync::preview::{SyncPreview, SyncPreviewer};
use crate::sync::repository::SyncRepository;
use crate::sync::retry::RetryExecutor;
use crate::sync::status::StatusReconciler;
use crate::sync::to_remote::LocalToRemoteSyncer;
use crate::sync::{record_error, FullSyncResult, StatusSyncResult, SyncDirection, SyncResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Builds a remote client per sync invocation.
pub type ClientFactory = Arc<dyn Fn() -> Result<Arc<dyn BookmarkClient>> + Send + Sync>;

/// Bidirectional sync service between the local summary store and the
/// remote bookmark service.
pub struct SyncService {
    repo: Arc<dyn SyncRepository>,
    client_factory: ClientFactory,
    cache: Arc<BookmarkCache>,
    to_remote: LocalToRemoteSyncer,
    from_remote: RemoteToLocalSyncer,
    previewer: SyncPreviewer,
    status: StatusReconciler,
}

impl SyncService {
    /// Service against the live remote API.
    pub fn new(config: SyncConfig, repo: Arc<dyn SyncRepository>) -> Result<Self> {
        config.validate()?;
        let factory_config = config.clone();
        let factory: ClientFactory = Arc::new(move || {
            Ok(Arc::new(RemoteBookmarkClient::new(&factory_config)?) as Arc<dyn BookmarkClient>)
        });
        Ok(Self::with_client_factory(config, repo, factory))
    }

    /// Service with a custom client factory (tests, alternate transports).
    pub fn with_client_factory(
        config: SyncConfig,
        repo: Arc<dyn SyncRepository>,
        client_factory: ClientFactory,
    ) -> Self {
        let cache = BookmarkCache::new();
        let retry = RetryExecutor::default();
        let metadata = Arc::new(MetadataApplier::new(
            retry.clone(),
            config.sync_tag.clone(),
            config.read_tag.clone(),
        ));
        Self {
            repo,
            client_factory,
            cache: cache.clone(),
            to_remote: LocalToRemoteSyncer::new(cache.clone(), retry.clone(), metadata),
            from_remote: RemoteToLocalSyncer::new(cache.clone()),
            previewer: SyncPreviewer::new(cache.clone()),
            status: StatusReconciler::new(cache, retry, config.read_tag),
        }
    }

    async fn healthy_client(
        &self,
        direction_result: &mut SyncResult,
    ) -> Option<Arc<dyn BookmarkClient>> {
        let client = match (self.client_factory)() {
            Ok(client) => client,
            Err(e) => {
                record_error(direction_result, format!("Client error: {e}"), true);
                return None;
            }
        };
        if !client.health_check().await {
            record_error(
                direction_result,
                "Bookmark API health check failed".to_string(),
                true,
            );
            tracing::error!("sync_health_check_failed");
            return None;
        }
        Some(client)
    }

    /// Push local summaries to the remote store.
    pub async fn sync_bsr_to_remote(
        &self,
        user_id: Option<i64>,
        limit: Option<usize>,
        force: bool,
    ) -> SyncResult {
        self.cache.clear_if_not_reusing();
        let mut result = SyncResult::new(SyncDirection::LocalToRemote);
        let Some(client) = self.healthy_client(&mut result).await else {
            return result;
        };
        self.to_remote
            .sync(client.as_ref(), self.repo.as_ref(), user_id, limit, force)
            .await
    }

    /// Pull unknown remote bookmarks into the local ingestion pipeline.
    pub async fn sync_remote_to_bsr(&self, user_id: i64, limit: Option<usize>) -> SyncResult {
        self.cache.clear_if_not_reusing();
        let mut result = SyncResult::new(SyncDirection::RemoteToLocal);
        let Some(client) = self.healthy_client(&mut result).await else {
            return result;
        };
        self.from_remote
            .sync(client.as_ref(), self.repo.as_ref(), user_id, limit)
            .await
    }

    /// Reconcile read/favourite status across linked pairs.
    pub async fn sync_status_updates(&self) -> StatusSyncResult {
        self.cache.clear_if_not_reusing();
        let mut probe = SyncResult::new(SyncDirection::LocalToRemote);
        let Some(client) = self.healthy_client(&mut probe).await else {
            let mut result = StatusSyncResult::default();
            result.errors.extend(probe.errors);
            return result;
        };
        self.status.sync(client.as_ref(), self.repo.as_ref()).await
    }

    /// Both directions plus status reconciliation, sharing one cache scope
    /// so the remote library is paged once.
    pub async fn run_full_sync(
        &self,
        user_id: Option<i64>,
        limit: Option<usize>,
        force: bool,
    ) -> FullSyncResult {
        let started = Instant::now();
        let _scope = self.cache.scope();

        let local_to_remote = self.sync_bsr_to_remote(user_id, limit, force).await;

        let remote_to_local = match user_id {
            Some(user_id) => self.sync_remote_to_bsr(user_id, limit).await,
            None => {
                let mut skipped = SyncResult::new(SyncDirection::RemoteToLocal);
                skipped
                    .errors
                    .push("Skipped: user_id required for remote-to-local sync".to_string());
                skipped
            }
        };

        let status_updates = self.sync_status_updates().await;

        let total_synced = local_to_remote.items_synced + remote_to_local.items_synced;
        let total_duration = started.elapsed();
        tracing::info!(
            local_to_remote = local_to_remote.items_synced,
            remote_to_local = remote_to_local.items_synced,
            status_out = status_updates.local_to_remote_updated,
            status_in = status_updates.remote_to_local_updated,
            duration_ms = total_duration.as_millis() as u64,
            "full_sync_complete"
        );

        FullSyncResult {
            local_to_remote,
            remote_to_local,
            status_updates,
            total_synced,
            total_duration,
        }
    }

    /// Dry run: what both directions would do, with no writes.
    pub async fn preview_sync(&self, user_id: Option<i64>, limit: Option<usize>) -> SyncPreview {
        self.cache.clear_if_not_reusing();
        let mut probe = SyncResult::new(SyncDirection::LocalToRemote);
        let Some(client) = self.healthy_client(&mut probe).await else {
            let mut preview = SyncPreview::default();
            preview.errors.extend(probe.errors);
            return preview;
        };
        self.previewer
            .preview(client.as_ref(), self.repo.as_ref(), user_id, limit)
            .await
    }

    /// Aggregate sync statistics from persistence.
    pub async fn get_sync_status(&self) -> Result<Value> {
        self.repo.get_sync_stats().await
    }
}
