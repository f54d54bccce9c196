//! YouTube acquisition pipeline.
//!
//! Three stages: transcript API → video download → VTT subtitle fallback.
//! Around them: per-URL dedupe locking against duplicate submissions, a
//! storage budget with auto-cleanup, and partial-file cleanup that runs on
//! every abnormal exit — including cancellation, via a drop guard, so a
//! shutdown mid-download leaves no stray gigabytes behind.

pub mod downloader;
pub mod metadata;
pub mod storage;
pub mod transcript;
pub mod vtt;

pub use downloader::{build_download_options, classify_download_error, DownloadOptions, VideoDownloader, DOWNLOAD_TIMEOUT};
pub use metadata::{combine_metadata_and_transcript, detect_language, VideoMetadata};
pub use transcript::{
    extract_transcript, TranscriptError, TranscriptOutcome, TranscriptSegment, TranscriptSource,
    MAX_TRANSCRIPT_CHARS,
};

use crate::config::YouTubeConfig;
use crate::error::{CoreError, Result};
use crate::url_norm::{extract_youtube_video_id, normalize_url, url_hash_sha256};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Ingestion request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Ok,
    Error,
}

/// Video download row lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Error,
}

/// Fields for a new ingestion request row.
#[derive(Debug, Clone)]
pub struct NewVideoRequest {
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub input_url: String,
    pub normalized_url: String,
    pub dedupe_hash: String,
    pub correlation_id: Option<String>,
}

/// An existing ingestion request row.
#[derive(Debug, Clone)]
pub struct VideoRequestRecord {
    pub id: i64,
    pub status: RequestStatus,
}

/// An existing video download row.
#[derive(Debug, Clone)]
pub struct VideoDownloadRecord {
    pub id: i64,
    pub request_id: i64,
    pub video_id: String,
    pub status: DownloadStatus,
    pub transcript_text: Option<String>,
    pub transcript_source: Option<String>,
    pub subtitle_language: Option<String>,
    pub metadata: Option<VideoMetadata>,
}

/// Full result of a completed download, persisted in one write.
#[derive(Debug, Clone)]
pub struct VideoDownloadUpdate {
    pub metadata: VideoMetadata,
    pub transcript_text: String,
    pub subtitle_language: String,
    pub auto_generated: bool,
    pub transcript_source: String,
}

/// Persistence surface the pipeline reads and writes.
#[async_trait::async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get_request_by_dedupe_hash(&self, hash: &str) -> Result<Option<VideoRequestRecord>>;
    async fn create_request(&self, new: NewVideoRequest) -> Result<i64>;
    async fn update_request_status(&self, request_id: i64, status: RequestStatus) -> Result<()>;
    async fn update_request_lang_detected(&self, request_id: i64, lang: &str) -> Result<()>;

    async fn create_video_download(
        &self,
        request_id: i64,
        video_id: &str,
        status: DownloadStatus,
    ) -> Result<i64>;
    async fn update_video_download_status(
        &self,
        download_id: i64,
        status: DownloadStatus,
        error_text: Option<String>,
    ) -> Result<()>;
    async fn update_video_download(
        &self,
        download_id: i64,
        update: VideoDownloadUpdate,
    ) -> Result<()>;
    async fn get_video_download_by_request(
        &self,
        request_id: i64,
    ) -> Result<Option<VideoDownloadRecord>>;
}

/// Stage progress reporting for interactive callers.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    /// A new stage started (1-based index).
    async fn stage(&self, stage: u8, name: &str);
    /// A one-off user-facing note (e.g. cached reuse).
    async fn notify(&self, message: &str);
    /// The pipeline finished; `detail` carries the error on failure.
    async fn finished(&self, success: bool, detail: &str);
}

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct VideoExtraction {
    pub request_id: i64,
    /// Metadata header + transcript, ready for summarization.
    pub content: String,
    /// Where the transcript came from: `transcript-api`, `vtt`, or `cached`.
    pub source: String,
    pub detected_language: String,
    pub metadata: VideoMetadata,
}

/// Cleanup obligations for the heavy-work section. Dropping the guard armed
/// (error return or future cancellation) removes partial files and marks
/// the rows failed; the row update runs on a detached task because `Drop`
/// cannot await.
struct CancelGuard {
    dir: PathBuf,
    video_id: String,
    repo: Arc<dyn VideoRepository>,
    download_id: i64,
    request_id: i64,
    armed: bool,
}

impl CancelGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let deleted = storage::cleanup_partial_download_files(&self.dir, &self.video_id);
        if deleted > 0 {
            tracing::info!(
                video_id = %self.video_id,
                files_removed = deleted,
                "partial_download_cleaned"
            );
        }
        let repo = self.repo.clone();
        let download_id = self.download_id;
        let request_id = self.request_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = repo
                    .update_video_download_status(
                        download_id,
                        DownloadStatus::Error,
                        Some("operation was cancelled".to_string()),
                    )
                    .await;
                let _ = repo.update_request_status(request_id, RequestStatus::Error).await;
            });
        }
    }
}

/// The acquisition pipeline.
pub struct VideoPipeline {
    config: YouTubeConfig,
    repo: Arc<dyn VideoRepository>,
    transcripts: Arc<dyn TranscriptSource>,
    downloader: Arc<dyn VideoDownloader>,
    url_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VideoPipeline {
    pub fn new(
        config: YouTubeConfig,
        repo: Arc<dyn VideoRepository>,
        transcripts: Arc<dyn TranscriptSource>,
        downloader: Arc<dyn VideoDownloader>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage_path).map_err(|e| {
            CoreError::Other(format!(
                "cannot create storage directory {}: {e}",
                config.storage_path.display()
            ))
        })?;
        Ok(Self {
            config,
            repo,
            transcripts,
            downloader,
            url_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Download a video and extract its transcript.
    ///
    /// Duplicate submissions of the same URL resolve to the cached result;
    /// the dedupe check plus row creation run under a per-URL lock so two
    /// racing submissions cannot both create rows.
    pub async fn download_and_extract(
        &self,
        url: &str,
        correlation_id: Option<&str>,
        silent: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<VideoExtraction> {
        let video_id = extract_youtube_video_id(url).ok_or_else(|| {
            CoreError::validation("Invalid YouTube URL: could not extract video ID", "url", url)
        })?;

        tracing::info!(video_id = %video_id, url, cid = correlation_id, "youtube_download_start");

        self.check_storage_limits().await?;

        let normalized = normalize_url(url).unwrap_or_else(|| url.to_string());
        let dedupe = url_hash_sha256(&normalized);

        let url_lock = {
            let mut locks = self.url_locks.lock().await;
            locks
                .entry(dedupe.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        // Critical section: dedupe check plus row creation only.
        let (request_id, download_id, cached) = {
            let _guard = url_lock.lock().await;

            let request_id = match self.repo.get_request_by_dedupe_hash(&dedupe).await? {
                Some(existing) => {
                    tracing::info!(
                        video_id = %video_id,
                        request_id = existing.id,
                        cid = correlation_id,
                        "youtube_dedupe_hit"
                    );
                    existing.id
                }
                None => {
                    self.repo
                        .create_request(NewVideoRequest {
                            user_id: None,
                            chat_id: None,
                            input_url: url.to_string(),
                            normalized_url: normalized.clone(),
                            dedupe_hash: dedupe.clone(),
                            correlation_id: correlation_id.map(str::to_string),
                        })
                        .await?
                }
            };

            let existing_download = self.repo.get_video_download_by_request(request_id).await?;
            if let Some(download) = existing_download {
                if download.status == DownloadStatus::Completed {
                    let cached = self.build_cached_extraction(request_id, download)?;
                    (request_id, 0, Some(cached))
                } else {
                    (request_id, download.id, None)
                }
            } else {
                let download_id = self
                    .repo
                    .create_video_download(request_id, &video_id, DownloadStatus::Pending)
                    .await?;
                (request_id, download_id, None)
            }
        };
        self.url_locks.lock().await.remove(&dedupe);

        if let Some(extraction) = cached {
            tracing::info!(
                video_id = %video_id,
                request_id,
                cid = correlation_id,
                "youtube_video_already_downloaded"
            );
            if !silent {
                if let Some(progress) = progress {
                    progress
                        .notify("Reusing previously downloaded video and transcript.")
                        .await;
                }
            }
            return Ok(extraction);
        }

        // Heavy work, outside the lock.
        let date_dir = self
            .config
            .storage_path
            .join(Utc::now().format("%Y%m%d").to_string());
        std::fs::create_dir_all(&date_dir)
            .map_err(|e| CoreError::Other(format!("cannot create output directory: {e}")))?;

        let guard = CancelGuard {
            dir: date_dir.clone(),
            video_id: video_id.clone(),
            repo: self.repo.clone(),
            download_id,
            request_id,
            armed: true,
        };

        let outcome = self
            .run_stages(url, &video_id, request_id, download_id, &date_dir, correlation_id, progress)
            .await;

        match outcome {
            Ok(extraction) => {
                guard.disarm();
                if let Some(progress) = progress {
                    progress.finished(true, "").await;
                }
                Ok(extraction)
            }
            Err(e) => {
                guard.disarm();
                storage::cleanup_partial_download_files(&date_dir, &video_id);
                let _ = self
                    .repo
                    .update_video_download_status(
                        download_id,
                        DownloadStatus::Error,
                        Some(e.to_string()),
                    )
                    .await;
                let _ = self
                    .repo
                    .update_request_status(request_id, RequestStatus::Error)
                    .await;
                tracing::error!(
                    video_id = %video_id,
                    error = %e,
                    cid = correlation_id,
                    "youtube_download_failed"
                );
                if let Some(progress) = progress {
                    progress.finished(false, &e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stages(
        &self,
        url: &str,
        video_id: &str,
        request_id: i64,
        download_id: i64,
        date_dir: &std::path::Path,
        correlation_id: Option<&str>,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<VideoExtraction> {
        self.repo
            .update_video_download_status(download_id, DownloadStatus::Downloading, None)
            .await?;

        // Stage 1: transcript API.
        if let Some(progress) = progress {
            progress.stage(1, "Extracting transcript").await;
        }
        let mut outcome = extract_transcript(
            self.transcripts.as_ref(),
            video_id,
            &self.config.subtitle_languages,
            MAX_TRANSCRIPT_CHARS,
        )
        .await
        .map_err(|e| CoreError::Other(e.to_string()))?;

        // Stage 2: video download, bounded by the stage timeout.
        if let Some(progress) = progress {
            progress.stage(2, "Downloading video").await;
        }
        let options = build_download_options(
            video_id,
            date_dir.to_path_buf(),
            &self.config.preferred_quality,
            &self.config.subtitle_languages,
            self.config.max_video_size_mb,
        )?;
        let video_metadata = tokio::time::timeout(
            DOWNLOAD_TIMEOUT,
            self.downloader.download(url, &options),
        )
        .await
        .map_err(|_| CoreError::Other("Video download timed out".to_string()))??;

        // Stage 3: VTT fallback when the API had nothing.
        if outcome.text.is_empty() {
            if let Some(subtitle_path) = video_metadata.subtitle_file_path.clone() {
                if let Some(progress) = progress {
                    progress.stage(3, "Processing subtitles").await;
                }
                let path = PathBuf::from(subtitle_path);
                let parsed = tokio::task::spawn_blocking(move || vtt::parse_vtt_file(&path))
                    .await
                    .map_err(|e| CoreError::Other(e.to_string()))?;
                match parsed {
                    Ok((text, lang)) if !text.is_empty() => {
                        tracing::info!(
                            video_id,
                            subtitle_lang = lang.as_deref(),
                            cid = correlation_id,
                            "transcript_vtt_fallback_success"
                        );
                        outcome = TranscriptOutcome {
                            text,
                            language: lang.unwrap_or(outcome.language),
                            auto_generated: true,
                            source: "vtt".to_string(),
                        };
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(video_id, error = %e, "transcript_vtt_parse_failed");
                    }
                }
            }
        }

        if outcome.text.is_empty() {
            return Err(CoreError::Other(format!(
                "No transcript or subtitles available for this video. Error ID: {}",
                correlation_id.unwrap_or("unknown")
            )));
        }

        let detected_language = detect_language(&outcome.text);
        let content = combine_metadata_and_transcript(&video_metadata, &outcome.text);

        self.repo
            .update_video_download(
                download_id,
                VideoDownloadUpdate {
                    metadata: video_metadata.clone(),
                    transcript_text: outcome.text.clone(),
                    subtitle_language: outcome.language.clone(),
                    auto_generated: outcome.auto_generated,
                    transcript_source: outcome.source.clone(),
                },
            )
            .await?;
        self.repo
            .update_video_download_status(download_id, DownloadStatus::Completed, None)
            .await?;
        self.repo
            .update_request_status(request_id, RequestStatus::Ok)
            .await?;
        self.repo
            .update_request_lang_detected(request_id, &detected_language)
            .await?;

        tracing::info!(
            video_id,
            request_id,
            download_id,
            file_size = video_metadata.file_size_bytes,
            cid = correlation_id,
            "youtube_download_complete"
        );

        Ok(VideoExtraction {
            request_id,
            content,
            source: outcome.source,
            detected_language,
            metadata: video_metadata,
        })
    }

    fn build_cached_extraction(
        &self,
        request_id: i64,
        download: VideoDownloadRecord,
    ) -> Result<VideoExtraction> {
        let metadata = download.metadata.unwrap_or_default();
        let transcript = download.transcript_text.unwrap_or_default();
        let source = download
            .transcript_source
            .unwrap_or_else(|| "cached".to_string());
        let detected_language = download
            .subtitle_language
            .unwrap_or_else(|| detect_language(&transcript));
        let content = combine_metadata_and_transcript(&metadata, &transcript);

        if content.trim().is_empty() {
            return Err(CoreError::Other(
                "Cached video found but no transcript or subtitles were available. \
                 Try re-downloading with subtitles enabled."
                    .to_string(),
            ));
        }

        Ok(VideoExtraction {
            request_id,
            content,
            source,
            detected_language,
            metadata,
        })
    }

    /// Enforce the storage budget, auto-cleaning when over 90% of the max.
    async fn check_storage_limits(&self) -> Result<()> {
        let root = self.config.storage_path.clone();
        let mut usage =
            tokio::task::spawn_blocking(move || storage::calculate_storage_usage(&root))
                .await
                .map_err(|e| CoreError::Other(e.to_string()))?;

        let max_bytes = self.config.max_storage_gb.saturating_mul(BYTES_PER_GB);
        let threshold = (max_bytes as f64 * 0.9) as u64;

        if usage > threshold && self.config.auto_cleanup_enabled {
            let root = self.config.storage_path.clone();
            let retention_days = self.config.cleanup_after_days;
            let reclaimed = tokio::task::spawn_blocking(move || {
                storage::auto_cleanup_storage(&root, usage, threshold, retention_days, Utc::now())
            })
            .await
            .map_err(|e| CoreError::Other(e.to_string()))?;

            let root = self.config.storage_path.clone();
            usage = tokio::task::spawn_blocking(move || storage::calculate_storage_usage(&root))
                .await
                .map_err(|e| CoreError::Other(e.to_string()))?;
            tracing::info!(
                current_gb = usage as f64 / BYTES_PER_GB as f64,
                max_gb = self.config.max_storage_gb,
                reclaimed_gb = reclaimed as f64 / BYTES_PER_GB as f64,
                "storage_cleanup_attempted"
            );
        }

        if usage > max_bytes {
            return Err(CoreError::StorageBudgetExceeded);
        }
        Ok(())
    }
}
