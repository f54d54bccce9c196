//! Transcript acquisition via the transcript API (stage 1).
//!
//! Preference order: a manually created transcript in the configured
//! language list, then an auto-generated one in the first matching
//! language. Disabled transcripts are "no transcript, keep going";
//! unavailable videos are fatal.

use crate::backoff::{sleep_backoff, BackoffConfig};
use std::time::Duration;
use thiserror::Error;

/// Per-attempt timeout for transcript API calls.
pub const TRANSCRIPT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Attempts before giving up on the transcript API.
pub const TRANSCRIPT_MAX_RETRIES: u32 = 3;
/// Transcript text cap (~125k tokens).
pub const MAX_TRANSCRIPT_CHARS: usize = 500_000;

/// Source tag recorded for API-derived transcripts.
pub const TRANSCRIPT_SOURCE_API: &str = "transcript-api";

/// One timed transcript segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

/// Transcripts advertised for a video, split by origin.
#[derive(Debug, Clone, Default)]
pub struct AvailableTranscripts {
    pub manual_languages: Vec<String>,
    pub generated_languages: Vec<String>,
}

/// Which advertised transcript to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSelection {
    pub language: String,
    pub auto_generated: bool,
}

/// Failures the transcript service can signal.
#[derive(Error, Debug)]
pub enum TranscriptError {
    /// The uploader disabled transcripts; not fatal for the pipeline.
    #[error("transcripts are disabled for this video")]
    Disabled,
    /// The video is gone or private; fatal.
    #[error("video is unavailable or does not exist")]
    VideoUnavailable,
    /// No transcript in any requested language.
    #[error("no transcript found for the requested languages")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

/// Third-party transcript service seam.
#[async_trait::async_trait]
pub trait TranscriptSource: Send + Sync {
    /// List transcripts advertised for a video.
    async fn list(&self, video_id: &str) -> Result<AvailableTranscripts, TranscriptError>;

    /// Fetch the segments of one advertised transcript.
    async fn fetch(
        &self,
        video_id: &str,
        selection: &TranscriptSelection,
    ) -> Result<Vec<TranscriptSegment>, TranscriptError>;
}

/// Outcome of the transcript stage. An empty `text` means "continue to the
/// download stage and hope for subtitles".
#[derive(Debug, Clone, Default)]
pub struct TranscriptOutcome {
    pub text: String,
    pub language: String,
    pub auto_generated: bool,
    pub source: String,
}

impl TranscriptOutcome {
    fn empty() -> Self {
        Self {
            text: String::new(),
            language: "en".to_string(),
            auto_generated: false,
            source: TRANSCRIPT_SOURCE_API.to_string(),
        }
    }
}

/// Join transcript segments into one text block, collapsing whitespace and
/// truncating at `max_chars`.
pub fn format_transcript(segments: &[TranscriptSegment], max_chars: usize) -> String {
    let joined = segments
        .iter()
        .map(|segment| segment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mut collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() > max_chars {
        tracing::warn!(
            original_length = collapsed.len(),
            truncated_to = max_chars,
            "transcript_truncated"
        );
        let mut cut = max_chars;
        while !collapsed.is_char_boundary(cut) {
            cut -= 1;
        }
        collapsed.truncate(cut);
    }
    collapsed
}

fn select_transcript(
    available: &AvailableTranscripts,
    preferred: &[String],
) -> Option<TranscriptSelection> {
    for lang in preferred {
        if available
            .manual_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(lang))
        {
            return Some(TranscriptSelection {
                language: lang.clone(),
                auto_generated: false,
            });
        }
    }
    for lang in preferred {
        if let Some(found) = available
            .generated_languages
            .iter()
            .find(|l| l.eq_ignore_ascii_case(lang))
        {
            return Some(TranscriptSelection {
                language: found.clone(),
                auto_generated: true,
            });
        }
    }
    None
}

/// Fetch a transcript with per-attempt timeout and light retry.
///
/// `Disabled` and `NotFound` come back as an empty outcome; only
/// `VideoUnavailable` is surfaced as an error.
pub async fn extract_transcript(
    source: &dyn TranscriptSource,
    video_id: &str,
    preferred_langs: &[String],
    max_chars: usize,
) -> Result<TranscriptOutcome, TranscriptError> {
    let backoff = BackoffConfig::with_base(Duration::from_secs(1));

    for attempt in 0..TRANSCRIPT_MAX_RETRIES {
        let listed = tokio::time::timeout(TRANSCRIPT_FETCH_TIMEOUT, source.list(video_id)).await;
        let available = match listed {
            Ok(Ok(available)) => available,
            Ok(Err(TranscriptError::Disabled)) => {
                tracing::warn!(video_id, "transcripts_disabled_continuing_without");
                return Ok(TranscriptOutcome::empty());
            }
            Ok(Err(TranscriptError::VideoUnavailable)) => {
                tracing::error!(video_id, "transcript_video_unavailable");
                return Err(TranscriptError::VideoUnavailable);
            }
            Ok(Err(TranscriptError::NotFound)) => {
                tracing::warn!(video_id, "transcript_not_found");
                return Ok(TranscriptOutcome::empty());
            }
            Ok(Err(TranscriptError::Other(message))) => {
                tracing::warn!(video_id, error = %message, attempt = attempt + 1, "transcript_list_failed");
                if attempt + 1 < TRANSCRIPT_MAX_RETRIES {
                    sleep_backoff(attempt, &backoff).await;
                    continue;
                }
                return Ok(TranscriptOutcome::empty());
            }
            Err(_) => {
                tracing::warn!(video_id, attempt = attempt + 1, "transcript_list_timeout");
                if attempt + 1 < TRANSCRIPT_MAX_RETRIES {
                    sleep_backoff(attempt, &backoff).await;
                    continue;
                }
                return Ok(TranscriptOutcome::empty());
            }
        };

        let Some(selection) = select_transcript(&available, preferred_langs) else {
            tracing::warn!(video_id, "transcript_no_language_match");
            return Ok(TranscriptOutcome::empty());
        };

        tracing::info!(
            video_id,
            language = %selection.language,
            auto_generated = selection.auto_generated,
            "transcript_selected"
        );

        let fetched =
            tokio::time::timeout(TRANSCRIPT_FETCH_TIMEOUT, source.fetch(video_id, &selection))
                .await;
        match fetched {
            Ok(Ok(segments)) => {
                let text = format_transcript(&segments, max_chars);
                tracing::info!(video_id, length = text.len(), "transcript_extracted");
                return Ok(TranscriptOutcome {
                    text,
                    language: selection.language,
                    auto_generated: selection.auto_generated,
                    source: TRANSCRIPT_SOURCE_API.to_string(),
                });
            }
            Ok(Err(TranscriptError::VideoUnavailable)) => {
                return Err(TranscriptError::VideoUnavailable);
            }
            Ok(Err(e)) => {
                tracing::warn!(video_id, error = %e, attempt = attempt + 1, "transcript_fetch_failed");
            }
            Err(_) => {
                tracing::warn!(video_id, attempt = attempt + 1, "transcript_fetch_timeout");
            }
        }

        if attempt + 1 < TRANSCRIPT_MAX_RETRIES {
            sleep_backoff(attempt, &backoff).await;
        }
    }

    tracing::warn!(video_id, "transcript_extraction_exhausted");
    Ok(TranscriptOutcome::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSource {
        available: AvailableTranscripts,
        segments: Vec<TranscriptSegment>,
        list_error: Option<fn() -> TranscriptError>,
        list_calls: AtomicU32,
    }

    impl FakeSource {
        fn with_manual(lang: &str, text: &str) -> Self {
            Self {
                available: AvailableTranscripts {
                    manual_languages: vec![lang.to_string()],
                    generated_languages: vec![],
                },
                segments: vec![TranscriptSegment {
                    text: text.to_string(),
                    start: 0.0,
                    duration: 1.0,
                }],
                list_error: None,
                list_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TranscriptSource for FakeSource {
        async fn list(&self, _video_id: &str) -> Result<AvailableTranscripts, TranscriptError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(make_error) = self.list_error {
                return Err(make_error());
            }
            Ok(self.available.clone())
        }

        async fn fetch(
            &self,
            _video_id: &str,
            _selection: &TranscriptSelection,
        ) -> Result<Vec<TranscriptSegment>, TranscriptError> {
            Ok(self.segments.clone())
        }
    }

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_format_transcript_collapses_whitespace() {
        let segments = vec![
            TranscriptSegment { text: " hello \n world ".into(), start: 0.0, duration: 1.0 },
            TranscriptSegment { text: "".into(), start: 1.0, duration: 1.0 },
            TranscriptSegment { text: "again".into(), start: 2.0, duration: 1.0 },
        ];
        assert_eq!(format_transcript(&segments, 1000), "hello world again");
    }

    #[test]
    fn test_format_transcript_truncates() {
        let segments = vec![TranscriptSegment {
            text: "a".repeat(100),
            start: 0.0,
            duration: 1.0,
        }];
        assert_eq!(format_transcript(&segments, 10).len(), 10);
    }

    #[test]
    fn test_selection_prefers_manual() {
        let available = AvailableTranscripts {
            manual_languages: vec!["de".into()],
            generated_languages: vec!["en".into()],
        };
        let selection = select_transcript(&available, &langs(&["en", "de"])).unwrap();
        // "en" has no manual transcript but "de" does; manual wins over
        // the generated "en".
        assert_eq!(selection.language, "de");
        assert!(!selection.auto_generated);
    }

    #[test]
    fn test_selection_falls_back_to_generated() {
        let available = AvailableTranscripts {
            manual_languages: vec![],
            generated_languages: vec!["en".into()],
        };
        let selection = select_transcript(&available, &langs(&["en"])).unwrap();
        assert!(selection.auto_generated);
    }

    #[tokio::test]
    async fn test_extract_manual_transcript() {
        let source = FakeSource::with_manual("en", "spoken words");
        let outcome = extract_transcript(&source, "vid", &langs(&["en"]), 1000)
            .await
            .unwrap();
        assert_eq!(outcome.text, "spoken words");
        assert_eq!(outcome.language, "en");
        assert!(!outcome.auto_generated);
        assert_eq!(outcome.source, TRANSCRIPT_SOURCE_API);
    }

    #[tokio::test]
    async fn test_disabled_is_empty_not_error() {
        let mut source = FakeSource::with_manual("en", "x");
        source.list_error = Some(|| TranscriptError::Disabled);
        let outcome = extract_transcript(&source, "vid", &langs(&["en"]), 1000)
            .await
            .unwrap();
        assert!(outcome.text.is_empty());
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_is_fatal() {
        let mut source = FakeSource::with_manual("en", "x");
        source.list_error = Some(|| TranscriptError::VideoUnavailable);
        let err = extract_transcript(&source, "vid", &langs(&["en"]), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptError::VideoUnavailable));
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_empty() {
        let mut source = FakeSource::with_manual("en", "x");
        source.list_error = Some(|| TranscriptError::Other("flaky".into()));
        let outcome = extract_transcript(&source, "vid", &langs(&["en"]), 1000)
            .await
            .unwrap();
        assert!(outcome.text.is_empty());
        assert_eq!(source.list_calls.load(Ordering::SeqCst), TRANSCRIPT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_no_language_match_is_empty() {
        let source = FakeSource::with_manual("fr", "bonjour");
        let outcome = extract_transcript(&source, "vid", &langs(&["en"]), 1000)
            .await
            .unwrap();
        assert!(outcome.text.is_empty());
    }
}
