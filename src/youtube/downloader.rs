//! Video download stage (stage 2): options, the downloader seam, and
//! error classification.
//!
//! The actual download runs through an external tool behind
//! [`VideoDownloader`]; the pipeline wraps it in the stage timeout and
//! owns cleanup. Provider error strings are folded into a handful of
//! human-readable cases.

use crate::error::{CoreError, Result};
use crate::youtube::metadata::VideoMetadata;
use std::path::PathBuf;
use std::time::Duration;

/// Outer timeout around the whole download stage.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Quality labels accepted in configuration.
pub const VALID_QUALITIES: &[&str] = &["360p", "480p", "720p", "1080p", "1440p", "2160p"];

/// Options handed to the downloader implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub video_id: String,
    pub output_dir: PathBuf,
    /// Format selector like `bestvideo[height<=1080]+bestaudio/best[height<=1080]`.
    pub format_selector: String,
    /// Container for the merged output.
    pub merge_format: String,
    /// Output template: `<video_id>_<title>.<ext>` under the date directory.
    pub output_template: String,
    pub write_subtitles: bool,
    pub subtitle_languages: Vec<String>,
    pub max_file_size_mb: u64,
}

/// Build downloader options from the configured quality and languages.
pub fn build_download_options(
    video_id: &str,
    output_dir: PathBuf,
    preferred_quality: &str,
    subtitle_languages: &[String],
    max_file_size_mb: u64,
) -> Result<DownloadOptions> {
    if !VALID_QUALITIES.contains(&preferred_quality) {
        return Err(CoreError::config(
            format!("preferred quality must be one of {VALID_QUALITIES:?}"),
            "preferred_quality",
            preferred_quality,
        ));
    }
    let height: u32 = preferred_quality
        .trim_end_matches('p')
        .parse()
        .expect("validated quality label");

    Ok(DownloadOptions {
        video_id: video_id.to_string(),
        output_dir,
        format_selector: format!(
            "bestvideo[height<={height}]+bestaudio/best[height<={height}]"
        ),
        merge_format: "mp4".to_string(),
        output_template: format!("{video_id}_%(title)s.%(ext)s"),
        write_subtitles: !subtitle_languages.is_empty(),
        subtitle_languages: subtitle_languages.to_vec(),
        max_file_size_mb,
    })
}

/// Seam over the blocking download tool. Implementations must run the
/// blocking work off the async scheduler (`spawn_blocking`).
#[async_trait::async_trait]
pub trait VideoDownloader: Send + Sync {
    async fn download(&self, url: &str, options: &DownloadOptions) -> Result<VideoMetadata>;
}

/// Map a raw downloader error string to a human-readable message.
///
/// The tool reports everything as text; these are the cases users actually
/// hit, in match priority order.
pub fn classify_download_error(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("age-restricted") || lower.contains("age restricted") || lower.contains("sign in to confirm your age")
    {
        "Video is age-restricted and cannot be downloaded".to_string()
    } else if lower.contains("not available in your country") || lower.contains("geo") && lower.contains("block") {
        "Video is geo-blocked in the server's region".to_string()
    } else if lower.contains("private video") || lower.contains("this video is private") {
        "Video is private".to_string()
    } else if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate-limited") || lower.contains("rate limited")
    {
        "Download was rate-limited by the video host; try again later".to_string()
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "Download timed out".to_string()
    } else if lower.contains("404") || lower.contains("not found") || lower.contains("does not exist") {
        "Video not found (it may have been removed)".to_string()
    } else {
        format!("Video download failed: {raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options_format_selector() {
        let options = build_download_options(
            "vid123",
            PathBuf::from("/tmp/videos/20240101"),
            "1080p",
            &["en".to_string()],
            2048,
        )
        .unwrap();
        assert_eq!(
            options.format_selector,
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]"
        );
        assert_eq!(options.merge_format, "mp4");
        assert!(options.write_subtitles);
        assert_eq!(options.output_template, "vid123_%(title)s.%(ext)s");
    }

    #[test]
    fn test_build_options_rejects_bad_quality() {
        let err = build_download_options(
            "vid123",
            PathBuf::from("/tmp"),
            "900p",
            &[],
            2048,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn test_no_subtitle_langs_disables_subtitles() {
        let options =
            build_download_options("vid123", PathBuf::from("/tmp"), "720p", &[], 2048).unwrap();
        assert!(!options.write_subtitles);
    }

    #[test]
    fn test_error_classification() {
        assert!(classify_download_error("ERROR: Sign in to confirm your age")
            .contains("age-restricted"));
        assert!(classify_download_error("This video is not available in your country")
            .contains("geo-blocked"));
        assert!(classify_download_error("ERROR: Private video").contains("private"));
        assert!(classify_download_error("HTTP Error 429: Too Many Requests")
            .contains("rate-limited"));
        assert!(classify_download_error("Connection timed out").contains("timed out"));
        assert!(classify_download_error("HTTP Error 404: Not Found").contains("not found"));
        assert!(classify_download_error("something odd").starts_with("Video download failed"));
    }
}
