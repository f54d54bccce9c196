//! Video metadata and the transcript header handed to summarization.

use serde::{Deserialize, Serialize};

/// Attributes extracted from a downloaded video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    /// Duration in seconds.
    pub duration_sec: Option<u64>,
    /// Upload date as `YYYYMMDD`.
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    /// Resolution label like "1080p".
    pub resolution: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub format_id: Option<String>,
    pub video_file_path: Option<String>,
    pub subtitle_file_path: Option<String>,
    pub thumbnail_file_path: Option<String>,
}

/// Render seconds as `M:SS` or `H:MM:SS`.
pub fn format_duration(duration_sec: Option<u64>) -> String {
    match duration_sec {
        None => "unknown".to_string(),
        Some(total) => {
            let hours = total / 3600;
            let minutes = (total % 3600) / 60;
            let seconds = total % 60;
            if hours > 0 {
                format!("{hours}:{minutes:02}:{seconds:02}")
            } else {
                format!("{minutes}:{seconds:02}")
            }
        }
    }
}

/// Compact metadata header prepended to the transcript so the summarizer
/// has context beyond the spoken words.
pub fn format_metadata_header(metadata: &VideoMetadata) -> String {
    let mut lines = Vec::new();
    if let Some(title) = &metadata.title {
        lines.push(format!("Title: {title}"));
    }
    if let Some(channel) = &metadata.channel {
        lines.push(format!("Channel: {channel}"));
    }
    lines.push(format!("Duration: {}", format_duration(metadata.duration_sec)));
    if let Some(views) = metadata.view_count {
        lines.push(format!("Views: {views}"));
    }
    if let Some(upload_date) = &metadata.upload_date {
        lines.push(format!("Uploaded: {upload_date}"));
    }
    lines.join("\n")
}

/// Header plus transcript, blank-line separated. Empty transcripts come
/// back empty so callers can tell "no content" apart from "header only".
pub fn combine_metadata_and_transcript(metadata: &VideoMetadata, transcript: &str) -> String {
    if transcript.trim().is_empty() {
        return String::new();
    }
    format!("{}\n\n{}", format_metadata_header(metadata), transcript)
}

/// Crude transcript language sniff: scripts with a heavy non-Latin
/// presence are tagged, everything else defaults to English.
pub fn detect_language(text: &str) -> String {
    let mut cyrillic = 0usize;
    let mut cjk = 0usize;
    let mut letters = 0usize;
    for ch in text.chars().take(4000) {
        if ch.is_alphabetic() {
            letters += 1;
            let code = ch as u32;
            if (0x0400..=0x04FF).contains(&code) {
                cyrillic += 1;
            } else if (0x4E00..=0x9FFF).contains(&code) || (0x3040..=0x30FF).contains(&code) {
                cjk += 1;
            }
        }
    }
    if letters == 0 {
        return "en".to_string();
    }
    if cyrillic * 100 / letters > 30 {
        "ru".to_string()
    } else if cjk * 100 / letters > 30 {
        "ja".to_string()
    } else {
        "en".to_string()
    }
}
