//! WebVTT subtitle parsing, the last-resort transcript source.
//!
//! Auto-generated subtitle files repeat lines across overlapping cues and
//! embed inline timing tags; both are stripped so the text reads like a
//! transcript.

use std::path::Path;

/// Language codes recognized in subtitle filenames
/// (`<video_id>_<title>.<lang>.vtt`).
pub const KNOWN_LANG_CODES: &[&str] = &[
    "en", "es", "de", "fr", "it", "pt", "ru", "ja", "ko", "zh", "nl", "pl", "tr", "ar", "hi",
    "uk", "cs", "sv",
];

/// Strip inline VTT tags: `<00:00:01.000>`, `<c>`, `</c>`, etc.
fn strip_inline_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for ch in line.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Parse VTT content into plain text: drops the header, cue timings, cue
/// numbers and NOTE/STYLE blocks, strips inline tags, and de-duplicates
/// consecutive repeated lines.
pub fn parse_vtt_content(content: &str) -> String {
    let mut lines_out: Vec<String> = Vec::new();
    let mut in_note_block = false;

    for raw_line in content.lines() {
        let line = raw_line.trim();

        if line.starts_with("WEBVTT") {
            continue;
        }
        if line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION") {
            in_note_block = true;
            continue;
        }
        if line.is_empty() {
            in_note_block = false;
            continue;
        }
        if in_note_block {
            continue;
        }
        if line.contains("-->") {
            continue;
        }
        // Bare cue numbers.
        if line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let cleaned = strip_inline_tags(line);
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }
        if lines_out.last().map(String::as_str) == Some(cleaned) {
            continue;
        }
        lines_out.push(cleaned.to_string());
    }

    lines_out.join(" ")
}

/// Infer the subtitle language from a filename segment matching a known
/// code (`..._Title.en.vtt` → `en`).
pub fn language_from_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let mut segments: Vec<&str> = name.split('.').collect();
    // Drop the extension.
    segments.pop();
    segments
        .iter()
        .rev()
        .find(|segment| KNOWN_LANG_CODES.contains(&segment.to_lowercase().as_str()))
        .map(|segment| segment.to_lowercase())
}

/// Read and parse a VTT file, returning `(text, language)`.
pub fn parse_vtt_file(path: &Path) -> std::io::Result<(String, Option<String>)> {
    let content = std::fs::read_to_string(path)?;
    Ok((parse_vtt_content(&content), language_from_filename(path)))
}
