//! URL normalization and dedupe hashing.
//!
//! Every dedupe decision in the core (ingestion requests, sync records)
//! keys on the SHA-256 of the normalized URL. Historical sync rows may hold
//! only the first 16 hex chars; [`check_hash_in_set`] bridges that format.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::Url;

/// Length of the historical short-form hash.
pub const LEGACY_HASH_LENGTH: usize = 16;

/// Query parameters stripped during normalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
];

/// Normalize a URL for deduplication.
///
/// Lowercases scheme and host, strips the fragment, removes common tracking
/// parameters, sorts the remaining query pairs, and collapses a trailing
/// slash (except for the root path). Returns `None` when the input does not
/// parse as an absolute URL.
///
/// # Examples
///
/// ```
/// use digest_pipeline::url_norm::normalize_url;
///
/// assert_eq!(
///     normalize_url("https://Example.com/a/?utm_source=x").as_deref(),
///     Some("https://example.com/a")
/// );
/// ```
pub fn normalize_url(input: &str) -> Option<String> {
    let parsed = Url::parse(input).ok()?;
    if !parsed.has_host() {
        return None;
    }

    let scheme = parsed.scheme().to_lowercase();
    let host = parsed.host_str()?.to_lowercase();
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();

    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }
    if path.ends_with('/') && path != "/" {
        path = path.trim_end_matches('/').to_string();
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let query = if pairs.is_empty() {
        String::new()
    } else {
        let encoded = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("?{encoded}")
    };

    Some(format!("{scheme}://{host}{port}{path}{query}"))
}

/// 64-hex-char SHA-256 of a (normalized) URL.
pub fn url_hash_sha256(normalized_url: &str) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(normalized_url.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Hash a raw URL for sync dedupe: normalize first, fall back to the raw
/// string when normalization fails.
pub fn sync_url_hash(url: &str) -> String {
    let normalized = normalize_url(url).unwrap_or_else(|| url.to_string());
    url_hash_sha256(&normalized)
}

/// Membership test that also accepts the legacy 16-char short hash.
pub fn check_hash_in_set(url_hash: &str, hashes: &HashSet<String>) -> bool {
    if hashes.contains(url_hash) {
        return true;
    }
    if url_hash.len() >= LEGACY_HASH_LENGTH {
        return hashes.contains(&url_hash[..LEGACY_HASH_LENGTH]);
    }
    false
}

/// Quick check whether a piece of text contains something URL-shaped.
pub fn looks_like_url(text: &str) -> bool {
    text.split_whitespace().any(|token| {
        let lower = token.to_lowercase();
        (lower.starts_with("http://") || lower.starts_with("https://"))
            && Url::parse(token).map(|u| u.has_host()).unwrap_or(false)
    })
}

/// Extract the 11-character video id from a YouTube URL.
///
/// Handles `watch?v=`, `youtu.be/`, `/shorts/`, `/embed/` and `/live/`
/// forms. Returns `None` for anything else.
pub fn extract_youtube_video_id(input: &str) -> Option<String> {
    let parsed = Url::parse(input).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let candidate = if host == "youtu.be" {
        parsed.path_segments()?.next().map(|s| s.to_string())
    } else if host == "youtube.com" || host == "m.youtube.com" || host == "music.youtube.com" {
        let segments: Vec<&str> = parsed.path_segments()?.collect();
        match segments.as_slice() {
            ["watch", ..] => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            ["shorts", id, ..] | ["embed", id, ..] | ["live", id, ..] => Some(id.to_string()),
            _ => None,
        }
    } else {
        None
    }?;

    let id: String = candidate
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if id.len() == 11 {
        Some(id)
    } else {
        None
    }
}
