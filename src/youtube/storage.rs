//! Storage accounting and cleanup for downloaded video files.
//!
//! Two cleanup paths: retention-based auto-cleanup when usage nears the
//! budget, and partial-file cleanup after a failed or cancelled download.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

/// Suffixes a partial or completed download can leave behind.
const PARTIAL_SUFFIXES: &[&str] = &[".mp4.part", ".m4a", ".mp4"];

/// Total bytes used under `root`, recursively. Unreadable entries are
/// skipped.
pub fn calculate_storage_usage(root: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += calculate_storage_usage(&path);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Delete files older than `retention_days`, oldest first, until usage is
/// back under `target_bytes` or candidates run out. Returns reclaimed
/// bytes. Directories left empty are removed.
pub fn auto_cleanup_storage(
    root: &Path,
    current_usage: u64,
    target_bytes: u64,
    retention_days: u32,
    now: DateTime<Utc>,
) -> u64 {
    let cutoff = now - chrono::Duration::days(retention_days as i64);

    let mut candidates: Vec<(DateTime<Utc>, std::path::PathBuf, u64)> = Vec::new();
    collect_old_files(root, cutoff, &mut candidates);
    candidates.sort_by_key(|(modified, _, _)| *modified);

    let mut usage = current_usage;
    let mut reclaimed = 0u64;
    for (_, path, size) in candidates {
        if usage <= target_bytes {
            break;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                usage = usage.saturating_sub(size);
                reclaimed += size;
                tracing::debug!(path = %path.display(), size, "storage_cleanup_removed_file");
                if let Some(parent) = path.parent() {
                    remove_dir_if_empty(parent);
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "storage_cleanup_remove_failed");
            }
        }
    }
    reclaimed
}

fn collect_old_files(
    dir: &Path,
    cutoff: DateTime<Utc>,
    out: &mut Vec<(DateTime<Utc>, std::path::PathBuf, u64)>,
) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_old_files(&path, cutoff, out);
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let modified: DateTime<Utc> = modified.into();
        if modified < cutoff {
            out.push((modified, path, meta.len()));
        }
    }
}

/// Remove every partial artifact of a failed download: files in
/// `output_dir` named `<video_id>_*` with a known suffix. Unrelated files
/// are untouched. The directory itself is removed when it ends up empty.
/// Returns the number of files deleted.
pub fn cleanup_partial_download_files(output_dir: &Path, video_id: &str) -> usize {
    let prefix = format!("{video_id}_");
    let mut deleted = 0usize;

    let Ok(entries) = fs::read_dir(output_dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&prefix) {
            continue;
        }
        if !PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                tracing::debug!(path = %path.display(), "partial_download_file_removed");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "partial_download_remove_failed");
            }
        }
    }

    remove_dir_if_empty(output_dir);
    deleted
}

fn remove_dir_if_empty(dir: &Path) {
    if let Ok(mut entries) = fs::read_dir(dir) {
        if entries.next().is_none() {
            let _ = fs::remove_dir(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_file(path: &Path, bytes: usize) {
        let mut f = File::create(path).unwrap();
        f.write_all(&vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn test_usage_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("20240101");
        fs::create_dir(&sub).unwrap();
        write_file(&dir.path().join("a.mp4"), 100);
        write_file(&sub.join("b.mp4"), 50);
        assert_eq!(calculate_storage_usage(dir.path()), 150);
    }

    #[test]
    fn test_partial_cleanup_targets_only_video_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("vid123_Title.mp4.part"), 10);
        write_file(&dir.path().join("vid123_Title.m4a"), 10);
        write_file(&dir.path().join("vid123_Title.mp4"), 10);
        write_file(&dir.path().join("vid123_Title.en.vtt"), 10);
        write_file(&dir.path().join("otherVid_Foo.mp4"), 10);

        let deleted = cleanup_partial_download_files(dir.path(), "vid123");
        assert_eq!(deleted, 3);
        assert!(dir.path().join("otherVid_Foo.mp4").exists());
        // The subtitle file has no matching suffix and survives.
        assert!(dir.path().join("vid123_Title.en.vtt").exists());
    }

    #[test]
    fn test_partial_cleanup_removes_empty_dir() {
        let parent = tempfile::tempdir().unwrap();
        let date_dir = parent.path().join("20240101");
        fs::create_dir(&date_dir).unwrap();
        write_file(&date_dir.join("vid123_Title.mp4.part"), 10);

        cleanup_partial_download_files(&date_dir, "vid123");
        assert!(!date_dir.exists());
    }

    #[test]
    fn test_partial_cleanup_keeps_dir_with_other_files() {
        let parent = tempfile::tempdir().unwrap();
        let date_dir = parent.path().join("20240101");
        fs::create_dir(&date_dir).unwrap();
        write_file(&date_dir.join("vid123_Title.mp4"), 10);
        write_file(&date_dir.join("otherVid_Foo.mp4"), 10);

        cleanup_partial_download_files(&date_dir, "vid123");
        assert!(date_dir.exists());
        assert!(date_dir.join("otherVid_Foo.mp4").exists());
    }

    #[test]
    fn test_auto_cleanup_oldest_first_until_target() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        let older = dir.path().join("older.mp4");
        write_file(&older, 100);
        write_file(&old, 100);

        // Backdate both files past the retention window, `older` further.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(90 * 86_400);
        let further = past - std::time::Duration::from_secs(86_400);
        set_mtime(&old, past);
        set_mtime(&older, further);

        // Target leaves room for exactly one file.
        let reclaimed = auto_cleanup_storage(dir.path(), 200, 100, 30, Utc::now());
        assert_eq!(reclaimed, 100);
        assert!(!older.exists(), "oldest file should go first");
        assert!(old.exists());
    }

    #[test]
    fn test_auto_cleanup_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.mp4");
        write_file(&fresh, 100);

        let reclaimed = auto_cleanup_storage(dir.path(), 100, 0, 30, Utc::now());
        assert_eq!(reclaimed, 0);
        assert!(fresh.exists());
    }

    fn set_mtime(path: &Path, time: std::time::SystemTime) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }
}
