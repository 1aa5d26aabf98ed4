//! Path utilities for safe file naming.
//!
//! This module provides helpers for lossy name extraction, hidden-entry
//! detection, filesystem-safe titles, and the naming contracts used for
//! exported pages and packaged volumes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Width of the zero-padded sequence number in exported page names.
pub const SEQUENCE_WIDTH: usize = 5;

/// Gets the file name from a path with fallback to lossy conversion.
///
/// # Arguments
///
/// * `path` - The path to extract the file name from
///
/// # Returns
///
/// * `String` - The file name, using lossy conversion if necessary
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Checks if a filename starts with a dot (hidden file) using safe conversion.
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Sanitizes a filename by replacing invalid characters with safe alternatives.
///
/// # Arguments
///
/// * `filename` - The filename to sanitize
///
/// # Returns
///
/// * `String` - The sanitized filename
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// File name of an exported page, e.g. `00042.jpg`.
pub fn sequence_file_name(sequence: u32) -> String {
    format!("{:0width$}.jpg", sequence, width = SEQUENCE_WIDTH)
}

/// Title handed to the packager and used as the artifact stem: `"<series> - vNN"`.
pub fn volume_title(series: &str, volume: u32) -> String {
    format!("{} - v{:02}", series, volume)
}

/// Name of the per-volume staging directory inside `temp/`, e.g. `vol_03`.
pub fn volume_dir_name(volume: u32) -> String {
    format!("vol_{:02}", volume)
}

/// Picks the final artifact path inside `dir` for `stem.ext`.
///
/// When that name is taken, a `_YYYYmmdd_HHMMSS` suffix taken from `now` is
/// appended instead of overwriting the existing file.
pub fn collision_free_path(dir: &Path, stem: &str, ext: &str, now: DateTime<Local>) -> PathBuf {
    let stem = sanitize_filename(stem);
    let candidate = dir.join(format!("{}.{}", stem, ext));
    if !candidate.exists() {
        return candidate;
    }
    dir.join(format!("{}_{}.{}", stem, now.format("%Y%m%d_%H%M%S"), ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_get_file_name_lossy() {
        let path = Path::new("test/file.txt");
        assert_eq!(get_file_name_lossy(path), "file.txt");
    }

    #[test]
    fn test_is_hidden_file() {
        assert!(is_hidden_file(Path::new(".DS_Store")));
        assert!(!is_hidden_file(Path::new("001.jpg")));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test<file>"), "test-file-");
        assert_eq!(sanitize_filename("Re:Zero - v01"), "Re-Zero - v01");
        assert_eq!(sanitize_filename("a/b\\c"), "a-b-c");
        assert_eq!(sanitize_filename("normal_file.txt"), "normal_file.txt");
    }

    #[test]
    fn test_naming_contracts() {
        assert_eq!(sequence_file_name(1), "00001.jpg");
        assert_eq!(sequence_file_name(12345), "12345.jpg");
        assert_eq!(volume_title("Berserk", 3), "Berserk - v03");
        assert_eq!(volume_title("Berserk", 112), "Berserk - v112");
        assert_eq!(volume_dir_name(7), "vol_07");
    }

    #[test]
    fn test_collision_free_path_appends_timestamp() {
        let dir = std::env::temp_dir().join(format!("seisho-collision-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();

        let first = collision_free_path(&dir, "Series - v01", "mobi", now);
        assert_eq!(first, dir.join("Series - v01.mobi"));

        std::fs::write(&first, b"x").unwrap();
        let second = collision_free_path(&dir, "Series - v01", "mobi", now);
        assert_eq!(second, dir.join("Series - v01_20240506_070809.mobi"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
