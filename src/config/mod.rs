//! Application configuration management
//!
//! Loaded once at startup (`Config::from_env`) and treated as immutable for
//! the lifetime of the process, per the concurrency model's shared-resource
//! policy: any runtime change requires the controller to pass back through
//! `idle` and restart with a fresh `Config`.

use std::collections::HashSet;
use std::env;

use crate::error::{LibrarianError, Result};

const DEFAULT_MEDIA_EXTENSIONS: &[&str] =
    &["mp4", "mkv", "avi", "mov", "m4v", "webm", "mp3", "wav", "flac", "m4a"];
const DEFAULT_SUBTITLE_EXTENSIONS: &[&str] = &["srt", "smi", "ass", "ssa"];

/// Recognized configuration keys and their effects (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem root to scan. No default — unset means the scanner emits nothing.
    pub root_dir: Option<String>,
    /// Path to the SQLite database file. Required.
    pub db_path: String,
    /// Recognized media file extensions (lowercase, no dot).
    pub media_extensions: HashSet<String>,
    /// Recognized subtitle file extensions (lowercase, no dot).
    pub subtitle_extensions: HashSet<String>,
    /// Minimum ASCII-letter ratio for a track to be admitted as English.
    pub min_english_ratio: f64,
    /// Worker pool size. Default `min(8, core_count)`.
    pub max_workers: usize,
    /// Bounded pair-channel / work-queue capacity.
    pub work_queue_capacity: usize,
    /// Bounded ring size for `IndexingStatus.log_ring`.
    pub log_ring_size: usize,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Path to the status JSON file persisted alongside the database.
    pub status_path: String,
}

impl Config {
    /// Load configuration from environment variables (`.env` honored via `dotenvy`).
    pub fn from_env() -> Result<Self> {
        let db_path = env::var("DB_PATH")
            .map_err(|_| LibrarianError::Config("DB_PATH is required".into()))?;

        let root_dir = env::var("ROOT_DIR").ok();

        let media_extensions = parse_ext_set("MEDIA_EXTENSIONS", DEFAULT_MEDIA_EXTENSIONS);
        let subtitle_extensions = parse_ext_set("SUBTITLE_EXTENSIONS", DEFAULT_SUBTITLE_EXTENSIONS);

        let min_english_ratio = env::var("MIN_ENGLISH_RATIO")
            .ok()
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|e| LibrarianError::Config(format!("invalid MIN_ENGLISH_RATIO: {e}")))?
            .unwrap_or(0.6);
        if !(0.0..=1.0).contains(&min_english_ratio) {
            return Err(LibrarianError::Config(
                "MIN_ENGLISH_RATIO must be in [0,1]".into(),
            ));
        }

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8);
        let max_workers = env::var("MAX_WORKERS")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|e| LibrarianError::Config(format!("invalid MAX_WORKERS: {e}")))?
            .unwrap_or(default_workers)
            .max(1);

        let work_queue_capacity = env::var("WORK_QUEUE_CAPACITY")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|e| LibrarianError::Config(format!("invalid WORK_QUEUE_CAPACITY: {e}")))?
            .unwrap_or(256)
            .max(1);

        let log_ring_size = env::var("LOG_RING_SIZE")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .map_err(|e| LibrarianError::Config(format!("invalid LOG_RING_SIZE: {e}")))?
            .unwrap_or(200)
            .max(1);

        let busy_timeout_ms = env::var("BUSY_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| LibrarianError::Config(format!("invalid BUSY_TIMEOUT_MS: {e}")))?
            .unwrap_or(5000);

        let status_path =
            env::var("STATUS_PATH").unwrap_or_else(|_| format!("{db_path}.status.json"));

        Ok(Self {
            root_dir,
            db_path,
            media_extensions,
            subtitle_extensions,
            min_english_ratio,
            max_workers,
            work_queue_capacity,
            log_ring_size,
            busy_timeout_ms,
            status_path,
        })
    }
}

fn parse_ext_set(key: &str, default: &[&str]) -> HashSet<String> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ext_set_falls_back_to_default() {
        let set = parse_ext_set("LIBRARIAN_TEST_UNUSED_EXT_KEY", DEFAULT_MEDIA_EXTENSIONS);
        assert_eq!(set.len(), DEFAULT_MEDIA_EXTENSIONS.len());
        assert!(set.contains("mp4"));
    }

    #[test]
    fn parse_ext_set_strips_dots_and_lowercases() {
        // SAFETY: test-only env manipulation of a key unique to this test.
        unsafe { env::set_var("LIBRARIAN_TEST_EXT_KEY_1", ".SRT, Ass ,ssa") };
        let set = parse_ext_set("LIBRARIAN_TEST_EXT_KEY_1", DEFAULT_SUBTITLE_EXTENSIONS);
        assert!(set.contains("srt"));
        assert!(set.contains("ass"));
        assert!(set.contains("ssa"));
        unsafe { env::remove_var("LIBRARIAN_TEST_EXT_KEY_1") };
    }
}
