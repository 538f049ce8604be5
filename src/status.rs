//! The process-wide `IndexingStatus` singleton (spec §3, §4.7).
//!
//! Owned exclusively by the [`crate::controller::IndexingController`]; every other
//! component only ever sees a cloned snapshot. Persisted to a JSON file on every
//! transition via write-temp-then-rename, so a crash mid-write never leaves a
//! half-written status file behind.

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LibrarianError, Result};

/// Lifecycle state of the indexing engine (spec §4.7's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    Idle,
    Scanning,
    Running,
    Paused,
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl IndexingState {
    /// True if `start()` is valid from this state (spec §4.7 + §6's control table).
    pub fn can_start(self) -> bool {
        matches!(
            self,
            IndexingState::Idle
                | IndexingState::Stopped
                | IndexingState::Completed
                | IndexingState::Failed
        )
    }
}

/// Strategy selected at `start()` (spec §4.7, glossary "Strategy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Full,
    Incremental,
}

/// Why a pair was not inserted, recorded alongside a (possibly zero) insert count.
/// Per spec §7, `LangRejected` and `Cancelled` are not error variants — they're
/// skip reasons attached to an otherwise-successful [`crate::worker::WorkerOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LangRejected,
    IoError,
    ParseError,
    DecodeError,
    Cancelled,
    AlreadyIndexed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::LangRejected => "LangRejected",
            SkipReason::IoError => "IoError",
            SkipReason::ParseError => "ParseError",
            SkipReason::DecodeError => "DecodeError",
            SkipReason::Cancelled => "Cancelled",
            SkipReason::AlreadyIndexed => "AlreadyIndexed",
        }
    }
}

/// One structured entry in the bounded log ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_ms: i64,
    pub level: String,
    pub message: String,
}

/// Per-skip-reason counters, aggregated alongside `subtitle_count` (SPEC_FULL §4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkipCounters {
    pub lang_rejected: u64,
    pub io_error: u64,
    pub parse_error: u64,
    pub decode_error: u64,
    pub cancelled: u64,
    pub already_indexed: u64,
}

impl SkipCounters {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::LangRejected => self.lang_rejected += 1,
            SkipReason::IoError => self.io_error += 1,
            SkipReason::ParseError => self.parse_error += 1,
            SkipReason::DecodeError => self.decode_error += 1,
            SkipReason::Cancelled => self.cancelled += 1,
            SkipReason::AlreadyIndexed => self.already_indexed += 1,
        }
    }
}

/// A bounded ring buffer of recent structured log events (spec §3, `log_ring`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRing {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    pub fn push(&mut self, level: &str, message: impl Into<String>, now_ms: i64) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp_ms: now_ms,
            level: level.to_string(),
            message: message.into(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Full status snapshot persisted to the status file and handed out to
/// external observers (spec §3, §4.7, §6's `status` operation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub state: IndexingState,
    pub strategy: Option<Strategy>,
    pub total_files: u64,
    pub processed_files: u64,
    pub current_path: Option<String>,
    pub started_at: Option<i64>,
    pub last_updated: i64,
    pub subtitle_count: u64,
    pub skip_counters: SkipCounters,
    pub failure_reason: Option<String>,
    pub log_ring: LogRing,
    /// EMA of files/sec over the trailing window (spec §4.7's ETA calc).
    pub files_per_sec: f64,
    pub eta_secs: Option<f64>,
}

impl IndexingStatus {
    pub fn idle(log_ring_size: usize, now_ms: i64) -> Self {
        Self {
            state: IndexingState::Idle,
            strategy: None,
            total_files: 0,
            processed_files: 0,
            current_path: None,
            started_at: None,
            last_updated: now_ms,
            subtitle_count: 0,
            skip_counters: SkipCounters::default(),
            failure_reason: None,
            log_ring: LogRing::new(log_ring_size),
            files_per_sec: 0.0,
            eta_secs: None,
        }
    }

    /// Atomic write-temp-then-rename, per spec §4.7's crash-tolerance contract.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| LibrarianError::Config(format!("failed to serialize status: {e}")))?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load a persisted status file, coercing a crash-era `running`/`paused`
    /// state back to `idle` per spec §4.7 ("indexing does not auto-resume").
    pub fn load_or_init(path: &Path, log_ring_size: usize, now_ms: i64) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::idle(log_ring_size, now_ms));
        }
        let bytes = std::fs::read(path)?;
        let mut status: IndexingStatus = serde_json::from_slice(&bytes)
            .map_err(|e| LibrarianError::Config(format!("failed to parse status file: {e}")))?;
        if matches!(status.state, IndexingState::Running | IndexingState::Paused) {
            status.state = IndexingState::Idle;
            status.current_path = None;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_evicts_oldest() {
        let mut ring = LogRing::new(2);
        ring.push("info", "one", 1);
        ring.push("info", "two", 2);
        ring.push("info", "three", 3);
        let msgs: Vec<_> = ring.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["two", "three"]);
    }

    #[test]
    fn crash_era_running_resets_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut status = IndexingStatus::idle(10, 0);
        status.state = IndexingState::Running;
        status.current_path = Some("/a/b.mkv".into());
        status.persist(&path).unwrap();

        let loaded = IndexingStatus::load_or_init(&path, 10, 1).unwrap();
        assert_eq!(loaded.state, IndexingState::Idle);
        assert!(loaded.current_path.is_none());
    }

    #[test]
    fn can_start_table() {
        assert!(IndexingState::Idle.can_start());
        assert!(IndexingState::Stopped.can_start());
        assert!(IndexingState::Completed.can_start());
        assert!(IndexingState::Failed.can_start());
        assert!(!IndexingState::Running.can_start());
        assert!(!IndexingState::Paused.can_start());
        assert!(!IndexingState::Scanning.can_start());
        assert!(!IndexingState::Stopping.can_start());
    }
}
