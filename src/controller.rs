//! Indexing Controller (spec §4.7, component C7).
//!
//! Owns the single `IndexingStatus` behind a `tokio::sync::RwLock` (spec §5
//! "shared under a reader/writer lock; writers are controller-only"),
//! drives the scan→index run as a background task, and implements the
//! state machine literally:
//!
//! ```text
//! idle --start--> scanning --(first pair)--> running
//! running --pause--> paused --resume--> running
//! running --stop--> stopping --(drain)--> stopped
//! running --(queue empty & scanner done)--> completed
//! any --fatal--> failed
//! {stopped,completed,failed} --start--> scanning
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Repository;
use crate::error::{LibrarianError, Result};
use crate::scanner::{FilesystemScanner, ScanPair};
use crate::status::{IndexingState, IndexingStatus, Strategy};
use crate::worker::{PauseGate, WorkerOutcome, WorkerPool};

/// Minimum interval between persisted status writes (spec §4.7 "at most
/// once per 100 ms to the persistent file").
const PERSIST_INTERVAL_MS: i64 = 100;
/// Window the files/sec EMA is computed over (spec §4.7 "60 s window").
const EMA_WINDOW_SECS: f64 = 60.0;

pub struct IndexingController {
    status: Arc<RwLock<IndexingStatus>>,
    repo: Repository,
    config: Config,
    status_path: PathBuf,
    cancel: Arc<Mutex<CancellationToken>>,
    pause_gate: PauseGate,
    pause_guard: Arc<Mutex<Option<OwnedSemaphorePermit>>>,
    run_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl IndexingController {
    pub async fn new(repo: Repository, config: Config) -> Result<Self> {
        let status_path = PathBuf::from(&config.status_path);
        let status = IndexingStatus::load_or_init(&status_path, config.log_ring_size, now_ms())?;
        Ok(Self {
            status: Arc::new(RwLock::new(status)),
            repo,
            config,
            status_path,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            pause_gate: PauseGate::new(),
            pause_guard: Arc::new(Mutex::new(None)),
            run_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Current status snapshot (spec §6 `status` operation).
    pub async fn status(&self) -> IndexingStatus {
        self.status.read().await.clone()
    }

    /// `idle/stopped/completed/failed --start--> scanning` (spec §6 `start`).
    pub async fn start(&self, strategy: Strategy) -> Result<()> {
        {
            let mut status = self.status.write().await;
            if !status.state.can_start() {
                return Err(LibrarianError::Config(format!(
                    "cannot start from state {:?}",
                    status.state
                )));
            }
            status.state = IndexingState::Scanning;
            status.strategy = Some(strategy);
            status.total_files = 0;
            status.processed_files = 0;
            status.current_path = None;
            status.started_at = Some(now_ms());
            status.failure_reason = None;
            status.skip_counters = Default::default();
            status.subtitle_count = 0;
            status.log_ring.push("info", "indexing started", now_ms());
            info!(?strategy, "indexing started");
        }
        self.persist().await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();

        let handle = tokio::spawn(run_indexing(
            self.status.clone(),
            self.repo.clone(),
            self.config.clone(),
            self.status_path.clone(),
            strategy,
            cancel,
            self.pause_gate.clone(),
        ));
        *self.run_handle.lock().await = Some(handle);
        Ok(())
    }

    /// `running --pause--> paused` (spec §6 `pause`). Holds the worker
    /// pool's pause gate rather than cancelling anything.
    pub async fn pause(&self) -> Result<()> {
        let mut status = self.status.write().await;
        if status.state != IndexingState::Running {
            return Err(LibrarianError::Config(format!(
                "cannot pause from state {:?}",
                status.state
            )));
        }
        status.state = IndexingState::Paused;
        status.log_ring.push("info", "indexing paused", now_ms());
        drop(status);

        let guard = self.pause_gate.pause().await;
        *self.pause_guard.lock().await = Some(guard);
        Ok(())
    }

    /// `paused --resume--> running` (spec §6 `resume`).
    pub async fn resume(&self) -> Result<()> {
        let mut status = self.status.write().await;
        if status.state != IndexingState::Paused {
            return Err(LibrarianError::Config(format!(
                "cannot resume from state {:?}",
                status.state
            )));
        }
        status.state = IndexingState::Running;
        status.log_ring.push("info", "indexing resumed", now_ms());
        drop(status);

        self.pause_guard.lock().await.take();
        Ok(())
    }

    /// `running/paused --stop--> stopping --(drain)--> stopped` (spec §6 `stop`).
    pub async fn stop(&self) -> Result<()> {
        {
            let mut status = self.status.write().await;
            if !matches!(status.state, IndexingState::Running | IndexingState::Paused | IndexingState::Scanning) {
                return Err(LibrarianError::Config(format!(
                    "cannot stop from state {:?}",
                    status.state
                )));
            }
            status.state = IndexingState::Stopping;
            status.log_ring.push("info", "stop requested, draining", now_ms());
        }
        self.pause_guard.lock().await.take();
        self.cancel.lock().await.cancel();

        if let Some(handle) = self.run_handle.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// `stopped --reset--> (wipes corpus) --> idle` (spec §6 `reset`). Only
    /// valid from `stopped` per §6's table; there's no `any -> idle via
    /// reset` edge in §4.7's diagram.
    pub async fn reset(&self) -> Result<()> {
        {
            let status = self.status.read().await;
            if status.state != IndexingState::Stopped {
                return Err(LibrarianError::Config(
                    "reset requires state=stopped".to_string(),
                ));
            }
        }
        self.repo.reset_all().await?;

        let mut status = self.status.write().await;
        *status = IndexingStatus::idle(self.config.log_ring_size, now_ms());
        status.log_ring.push("info", "corpus reset", now_ms());
        drop(status);
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let status = self.status.read().await;
        status.persist(&self.status_path)
    }
}

/// Background task body: scan, feed workers, fold outcomes into status,
/// transition to `completed`/`failed`/`stopped` when the run ends.
async fn run_indexing(
    status: Arc<RwLock<IndexingStatus>>,
    repo: Repository,
    config: Config,
    status_path: PathBuf,
    strategy: Strategy,
    cancel: CancellationToken,
    pause_gate: PauseGate,
) {
    let Some(root) = config.root_dir.clone() else {
        let mut s = status.write().await;
        s.state = IndexingState::Completed;
        s.log_ring.push("warn", "no root_dir configured; nothing to scan", now_ms());
        drop(s);
        let _ = persist_locked(&status, &status_path).await;
        return;
    };

    let (pair_tx, pair_rx) = mpsc::channel::<ScanPair>(config.work_queue_capacity);
    let (result_tx, mut result_rx) = mpsc::channel::<WorkerOutcome>(config.work_queue_capacity);
    let discovered = Arc::new(AtomicU64::new(0));

    let scanner = FilesystemScanner::new(
        PathBuf::from(root),
        config.media_extensions.clone(),
        config.subtitle_extensions.clone(),
    );
    let scan_cancel = cancel.clone();
    let discovered_for_scan = discovered.clone();
    let status_for_scan = status.clone();
    let relay_tx = pair_tx;

    let scan_handle = tokio::spawn(async move {
        let (internal_tx, mut internal_rx) = mpsc::channel::<ScanPair>(1);
        let scan_task = tokio::spawn(async move { scanner.run(internal_tx, scan_cancel).await });

        while let Some(pair) = internal_rx.recv().await {
            discovered_for_scan.fetch_add(1, Ordering::Relaxed);
            {
                let mut s = status_for_scan.write().await;
                s.total_files = discovered_for_scan.load(Ordering::Relaxed);
            }
            if relay_tx.send(pair).await.is_err() {
                break;
            }
        }
        let _ = scan_task.await;
    });

    let worker_pool = WorkerPool::new(repo.clone(), config.min_english_ratio, strategy, pause_gate, cancel.clone());
    let worker_count = config.max_workers;
    let worker_handle = tokio::spawn(async move { worker_pool.run(worker_count, pair_rx, result_tx).await });

    {
        let mut s = status.write().await;
        if s.state == IndexingState::Scanning {
            s.state = IndexingState::Running;
        }
    }

    let mut last_persist = 0i64;
    let mut window_start = now_ms();
    let mut window_processed = 0u64;

    while let Some(outcome) = result_rx.recv().await {
        let mut s = status.write().await;
        s.processed_files += 1;
        s.current_path = Some(outcome.media_path.display().to_string());

        match outcome.skip_reason {
            Some(reason) => {
                s.skip_counters.record(reason);
                s.log_ring.push("warn", format!("skipped {}: {}", outcome.media_path.display(), reason.as_str()), now_ms());
            }
            None => {
                s.subtitle_count += outcome.inserted;
            }
        }

        window_processed += 1;
        let elapsed_secs = ((now_ms() - window_start) as f64 / 1000.0).max(0.001);
        if elapsed_secs >= EMA_WINDOW_SECS || window_processed == 1 {
            s.files_per_sec = window_processed as f64 / elapsed_secs;
            window_start = now_ms();
            window_processed = 0;
        }
        if s.files_per_sec > 0.0 && s.total_files > s.processed_files {
            s.eta_secs = Some((s.total_files - s.processed_files) as f64 / s.files_per_sec);
        } else {
            s.eta_secs = None;
        }
        s.last_updated = now_ms();

        let now = now_ms();
        if now - last_persist >= PERSIST_INTERVAL_MS {
            last_persist = now;
            let snapshot = s.clone();
            drop(s);
            if let Err(e) = snapshot.persist(&status_path) {
                warn!(error = %e, "failed to persist status snapshot");
            }
        }
    }

    let _ = scan_handle.await;
    let _ = worker_handle.await;

    let mut s = status.write().await;
    s.state = match s.state {
        IndexingState::Stopping => IndexingState::Stopped,
        IndexingState::Failed => IndexingState::Failed,
        _ => IndexingState::Completed,
    };
    s.current_path = None;
    s.log_ring.push("info", format!("indexing ended: {:?}", s.state), now_ms());
    drop(s);

    if let Err(e) = persist_locked(&status, &status_path).await {
        error!(error = %e, "failed to persist final status");
    }
}

async fn persist_locked(status: &Arc<RwLock<IndexingStatus>>, path: &std::path::Path) -> Result<()> {
    let snapshot = status.read().await.clone();
    snapshot.persist(path)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashSet;

    async fn test_controller(root: PathBuf, status_path: PathBuf) -> IndexingController {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = Repository::from_pool(pool);
        repo.init_schema().await.unwrap();

        let config = Config {
            root_dir: Some(root.to_string_lossy().to_string()),
            db_path: ":memory:".to_string(),
            media_extensions: HashSet::from(["mp4".to_string()]),
            subtitle_extensions: HashSet::from(["srt".to_string()]),
            min_english_ratio: 0.6,
            max_workers: 2,
            work_queue_capacity: 16,
            log_ring_size: 50,
            busy_timeout_ms: 5000,
            status_path: status_path.to_string_lossy().to_string(),
        };
        IndexingController::new(repo, config).await.unwrap()
    }

    #[tokio::test]
    async fn start_from_idle_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"fake").unwrap();
        let status_path = dir.path().join("status.json");

        let controller = test_controller(dir.path().to_path_buf(), status_path).await;
        assert!(controller.status().await.state.can_start());

        controller.start(Strategy::Full).await.unwrap();

        for _ in 0..50 {
            if controller.status().await.state == IndexingState::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let status = controller.status().await;
        assert_eq!(status.state, IndexingState::Completed);
        assert_eq!(status.processed_files, 1);
    }

    #[tokio::test]
    async fn start_rejected_when_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.json");
        let controller = test_controller(dir.path().to_path_buf(), status_path).await;
        controller.start(Strategy::Full).await.unwrap();

        let err = controller.start(Strategy::Full).await.unwrap_err();
        assert!(matches!(err, LibrarianError::Config(_)));
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reset_requires_stopped_state() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.json");
        let controller = test_controller(dir.path().to_path_buf(), status_path).await;

        let err = controller.reset().await.unwrap_err();
        assert!(matches!(err, LibrarianError::Config(_)));
    }
}
