//! Worker Pool (spec §4.6, component C6).
//!
//! A fixed-size pool of tasks pulling `ScanPair`s off a bounded channel and
//! running the C1→C2→C3→C5 pipeline (decode, parse, classify, insert) on
//! each one, reporting a [`WorkerOutcome`] per pair over a result channel.
//!
//! Concurrency is grounded in `services/legacy/job_queue.rs`'s
//! `ConcurrencyLimiter`: a `Semaphore`-backed gate that workers acquire
//! before touching a file, so pausing the pool is just holding the gate's
//! only permit rather than tearing down and respawning tasks. Per-file work
//! is itself spawned as its own task, the same way that module's `WorkQueue`
//! spawns one task per job, so a panic while processing one file surfaces as
//! a `JoinError` on that task's handle rather than killing the worker loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::Repository;
use crate::encoding::EncodingDetector;
use crate::lang;
use crate::scanner::ScanPair;
use crate::status::{SkipReason, Strategy};
use crate::subtitle;

/// Soft per-file timeout (spec §5 "Pathological inputs"): a single file's
/// decode+parse+insert pipeline is cancelled and counted as a skip rather
/// than stalling the whole pool.
const PER_FILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of running the pipeline on one pair.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub media_path: PathBuf,
    pub inserted: u64,
    pub skip_reason: Option<SkipReason>,
}

impl WorkerOutcome {
    fn skipped(media_path: PathBuf, reason: SkipReason) -> Self {
        Self { media_path, inserted: 0, skip_reason: Some(reason) }
    }
}

/// A `Semaphore`-backed gate workers wait on before each file. Holding the
/// gate's only permit (via [`PauseGate::pause`]) blocks every worker until
/// the guard is dropped.
#[derive(Clone)]
pub struct PauseGate {
    semaphore: Arc<Semaphore>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks while the pool is paused; returns immediately otherwise.
    pub async fn wait_if_paused(&self) {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("pause gate semaphore never closes");
        drop(permit);
    }

    /// Close the gate. Hold the returned guard until resuming.
    pub async fn pause(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pause gate semaphore never closes")
    }
}

pub struct WorkerPool {
    repo: Repository,
    min_english_ratio: f64,
    strategy: Strategy,
    gate: PauseGate,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        repo: Repository,
        min_english_ratio: f64,
        strategy: Strategy,
        gate: PauseGate,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repo,
            min_english_ratio,
            strategy,
            gate,
            cancel,
        }
    }

    /// Spawn `worker_count` tasks pulling from `rx` until it's closed or
    /// `cancel` fires, each reporting outcomes over `result_tx`.
    pub async fn run(self, worker_count: usize, rx: mpsc::Receiver<ScanPair>, result_tx: mpsc::Sender<WorkerOutcome>) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut tasks = JoinSet::new();

        for worker_id in 0..worker_count.max(1) {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let repo = self.repo.clone();
            let gate = self.gate.clone();
            let cancel = self.cancel.clone();
            let min_english_ratio = self.min_english_ratio;
            let strategy = self.strategy;

            tasks.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let pair = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(pair) = pair else {
                        break;
                    };

                    gate.wait_if_paused().await;
                    if cancel.is_cancelled() {
                        break;
                    }

                    // Spawned per-file, mirroring job_queue.rs's WorkQueue: a panic inside
                    // run_one only takes down this one task, not the whole worker loop
                    // (spec §4.6 "Failure isolation: any panic ... is caught, logged,
                    // counted, and does not terminate the pool").
                    let media_path = pair.media_path.clone();
                    let repo_for_task = repo.clone();
                    let pair_for_task = pair.clone();
                    let cancel_for_task = cancel.clone();
                    let handle = tokio::spawn(async move {
                        run_one(&repo_for_task, &pair_for_task, min_english_ratio, strategy, &cancel_for_task, worker_id).await
                    });

                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(join_err) if join_err.is_panic() => {
                            warn!(worker_id, path = %media_path.display(), "worker panicked while processing file, skipping");
                            WorkerOutcome::skipped(media_path, SkipReason::IoError)
                        }
                        Err(_cancelled) => WorkerOutcome::skipped(media_path, SkipReason::Cancelled),
                    };
                    if result_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}

/// Decode, parse, classify, and insert one pair (spec §4.6 "Per-pair
/// pipeline"). Isolates panics and per-file errors so one bad file never
/// takes down the pool.
async fn run_one(
    repo: &Repository,
    pair: &ScanPair,
    min_english_ratio: f64,
    strategy: Strategy,
    cancel: &CancellationToken,
    worker_id: usize,
) -> WorkerOutcome {
    let media_path = pair.media_path.clone();

    let result = tokio::time::timeout(
        PER_FILE_TIMEOUT,
        process_pair(repo, pair, min_english_ratio, strategy, cancel),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(skip_reason)) => WorkerOutcome {
            media_path,
            inserted: 0,
            skip_reason: Some(skip_reason),
        },
        Err(_elapsed) => {
            warn!(worker_id, path = %media_path.display(), "file exceeded per-file timeout, skipping");
            WorkerOutcome {
                media_path,
                inserted: 0,
                skip_reason: Some(SkipReason::IoError),
            }
        }
    }
}

async fn process_pair(
    repo: &Repository,
    pair: &ScanPair,
    min_english_ratio: f64,
    strategy: Strategy,
    cancel: &CancellationToken,
) -> Result<WorkerOutcome, SkipReason> {
    let media_path = pair.media_path.clone();

    let Some(subtitle_path) = &pair.subtitle_path else {
        let meta = std::fs::metadata(&media_path).map_err(|_| SkipReason::IoError)?;
        upsert_media_only(repo, &media_path, &meta).await?;
        return Ok(WorkerOutcome {
            media_path,
            inserted: 0,
            skip_reason: None,
        });
    };

    if cancel.is_cancelled() {
        return Err(SkipReason::Cancelled);
    }

    let media_meta = std::fs::metadata(&media_path).map_err(|_| SkipReason::IoError)?;

    if strategy == Strategy::Incremental && already_indexed(repo, &media_path, &media_meta).await? {
        return Err(SkipReason::AlreadyIndexed);
    }

    let media_id = upsert_media_only(repo, &media_path, &media_meta).await?;

    let extension = subtitle_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let detector = EncodingDetector::new();
    let decoded = detector
        .decode_file(subtitle_path)
        .map_err(|_| SkipReason::DecodeError)?;

    if cancel.is_cancelled() {
        return Err(SkipReason::Cancelled);
    }

    let cues = subtitle::parse_track(&extension, &decoded.text).map_err(|_| SkipReason::ParseError)?;
    if cues.is_empty() {
        return Ok(WorkerOutcome {
            media_path,
            inserted: 0,
            skip_reason: None,
        });
    }

    let concatenated: String = cues.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join(" ");
    let verdict = lang::classify(&concatenated, min_english_ratio);
    if !verdict.is_english_enough {
        debug!(path = %media_path.display(), ratio = verdict.ascii_ratio, "track rejected by language classifier");
        return Err(SkipReason::LangRejected);
    }

    let source_path = subtitle_path.to_str();
    let inserted = repo
        .bulk_insert_subtitles(media_id, source_path, &cues, &verdict.lang)
        .await
        .map_err(|_| SkipReason::IoError)?;

    Ok(WorkerOutcome {
        media_path,
        inserted,
        skip_reason: None,
    })
}

fn stat_fields(media_path: &std::path::Path, meta: &std::fs::Metadata) -> (i64, i64, String) {
    let size = meta.len() as i64;
    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let extension = media_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    (size, last_modified, extension)
}

async fn upsert_media_only(repo: &Repository, media_path: &std::path::Path, meta: &std::fs::Metadata) -> Result<i64, SkipReason> {
    let (size, last_modified, extension) = stat_fields(media_path, meta);
    let path_str = media_path.to_str().ok_or(SkipReason::IoError)?;

    repo.upsert_media(path_str, size, last_modified, &extension)
        .await
        .map_err(|_| SkipReason::IoError)
}

/// Incremental strategy (spec §4.7): skip a pair if an existing media row
/// matches the file's current `size`/`last_modified` and already has at
/// least one indexed subtitle row.
async fn already_indexed(repo: &Repository, media_path: &std::path::Path, meta: &std::fs::Metadata) -> Result<bool, SkipReason> {
    let (size, last_modified, _extension) = stat_fields(media_path, meta);
    let path_str = media_path.to_str().ok_or(SkipReason::IoError)?;

    let Some(existing) = repo.find_media_by_path(path_str).await.map_err(|_| SkipReason::IoError)? else {
        return Ok(false);
    };
    if existing.size != size || existing.last_modified != last_modified {
        return Ok(false);
    }
    let subtitle_count = repo
        .count_subtitles_for_media(existing.id)
        .await
        .map_err(|_| SkipReason::IoError)?;
    Ok(subtitle_count > 0)
}
