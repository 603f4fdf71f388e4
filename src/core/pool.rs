/*!
 * Fixed-size worker pool
 *
 * Exactly `concurrency` workers pull file tasks from the scanner's channel
 * until it closes. Each worker owns a clone of the receiving end, so tasks
 * are handed out one at a time in scan order. A file is uploaded either with
 * a single PUT or as a multipart session; a failed file is logged and the
 * worker moves on.
 */

use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};

use super::{upload_multipart, upload_single, FileTask, Strategy, TransferLimits, UploadTarget};
use crate::error::{Result, UploadError};

/// Outcome of one pool run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks received from the scanner
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// The directory listing could not be read
    pub discovery_failed: bool,
}

impl PoolStats {
    fn merge(&mut self, other: &PoolStats) {
        self.discovered += other.discovered;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Workers sharing one upload target
#[derive(Debug)]
pub struct WorkerPool {
    concurrency: usize,
    target: Arc<UploadTarget>,
    limits: TransferLimits,
}

impl WorkerPool {
    pub fn new(concurrency: usize, target: Arc<UploadTarget>, limits: TransferLimits) -> Result<Self> {
        if concurrency == 0 {
            return Err(UploadError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            concurrency,
            target,
            limits,
        })
    }

    /// Drain `tasks` with `concurrency` workers and wait for all of them
    pub async fn run(&self, tasks: Receiver<FileTask>) -> PoolStats {
        let mut workers = JoinSet::new();

        for id in 0..self.concurrency {
            workers.spawn(worker_loop(
                id,
                tasks.clone(),
                self.target.clone(),
                self.limits,
            ));
        }
        drop(tasks);

        let mut stats = PoolStats::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(e) => error!("Upload worker stopped unexpectedly: {}", e),
            }
        }

        debug!(
            "Pool finished: {} discovered, {} uploaded, {} failed",
            stats.discovered, stats.succeeded, stats.failed
        );
        stats
    }
}

async fn worker_loop(
    id: usize,
    tasks: Receiver<FileTask>,
    target: Arc<UploadTarget>,
    limits: TransferLimits,
) -> PoolStats {
    let mut stats = PoolStats::default();

    while let Ok(task) = tasks.recv().await {
        stats.discovered += 1;
        let key = target.key_for(&task.name);
        let span = info_span!("upload", worker = id, key = %key, size = task.size);

        match upload_file(&target, &limits, &task).instrument(span).await {
            Ok(bytes) => {
                stats.succeeded += 1;
                info!("Uploaded {} ({} bytes)", key, bytes);
            }
            Err(e) => {
                stats.failed += 1;
                error!("Failed to upload {}: {}", task.path().display(), e);
            }
        }
    }

    debug!("Worker {} done", id);
    stats
}

/// Upload one file with the strategy its size calls for
pub async fn upload_file(
    target: &UploadTarget,
    limits: &TransferLimits,
    task: &FileTask,
) -> Result<u64> {
    let strategy = Strategy::select(task.size, limits);
    debug!("{} -> {} ({} bytes)", task.name, strategy, task.size);

    match strategy {
        Strategy::SingleShot => upload_single(target, task).await,
        Strategy::Multipart => upload_multipart(target, limits, task).await,
    }
}
