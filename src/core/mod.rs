/*!
 * Upload pipeline: directory scanner, worker pool and the two transfer
 * strategies (single PUT and concurrent multipart).
 */

pub mod multipart;
pub mod pool;
pub mod scanner;
pub mod single;

pub use multipart::{plan_parts, upload_multipart, PartPlan, SessionStatus};
pub use pool::{upload_file, PoolStats, WorkerPool};
pub use scanner::{scan_directory, spawn_scanner};
pub use single::upload_single;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::error;

use crate::backend::{CannedAcl, ObjectStore};
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};

/// Content type used when the extension is unknown
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One regular file discovered by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    /// File name as it appears in the object key
    pub name: String,

    /// Size in bytes at scan time
    pub size: u64,

    /// Directory the file was found in
    pub dir: Arc<PathBuf>,

    /// File name as stored on disk, which need not be UTF-8
    file_name: OsString,
}

impl FileTask {
    pub fn new(dir: Arc<PathBuf>, file_name: impl Into<OsString>, size: u64) -> Self {
        let file_name = file_name.into();
        Self {
            name: file_name.to_string_lossy().into_owned(),
            size,
            dir,
            file_name,
        }
    }

    /// Full path of the file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Where and how files are stored; shared read-only by every worker
pub struct UploadTarget {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    acl: CannedAcl,
}

impl UploadTarget {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, acl: CannedAcl) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            acl,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn acl(&self) -> CannedAcl {
        self.acl
    }

    /// Destination key for a file name: prefix and name joined by one `/`
    pub fn key_for(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            name.trim_start_matches('/').to_string()
        } else {
            format!("{}/{}", prefix, name.trim_start_matches('/'))
        }
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("store", &self.store.name())
            .field("prefix", &self.prefix)
            .field("acl", &self.acl)
            .finish()
    }
}

/// Size limits that decide how a file is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Files strictly larger than this use multipart
    pub multipart_threshold: u64,

    /// Bytes per part
    pub chunk_size: u64,

    /// Optional cap on parts in flight per file
    pub part_concurrency: Option<usize>,
}

impl TransferLimits {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            multipart_threshold: config.multipart_threshold,
            chunk_size: config.chunk_size,
            part_concurrency: config.part_concurrency,
        }
    }
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// Transfer strategy for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SingleShot,
    Multipart,
}

impl Strategy {
    /// Multipart only when `size > threshold`; an empty file is always a single PUT
    pub fn select(size: u64, limits: &TransferLimits) -> Self {
        if size > 0 && size > limits.multipart_threshold {
            Strategy::Multipart
        } else {
            Strategy::SingleShot
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::SingleShot => f.write_str("single"),
            Strategy::Multipart => f.write_str("multipart"),
        }
    }
}

/// Guess a MIME type from the file name's extension
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Open `path` and return its current length
pub(crate) async fn open_for_upload(path: &Path) -> Result<u64> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| UploadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let metadata = file.metadata().await.map_err(|source| UploadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(metadata.len())
}

/// Upload every regular file directly inside `dir`
///
/// Runs the scanner and `concurrency` workers to completion. Per-file
/// failures and a failed scan are logged, not returned; the stats say what
/// happened.
pub async fn upload_directory(
    dir: &Path,
    target: Arc<UploadTarget>,
    limits: TransferLimits,
    concurrency: usize,
) -> Result<PoolStats> {
    let pool = WorkerPool::new(concurrency, target, limits)?;
    let (tasks, scanner) = spawn_scanner(dir.to_path_buf(), concurrency);

    let mut stats = pool.run(tasks).await;

    match scanner.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!("{}", e);
            stats.discovery_failed = true;
        }
        Err(e) => {
            error!("Directory scanner did not finish: {}", e);
            stats.discovery_failed = true;
        }
    }

    Ok(stats)
}
