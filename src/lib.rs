/*!
 * s3push - concurrent directory upload to S3
 *
 * Uploads every regular file directly inside a directory to a bucket:
 * - Bounded pool of upload workers fed by a single directory scanner
 * - Single PUT for small files, concurrent multipart upload for large ones
 * - Multipart manifest committed in part order, session aborted on failure
 * - Pluggable object store (S3, or in-memory for tests and dry runs)
 *
 * Version: 0.2.0
 */

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use backend::{CannedAcl, MemoryBackend, ObjectStore, S3Backend};
pub use config::{RuntimeConfig, UploadConfig};
pub use core::{upload_directory, FileTask, PoolStats, TransferLimits, UploadTarget, WorkerPool};
pub use error::{Result, UploadError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
