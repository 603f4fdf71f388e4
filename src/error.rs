/*!
 * Error types for the upload pipeline
 */

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, UploadError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 2;

/// Failure of a directory scan, a single file transfer, or startup
///
/// Every variant except [`UploadError::Config`] and
/// [`UploadError::Backend`] describes a per-file or per-scan failure that
/// the pipeline logs and moves past.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Source directory could not be opened or listed
    #[error("cannot list directory {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file could not be opened for reading
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Single-shot PUT failed
    #[error("upload of {key} failed: {source}")]
    Transfer {
        key: String,
        #[source]
        source: BackendError,
    },

    /// Multipart session could not be opened
    #[error("cannot start multipart upload of {key}: {source}")]
    InitMultipart {
        key: String,
        #[source]
        source: BackendError,
    },

    /// A part upload failed; the session was aborted
    #[error("part {part_number} of {key} failed, upload aborted: {source}")]
    Part {
        key: String,
        part_number: u32,
        #[source]
        source: BackendError,
    },

    /// A part task panicked or was cancelled; the session was aborted
    #[error("part task for {key} did not finish, upload aborted: {message}")]
    Join { key: String, message: String },

    /// Every part succeeded but the manifest commit failed
    #[error("commit of {key} failed: {source}")]
    Commit {
        key: String,
        #[source]
        source: BackendError,
    },

    /// A part failed and releasing the remote session failed too
    #[error("{cause}; abort of upload {upload_id} also failed: {source}")]
    Abort {
        upload_id: String,
        cause: Box<UploadError>,
        #[source]
        source: BackendError,
    },

    /// Collected parts do not form the contiguous range `1..=N`
    #[error("part manifest for {key} is inconsistent: {message}")]
    Manifest { key: String, message: String },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend could not be set up
    #[error("storage backend error: {0}")]
    Backend(#[from] BackendError),
}

impl UploadError {
    /// Get the process exit code for this error
    ///
    /// Per-file errors are logged inside the pipeline and never reach `main`,
    /// so anything that does is fatal.
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }
}
