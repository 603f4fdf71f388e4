/*!
 * Configuration types for s3push
 */

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::backend::{CannedAcl, S3Settings};
use crate::error::{Result, UploadError};

/// Files larger than this many bytes are uploaded in parts
pub const MULTIPART_THRESHOLD: u64 = 25_000_000;

/// Size of each multipart chunk in bytes
pub const CHUNK_SIZE: u64 = 10_000_000;

/// Environment variable that overrides the runtime worker thread count
pub const WORKER_THREADS_ENV: &str = "S3PUSH_WORKER_THREADS";

/// Main configuration for an upload run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory whose direct children are uploaded
    pub source_dir: PathBuf,

    /// Destination bucket name
    pub bucket: String,

    /// Key prefix prepended to every file name
    pub prefix: String,

    /// Canned ACL applied to every object
    pub acl: CannedAcl,

    /// AWS region (None = provider chain)
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services
    pub endpoint: Option<String>,

    /// Path-style addressing
    pub force_path_style: bool,

    /// Per-request S3 timeout in seconds (None = unbounded)
    pub timeout_seconds: Option<u64>,

    /// Number of upload workers
    pub concurrency: usize,

    /// Files strictly larger than this use multipart upload
    pub multipart_threshold: u64,

    /// Multipart chunk size in bytes
    pub chunk_size: u64,

    /// Cap on parts in flight per file (None = all chunks at once)
    pub part_concurrency: Option<usize>,

    /// Log level for diagnostic output
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    pub verbose: bool,

    /// Upload into process memory instead of S3
    pub dry_run: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            bucket: String::new(),
            prefix: String::new(),
            acl: CannedAcl::Private,
            region: None,
            endpoint: None,
            force_path_style: false,
            timeout_seconds: None,
            concurrency: 1,
            multipart_threshold: MULTIPART_THRESHOLD,
            chunk_size: CHUNK_SIZE,
            part_concurrency: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            dry_run: false,
        }
    }
}

impl UploadConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UploadError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents).map_err(|e| {
            UploadError::Config(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(UploadError::Config("bucket name is required".to_string()));
        }

        if self.concurrency == 0 {
            return Err(UploadError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }

        if self.chunk_size == 0 {
            return Err(UploadError::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        if self.timeout_seconds == Some(0) {
            return Err(UploadError::Config(
                "timeout must be at least one second".to_string(),
            ));
        }

        if self.part_concurrency == Some(0) {
            return Err(UploadError::Config(
                "part concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Connection settings for the S3 backend
    pub fn s3_settings(&self) -> S3Settings {
        let mut settings = S3Settings::new(self.bucket.clone());
        settings.region = self.region.clone();
        settings.endpoint = self.endpoint.clone();
        settings.force_path_style = self.force_path_style;
        settings.timeout_seconds = self.timeout_seconds;
        settings
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Process-wide runtime sizing, computed once in `main`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads for the async runtime
    pub worker_threads: usize,
}

impl RuntimeConfig {
    /// Read the thread hint from the environment, falling back to the
    /// number of available processors
    pub fn from_env() -> Self {
        Self::from_hint(std::env::var(WORKER_THREADS_ENV).ok().as_deref())
    }

    fn from_hint(hint: Option<&str>) -> Self {
        let worker_threads = hint
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or_else(available_processors);

        Self { worker_threads }
    }

    /// Build the multi-threaded runtime the pipeline runs on
    pub fn build_runtime(&self) -> Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .enable_all()
            .build()
            .map_err(|e| UploadError::Config(format!("cannot start async runtime: {}", e)))
    }
}

fn available_processors() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
