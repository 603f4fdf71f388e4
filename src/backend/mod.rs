//! Storage backend abstraction for the upload pipeline
//!
//! The pipeline only needs a narrow slice of an object store: a single PUT
//! and the multipart init / put-part / complete / abort call set. Both are
//! expressed as `async` traits so the S3 implementation and the in-memory
//! recorder used by tests and dry runs are interchangeable.
//!
//! # Example
//!
//! ```no_run
//! use s3push::backend::{CannedAcl, MemoryBackend, ObjectRange, ObjectStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryBackend::new();
//!     let body = ObjectRange::whole(Arc::new(PathBuf::from("report.csv")), 1024);
//!     store
//!         .put_object("daily/report.csv", body, "text/csv", CannedAcl::Private)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod types;

mod memory;
mod s3;

pub use error::{BackendError, BackendResult};
pub use memory::{MemoryBackend, PartRecord, PutRecord, SessionRecord};
pub use s3::{S3Backend, S3Settings};
pub use types::{CannedAcl, CompletedPart, ObjectRange};

use async_trait::async_trait;
use std::sync::Arc;

/// Object storage operations consumed by the uploaders
///
/// Implementors must be `Send + Sync`: one instance is shared read-only by
/// every worker and every part task.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in log lines
    fn name(&self) -> &str;

    /// Store `body` under `key` in a single request
    async fn put_object(
        &self,
        key: &str,
        body: ObjectRange,
        content_type: &str,
        acl: CannedAcl,
    ) -> BackendResult<()>;

    /// Open a multipart session for `key`
    async fn init_multipart(
        &self,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
    ) -> BackendResult<Arc<dyn MultipartSession>>;
}

/// Remote state of one in-progress multipart upload
///
/// A session ends with at most one of [`complete`](Self::complete) or
/// [`abort`](Self::abort).
#[async_trait]
pub trait MultipartSession: Send + Sync {
    /// Backend-assigned session identifier
    fn upload_id(&self) -> &str;

    /// Object key the session will produce
    fn key(&self) -> &str;

    /// Upload `body` as part `part_number` (1-based)
    async fn put_part(&self, part_number: u32, body: ObjectRange) -> BackendResult<CompletedPart>;

    /// Assemble the object from `parts`, which must be in ascending part order
    async fn complete(&self, parts: &[CompletedPart]) -> BackendResult<()>;

    /// Discard the session and every part stored under it
    async fn abort(&self) -> BackendResult<()>;
}
