//! Error types for storage backend operations
//!
//! Every call the upload pipeline makes against object storage returns a
//! [`BackendError`]. The S3 backend converts AWS SDK failures into it and the
//! in-memory backend uses it for injected failures.

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use std::io;
use thiserror::Error;

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors returned by a storage backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// AWS SDK error that is not a service response
    #[error("AWS SDK error: {0}")]
    Sdk(String),

    /// S3 service error with specific error code
    #[error("S3 service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Bucket not found or not accessible
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Credentials could not be resolved
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Invalid backend configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Multipart protocol violation (missing upload id, bad manifest, ...)
    #[error("Multipart upload error: {0}")]
    Multipart(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Local I/O error while reading the upload body
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Request refused by the backend
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Convert AWS SDK errors to BackendError
impl<E, R> From<SdkError<E, R>> for BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(error: SdkError<E, R>) -> Self {
        match error {
            SdkError::DispatchFailure(e) => {
                BackendError::Network(format!("Network dispatch failure: {:?}", e))
            }
            SdkError::ResponseError(e) => {
                BackendError::Network(format!("Response error: {:?}", e))
            }
            SdkError::TimeoutError(e) => BackendError::Timeout(format!("{:?}", e)),
            SdkError::ServiceError(e) => {
                let err = e.err();
                let code = err.code().unwrap_or("Unknown").to_string();
                let message = err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());

                match code.as_str() {
                    "AccessDenied" => BackendError::AccessDenied(message),
                    "NoSuchBucket" => BackendError::BucketNotFound(message),
                    _ => BackendError::Service { code, message },
                }
            }
            other => BackendError::Sdk(format!("{:?}", other)),
        }
    }
}
