//! S3 backend implementation
//!
//! Talks to AWS S3 (or an S3-compatible service such as MinIO) through the
//! official SDK. Upload bodies are streamed straight from disk: every request
//! builds its own file-backed `ByteStream` over the requested byte range.

use super::error::{BackendError, BackendResult};
use super::types::{CannedAcl, CompletedPart, ObjectRange};
use super::{MultipartSession, ObjectStore};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, ObjectCannedAcl};
use aws_sdk_s3::Client as AwsS3Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Region used when neither the caller nor the environment names one
pub const FALLBACK_REGION: &str = "us-east-1";

/// Limit on establishing a connection; transfers themselves are unbounded
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`S3Backend`]
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Destination bucket
    pub bucket: String,

    /// AWS region (e.g., "eu-west-1"); `None` uses the provider chain
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,

    /// Per-operation timeout in seconds (None = no limit on a transfer)
    pub timeout_seconds: Option<u64>,
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            force_path_style: false,
            timeout_seconds: None,
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> BackendResult<()> {
        if self.bucket.is_empty() {
            return Err(BackendError::InvalidConfig(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn timeout_config(&self) -> TimeoutConfig {
        let mut builder = TimeoutConfig::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(seconds) = self.timeout_seconds {
            builder = builder.operation_timeout(Duration::from_secs(seconds));
        }
        builder.build()
    }
}

/// Object store backed by an S3 bucket
#[derive(Clone)]
pub struct S3Backend {
    client: AwsS3Client,
    bucket: Arc<str>,
}

impl S3Backend {
    /// Build a client and resolve credentials from the environment
    ///
    /// Fails if no credentials can be found, so a misconfigured process stops
    /// before any file is touched.
    pub async fn connect(settings: S3Settings) -> BackendResult<Self> {
        settings.validate()?;

        let region_provider = RegionProviderChain::first_try(settings.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let provider = aws_config.credentials_provider().ok_or_else(|| {
            BackendError::Credentials("no credentials provider configured".to_string())
        })?;
        provider
            .provide_credentials()
            .await
            .map_err(|e| BackendError::Credentials(e.to_string()))?;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(endpoint) = &settings.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if settings.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        s3_config_builder = s3_config_builder.timeout_config(settings.timeout_config());

        Ok(Self {
            client: AwsS3Client::from_conf(s3_config_builder.build()),
            bucket: Arc::from(settings.bucket),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Build a request body that streams `range` from disk
async fn byte_stream(range: &ObjectRange) -> BackendResult<ByteStream> {
    if range.is_empty() {
        return Ok(ByteStream::from(Vec::new()));
    }

    ByteStream::read_from()
        .path(range.path())
        .offset(range.offset())
        .length(Length::Exact(range.length()))
        .build()
        .await
        .map_err(|e| BackendError::Io(std::io::Error::other(e.to_string())))
}

fn content_length(range: &ObjectRange) -> BackendResult<i64> {
    i64::try_from(range.length())
        .map_err(|_| BackendError::InvalidConfig(format!("body of {} bytes is too large", range.length())))
}

fn to_aws_acl(acl: CannedAcl) -> ObjectCannedAcl {
    ObjectCannedAcl::from(acl.as_str())
}

#[async_trait]
impl ObjectStore for S3Backend {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put_object(
        &self,
        key: &str,
        body: ObjectRange,
        content_type: &str,
        acl: CannedAcl,
    ) -> BackendResult<()> {
        let length = content_length(&body)?;
        let stream = byte_stream(&body).await?;

        self.client
            .put_object()
            .bucket(self.bucket.as_ref())
            .key(key)
            .body(stream)
            .content_length(length)
            .content_type(content_type)
            .acl(to_aws_acl(acl))
            .send()
            .await?;

        Ok(())
    }

    async fn init_multipart(
        &self,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
    ) -> BackendResult<Arc<dyn MultipartSession>> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(self.bucket.as_ref())
            .key(key)
            .content_type(content_type)
            .acl(to_aws_acl(acl))
            .send()
            .await?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| BackendError::Multipart("No upload ID returned".to_string()))?
            .to_string();

        debug!(key, upload_id = %upload_id, "Initiated multipart upload");

        Ok(Arc::new(S3MultipartSession {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id,
        }))
    }
}

/// Handle on one S3 multipart upload
struct S3MultipartSession {
    client: AwsS3Client,
    bucket: Arc<str>,
    key: String,
    upload_id: String,
}

#[async_trait]
impl MultipartSession for S3MultipartSession {
    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn put_part(&self, part_number: u32, body: ObjectRange) -> BackendResult<CompletedPart> {
        let aws_part_number = i32::try_from(part_number)
            .map_err(|_| BackendError::Multipart(format!("part number {} out of range", part_number)))?;
        let length = content_length(&body)?;
        let stream = byte_stream(&body).await?;

        let response = self
            .client
            .upload_part()
            .bucket(self.bucket.as_ref())
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(aws_part_number)
            .content_length(length)
            .body(stream)
            .send()
            .await?;

        let etag = response
            .e_tag()
            .ok_or_else(|| BackendError::Multipart("No ETag returned for part".to_string()))?;

        Ok(CompletedPart::new(part_number, etag))
    }

    async fn complete(&self, parts: &[CompletedPart]) -> BackendResult<()> {
        let completed_parts = parts
            .iter()
            .map(|p| {
                let part_number = i32::try_from(p.part_number).map_err(|_| {
                    BackendError::Multipart(format!("part number {} out of range", p.part_number))
                })?;
                Ok(aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(&p.etag)
                    .build())
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(self.bucket.as_ref())
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await?;

        Ok(())
    }

    async fn abort(&self) -> BackendResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(self.bucket.as_ref())
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await?;

        Ok(())
    }
}
