//! Types shared by all storage backends

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Canned access-control policy applied to an uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CannedAcl {
    /// Owner gets full control, nobody else has access
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    AwsExecRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
    LogDeliveryWrite,
}

impl CannedAcl {
    /// Wire name of the policy, as sent in the `x-amz-acl` header
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
            CannedAcl::AwsExecRead => "aws-exec-read",
            CannedAcl::BucketOwnerRead => "bucket-owner-read",
            CannedAcl::BucketOwnerFullControl => "bucket-owner-full-control",
            CannedAcl::LogDeliveryWrite => "log-delivery-write",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            "aws-exec-read" => Ok(CannedAcl::AwsExecRead),
            "bucket-owner-read" => Ok(CannedAcl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(CannedAcl::BucketOwnerFullControl),
            "log-delivery-write" => Ok(CannedAcl::LogDeliveryWrite),
            other => Err(format!("unknown canned ACL '{}'", other)),
        }
    }
}

/// A byte window `[offset, offset + length)` over a local file
///
/// Each range opens its own handle when read, so any number of ranges over
/// the same file can be read concurrently without sharing a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRange {
    path: Arc<PathBuf>,
    offset: u64,
    length: u64,
}

impl ObjectRange {
    pub fn new(path: Arc<PathBuf>, offset: u64, length: u64) -> Self {
        Self {
            path,
            offset,
            length,
        }
    }

    /// Range covering a whole file of `length` bytes
    pub fn whole(path: Arc<PathBuf>, length: u64) -> Self {
        Self::new(path, 0, length)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Read the whole window into memory with a positioned read
    pub async fn read(&self) -> io::Result<Bytes> {
        let len = usize::try_from(self.length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;

        let mut file = File::open(self.path.as_path()).await?;
        file.seek(io::SeekFrom::Start(self.offset)).await?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    /// Stream the window through without keeping it; fails if the file is
    /// shorter than the range
    pub async fn verify(&self) -> io::Result<u64> {
        let mut file = File::open(self.path.as_path()).await?;
        file.seek(io::SeekFrom::Start(self.offset)).await?;

        let copied = tokio::io::copy(&mut file.take(self.length), &mut tokio::io::sink()).await?;
        if copied != self.length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, found {}", self.length, copied),
            ));
        }

        Ok(copied)
    }
}

/// Receipt for one uploaded part, as listed in the commit manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,

    /// Backend-assigned entity tag for the stored part
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}
