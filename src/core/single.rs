/*!
 * Single-shot upload: one PUT carrying the whole file
 */

use std::sync::Arc;

use tracing::debug;

use super::{content_type_for, open_for_upload, FileTask, UploadTarget};
use crate::backend::ObjectRange;
use crate::error::{Result, UploadError};

/// Upload `task` with a single PUT and return the number of bytes sent
///
/// No retry happens here; a failed PUT is returned to the worker.
pub async fn upload_single(target: &UploadTarget, task: &FileTask) -> Result<u64> {
    let path = Arc::new(task.path());
    let length = open_for_upload(&path).await?;

    let key = target.key_for(&task.name);
    let content_type = content_type_for(&task.name);

    debug!(key = %key, length, content_type = %content_type, "PUT object");

    target
        .store()
        .put_object(&key, ObjectRange::whole(path, length), &content_type, target.acl())
        .await
        .map_err(|source| UploadError::Transfer { key, source })?;

    Ok(length)
}
