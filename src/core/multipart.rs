/*!
 * Multipart upload of one large file
 *
 * The file is cut into fixed-size byte ranges, every range is uploaded as a
 * numbered part on its own task, and the session waits for all of them
 * before deciding. All parts succeeded: the manifest is committed in
 * ascending part order. Anything failed: outstanding part tasks are
 * cancelled and drained, then the session is aborted exactly once.
 *
 * ```text
 * Initiated -> PartsInFlight -> Completed
 *                           \-> Aborted
 * ```
 */

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{content_type_for, open_for_upload, FileTask, TransferLimits, UploadTarget};
use crate::backend::{BackendError, BackendResult, CompletedPart, MultipartSession, ObjectRange};
use crate::error::{Result, UploadError};

/// Lifecycle of a multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Remote session opened, nothing dispatched yet
    Initiated,
    /// Part tasks dispatched and not yet resolved
    PartsInFlight,
    /// Manifest committed
    Completed,
    /// Session released after a part failure
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based part number
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Split `size` bytes into `ceil(size / chunk_size)` contiguous parts
///
/// Every part but the last is exactly `chunk_size` bytes. An empty file
/// yields no parts.
pub fn plan_parts(size: u64, chunk_size: u64) -> Result<Vec<PartPlan>> {
    if chunk_size == 0 {
        return Err(UploadError::Config(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let count = size.div_ceil(chunk_size);
    let count = u32::try_from(count).map_err(|_| {
        UploadError::Config(format!(
            "{} bytes in chunks of {} needs {} parts, more than a session can hold",
            size, chunk_size, count
        ))
    })?;

    Ok((0..count)
        .map(|index| {
            let offset = u64::from(index) * chunk_size;
            PartPlan {
                part_number: index + 1,
                offset,
                length: chunk_size.min(size - offset),
            }
        })
        .collect())
}

/// Order collected parts by part number and check they are exactly `1..=expected`
fn assemble_manifest(
    key: &str,
    mut parts: Vec<CompletedPart>,
    expected: usize,
) -> Result<Vec<CompletedPart>> {
    parts.sort_by_key(|p| p.part_number);

    if parts.len() != expected {
        return Err(UploadError::Manifest {
            key: key.to_string(),
            message: format!("expected {} parts, collected {}", expected, parts.len()),
        });
    }

    for (index, part) in parts.iter().enumerate() {
        if part.part_number as usize != index + 1 {
            return Err(UploadError::Manifest {
                key: key.to_string(),
                message: format!(
                    "part {} found where part {} belongs",
                    part.part_number,
                    index + 1
                ),
            });
        }
    }

    Ok(parts)
}

type PartOutcome = (u32, BackendResult<CompletedPart>);

/// One multipart session, owned by the worker uploading the file
struct MultipartUpload {
    session: Arc<dyn MultipartSession>,
    status: SessionStatus,
}

impl MultipartUpload {
    fn new(session: Arc<dyn MultipartSession>) -> Self {
        Self {
            session,
            status: SessionStatus::Initiated,
        }
    }

    fn key(&self) -> &str {
        self.session.key()
    }

    fn transition(&mut self, next: SessionStatus) {
        debug!(
            key = self.session.key(),
            upload_id = self.session.upload_id(),
            "{:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }

    /// Spawn one task per part; every task reads its own window of the file
    fn dispatch(
        &mut self,
        path: &Arc<PathBuf>,
        plans: &[PartPlan],
        part_concurrency: Option<usize>,
    ) -> JoinSet<PartOutcome> {
        let limiter = part_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        for plan in plans {
            let session = self.session.clone();
            let limiter = limiter.clone();
            let range = ObjectRange::new(path.clone(), plan.offset, plan.length);
            let part_number = plan.part_number;

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => match limiter.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            return (part_number, Err(BackendError::Multipart(e.to_string())))
                        }
                    },
                    None => None,
                };

                (part_number, session.put_part(part_number, range).await)
            });
        }

        self.transition(SessionStatus::PartsInFlight);
        tasks
    }

    /// Wait for every part; stop at the first failure
    ///
    /// After a failure the remaining tasks are cancelled and drained so none
    /// outlives the decision, and their results are discarded.
    async fn collect(
        &mut self,
        mut tasks: JoinSet<PartOutcome>,
        expected: usize,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::with_capacity(expected);
        let mut failure = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((part_number, Ok(part))) => {
                    debug!(key = self.key(), part_number, "Part uploaded");
                    parts.push(part);
                }
                Ok((part_number, Err(source))) => {
                    failure = Some(UploadError::Part {
                        key: self.key().to_string(),
                        part_number,
                        source,
                    });
                    break;
                }
                Err(e) => {
                    failure = Some(UploadError::Join {
                        key: self.key().to_string(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(failure) = failure {
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            return Err(failure);
        }

        assemble_manifest(self.key(), parts, expected)
    }

    async fn commit(&mut self, manifest: &[CompletedPart]) -> Result<()> {
        self.session
            .complete(manifest)
            .await
            .map_err(|source| UploadError::Commit {
                key: self.key().to_string(),
                source,
            })?;

        self.transition(SessionStatus::Completed);
        Ok(())
    }

    /// Release the remote session; returns the error to report for the file
    async fn abort(&mut self, cause: UploadError) -> UploadError {
        if self.status.is_terminal() {
            return cause;
        }

        let result = self.session.abort().await;
        self.transition(SessionStatus::Aborted);

        match result {
            Ok(()) => cause,
            Err(source) => {
                warn!(
                    key = self.key(),
                    upload_id = self.session.upload_id(),
                    "Abort failed: {}",
                    source
                );
                UploadError::Abort {
                    upload_id: self.session.upload_id().to_string(),
                    cause: Box::new(cause),
                    source,
                }
            }
        }
    }
}

/// Upload `task` as a multipart object and return the number of bytes sent
pub async fn upload_multipart(
    target: &UploadTarget,
    limits: &TransferLimits,
    task: &FileTask,
) -> Result<u64> {
    let path = Arc::new(task.path());
    let size = open_for_upload(&path).await?;
    let key = target.key_for(&task.name);

    let plans = plan_parts(size, limits.chunk_size)?;
    if plans.is_empty() {
        return Err(UploadError::Manifest {
            key,
            message: "an empty file cannot be uploaded in parts".to_string(),
        });
    }

    let content_type = content_type_for(&task.name);
    let session = target
        .store()
        .init_multipart(&key, &content_type, target.acl())
        .await
        .map_err(|source| UploadError::InitMultipart {
            key: key.clone(),
            source,
        })?;

    info!(
        "Uploading {} in {} parts (upload id {})",
        key,
        plans.len(),
        session.upload_id()
    );

    let mut upload = MultipartUpload::new(session);
    let tasks = upload.dispatch(&path, &plans, limits.part_concurrency);

    match upload.collect(tasks, plans.len()).await {
        Ok(manifest) => {
            upload.commit(&manifest).await?;
            Ok(size)
        }
        Err(cause) => Err(upload.abort(cause).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CannedAcl, MemoryBackend, ObjectStore};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const LIMITS: TransferLimits = TransferLimits {
        multipart_threshold: 25,
        chunk_size: 10,
        part_concurrency: None,
    };

    fn write_task(dir: &TempDir, name: &str, size: usize) -> (FileTask, Vec<u8>) {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(dir.path().join(name), &data).unwrap();
        let task = FileTask::new(Arc::new(dir.path().to_path_buf()), name, size as u64);
        (task, data)
    }

    fn target_for(backend: &MemoryBackend) -> UploadTarget {
        UploadTarget::new(Arc::new(backend.clone()), "", CannedAcl::Private)
    }

    #[test]
    fn test_plan_parts_covers_file_exactly() {
        let plans = plan_parts(30_000_000, 10_000_000).unwrap();
        assert_eq!(
            plans,
            vec![
                PartPlan { part_number: 1, offset: 0, length: 10_000_000 },
                PartPlan { part_number: 2, offset: 10_000_000, length: 10_000_000 },
                PartPlan { part_number: 3, offset: 20_000_000, length: 10_000_000 },
            ]
        );
    }

    #[test]
    fn test_plan_parts_short_last_part() {
        let plans = plan_parts(25_000_001, 10_000_000).unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[2].offset, 20_000_000);
        assert_eq!(plans[2].length, 5_000_001);

        let mut next = 0;
        for (i, plan) in plans.iter().enumerate() {
            assert_eq!(plan.part_number as usize, i + 1);
            assert_eq!(plan.offset, next);
            next += plan.length;
        }
        assert_eq!(next, 25_000_001);
    }

    #[test]
    fn test_plan_parts_edge_sizes() {
        assert!(plan_parts(0, 10).unwrap().is_empty());
        assert_eq!(plan_parts(1, 10).unwrap().len(), 1);
        assert_eq!(plan_parts(10, 10).unwrap().len(), 1);
        assert_eq!(plan_parts(11, 10).unwrap().len(), 2);
        assert!(matches!(plan_parts(10, 0), Err(UploadError::Config(_))));
    }

    #[test]
    fn test_assemble_manifest_sorts_by_part_number() {
        let parts = vec![
            CompletedPart::new(3, "c"),
            CompletedPart::new(1, "a"),
            CompletedPart::new(2, "b"),
        ];
        let manifest = assemble_manifest("k", parts, 3).unwrap();
        let numbers: Vec<u32> = manifest.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(manifest[0].etag, "a");
    }

    #[test]
    fn test_assemble_manifest_rejects_gaps_and_duplicates() {
        let gap = vec![CompletedPart::new(1, "a"), CompletedPart::new(3, "c")];
        assert!(matches!(
            assemble_manifest("k", gap, 2),
            Err(UploadError::Manifest { .. })
        ));

        let duplicate = vec![CompletedPart::new(1, "a"), CompletedPart::new(1, "a")];
        assert!(assemble_manifest("k", duplicate, 2).is_err());

        let short = vec![CompletedPart::new(1, "a")];
        assert!(assemble_manifest("k", short, 2).is_err());
    }

    #[tokio::test]
    async fn test_manifest_in_part_order_despite_completion_order() {
        let temp = TempDir::new().unwrap();
        let (task, data) = write_task(&temp, "video.mp4", 30);
        let backend = MemoryBackend::new()
            .delay_part(1, Duration::from_millis(120))
            .delay_part(2, Duration::from_millis(60));
        let target = target_for(&backend);

        let sent = upload_multipart(&target, &LIMITS, &task).await.unwrap();

        assert_eq!(sent, 30);
        let sessions = backend.sessions();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.key, "video.mp4");
        assert_eq!(session.content_type, "video/mp4");
        assert_eq!(session.finish_order, vec![3, 2, 1]);
        assert_eq!(session.committed, Some(vec![1, 2, 3]));
        assert_eq!(session.complete_calls, 1);
        assert_eq!(session.abort_calls, 0);
        assert_eq!(backend.object("video.mp4").unwrap(), data);
        assert!(backend.puts().is_empty());
    }

    #[tokio::test]
    async fn test_part_ranges_are_contiguous() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 27);
        let backend = MemoryBackend::new();

        upload_multipart(&target_for(&backend), &LIMITS, &task)
            .await
            .unwrap();

        let mut parts = backend.sessions()[0].parts.clone();
        parts.sort_by_key(|p| p.part_number);
        let ranges: Vec<(u32, u64, u64)> = parts
            .iter()
            .map(|p| (p.part_number, p.offset, p.length))
            .collect();
        assert_eq!(ranges, vec![(1, 0, 10), (2, 10, 10), (3, 20, 7)]);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_once_and_never_commits() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 30);
        let backend = MemoryBackend::new().fail_part(2);

        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        match result {
            Err(UploadError::Part { key, part_number, .. }) => {
                assert_eq!(key, "big.bin");
                assert_eq!(part_number, 2);
            }
            other => panic!("expected part error, got {:?}", other),
        }

        let session = &backend.sessions()[0];
        assert_eq!(session.abort_calls, 1);
        assert_eq!(session.complete_calls, 0);
        assert!(session.committed.is_none());
        assert!(backend.object("big.bin").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_part_failures_abort_once() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 50);
        let backend = MemoryBackend::new()
            .fail_part(1)
            .fail_part(2)
            .fail_part(3)
            .fail_part(4)
            .fail_part(5);

        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        assert!(matches!(result, Err(UploadError::Part { .. })));
        let session = &backend.sessions()[0];
        assert_eq!(session.abort_calls, 1);
        assert_eq!(session.complete_calls, 0);
    }

    #[tokio::test]
    async fn test_slow_parts_are_discarded_after_failure() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 30);
        let backend = MemoryBackend::new()
            .fail_part(1)
            .delay_part(2, Duration::from_secs(30))
            .delay_part(3, Duration::from_secs(30));

        let started = std::time::Instant::now();
        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        assert!(matches!(result, Err(UploadError::Part { part_number: 1, .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
        let session = &backend.sessions()[0];
        assert_eq!(session.abort_calls, 1);
        assert!(session.finish_order.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported_without_abort() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 30);
        let backend = MemoryBackend::new().fail_commit();

        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        assert!(matches!(result, Err(UploadError::Commit { .. })));
        let session = &backend.sessions()[0];
        assert_eq!(session.complete_calls, 1);
        assert_eq!(session.committed, Some(vec![1, 2, 3]));
        assert_eq!(session.abort_calls, 0);
    }

    #[tokio::test]
    async fn test_failed_abort_is_reported_with_cause() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 30);
        let backend = MemoryBackend::new().fail_part(3).fail_abort();

        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        match result {
            Err(UploadError::Abort { upload_id, cause, .. }) => {
                assert_eq!(upload_id, "upload-1");
                assert!(matches!(*cause, UploadError::Part { part_number: 3, .. }));
            }
            other => panic!("expected abort error, got {:?}", other),
        }
        assert_eq!(backend.sessions()[0].abort_calls, 1);
    }

    #[tokio::test]
    async fn test_init_failure_dispatches_nothing() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 30);
        let backend = MemoryBackend::new().fail_init("big.bin");

        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        assert!(matches!(result, Err(UploadError::InitMultipart { .. })));
        assert!(backend.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_open_error() {
        let temp = TempDir::new().unwrap();
        let task = FileTask::new(Arc::new(temp.path().to_path_buf()), "vanished.bin", 30);
        let backend = MemoryBackend::new();

        let result = upload_multipart(&target_for(&backend), &LIMITS, &task).await;

        assert!(matches!(result, Err(UploadError::Open { .. })));
        assert!(backend.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_all_parts_in_flight_by_default() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 40);
        let mut backend = MemoryBackend::new();
        for part in 1..=4 {
            backend = backend.delay_part(part, Duration::from_millis(50));
        }

        upload_multipart(&target_for(&backend), &LIMITS, &task)
            .await
            .unwrap();

        assert_eq!(backend.peak_concurrent_parts(), 4);
    }

    #[tokio::test]
    async fn test_part_concurrency_cap() {
        let temp = TempDir::new().unwrap();
        let (task, data) = write_task(&temp, "big.bin", 40);
        let mut backend = MemoryBackend::new();
        for part in 1..=4 {
            backend = backend.delay_part(part, Duration::from_millis(20));
        }
        let limits = TransferLimits {
            part_concurrency: Some(1),
            ..LIMITS
        };

        upload_multipart(&target_for(&backend), &limits, &task)
            .await
            .unwrap();

        assert_eq!(backend.peak_concurrent_parts(), 1);
        assert_eq!(backend.sessions()[0].committed, Some(vec![1, 2, 3, 4]));
        assert_eq!(backend.object("big.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_session_status_transitions() {
        let temp = TempDir::new().unwrap();
        let (task, _) = write_task(&temp, "big.bin", 20);
        let backend = MemoryBackend::new();
        let session = backend
            .init_multipart("big.bin", "application/octet-stream", CannedAcl::Private)
            .await
            .unwrap();
        let path = Arc::new(task.path());
        let plans = plan_parts(20, 10).unwrap();

        let mut upload = MultipartUpload::new(session);
        assert_eq!(upload.status, SessionStatus::Initiated);

        let tasks = upload.dispatch(&path, &plans, None);
        assert_eq!(upload.status, SessionStatus::PartsInFlight);

        let manifest = upload.collect(tasks, plans.len()).await.unwrap();
        upload.commit(&manifest).await.unwrap();
        assert_eq!(upload.status, SessionStatus::Completed);

        // A finished session is never aborted afterwards
        let err = upload.abort(UploadError::Config("late".to_string())).await;
        assert!(matches!(err, UploadError::Config(_)));
        assert_eq!(upload.status, SessionStatus::Completed);
        assert_eq!(backend.sessions()[0].abort_calls, 0);
    }
}
