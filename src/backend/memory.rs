//! In-memory object store
//!
//! Stores uploaded objects in a map and records every call the pipeline makes,
//! so tests can assert on exact request sequences. Failures and per-part
//! delays can be injected to drive the abort path and to scramble the order
//! in which parts finish. The CLI uses a recording-only instance for
//! `--dry-run`, which checks every byte range but keeps only sizes.

use super::error::{BackendError, BackendResult};
use super::types::{CannedAcl, CompletedPart, ObjectRange};
use super::{MultipartSession, ObjectStore};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A recorded single-shot PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecord {
    pub key: String,
    pub length: u64,
    pub content_type: String,
    pub acl: CannedAcl,
}

/// A part upload that reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Everything that happened to one multipart session
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub key: String,
    pub upload_id: String,
    pub content_type: String,
    pub acl: CannedAcl,

    /// Parts in the order their uploads were dispatched to the backend
    pub parts: Vec<PartRecord>,

    /// Part numbers in the order their uploads finished successfully
    pub finish_order: Vec<u32>,

    /// Manifest passed to `complete`, if it was called
    pub committed: Option<Vec<u32>>,

    /// Number of `complete` calls
    pub complete_calls: usize,

    /// Number of `abort` calls
    pub abort_calls: usize,
}

#[derive(Debug, Default)]
struct Failures {
    put_keys: HashSet<String>,
    init_keys: HashSet<String>,
    parts: HashSet<u32>,
    commit: bool,
    abort: bool,
}

#[derive(Debug, Default)]
struct StagedPart {
    length: u64,
    data: Bytes,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, Bytes>,
    sizes: HashMap<String, u64>,
    puts: Vec<PutRecord>,
    sessions: Vec<SessionRecord>,
    staged: HashMap<String, BTreeMap<u32, StagedPart>>,
}

#[derive(Debug, Default)]
struct Shared {
    record_only: bool,
    state: Mutex<State>,
    failures: Mutex<Failures>,
    part_delays: Mutex<HashMap<u32, Duration>>,
    put_delay: Mutex<Option<Duration>>,
    in_flight_puts: AtomicUsize,
    peak_puts: AtomicUsize,
    in_flight_parts: AtomicUsize,
    peak_parts: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read `body`, or only stream it through when content is not kept
    async fn load(&self, body: &ObjectRange) -> BackendResult<StagedPart> {
        if self.record_only {
            let length = body.verify().await?;
            Ok(StagedPart {
                length,
                data: Bytes::new(),
            })
        } else {
            let data = body.read().await?;
            Ok(StagedPart {
                length: data.len() as u64,
                data,
            })
        }
    }
}

/// Object store that keeps everything in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that checks every body is readable but keeps only its size
    pub fn recording_only() -> Self {
        Self {
            shared: Arc::new(Shared {
                record_only: true,
                ..Default::default()
            }),
        }
    }

    /// Make single-shot PUTs of `key` fail
    pub fn fail_put(self, key: impl Into<String>) -> Self {
        self.shared.failures().put_keys.insert(key.into());
        self
    }

    /// Make `init_multipart` for `key` fail
    pub fn fail_init(self, key: impl Into<String>) -> Self {
        self.shared.failures().init_keys.insert(key.into());
        self
    }

    /// Make every upload of part `part_number` fail
    pub fn fail_part(self, part_number: u32) -> Self {
        self.shared.failures().parts.insert(part_number);
        self
    }

    /// Make every `complete` call fail
    pub fn fail_commit(self) -> Self {
        self.shared.failures().commit = true;
        self
    }

    /// Make every `abort` call fail
    pub fn fail_abort(self) -> Self {
        self.shared.failures().abort = true;
        self
    }

    /// Hold part `part_number` for `delay` before storing it
    pub fn delay_part(self, part_number: u32, delay: Duration) -> Self {
        self.shared
            .part_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(part_number, delay);
        self
    }

    /// Hold every single-shot PUT for `delay`
    pub fn delay_puts(self, delay: Duration) -> Self {
        *self
            .shared
            .put_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    /// Stored content of `key`
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.shared.state().objects.get(key).cloned()
    }

    /// Size of the stored object `key`, kept even when content is not
    pub fn object_size(&self, key: &str) -> Option<u64> {
        self.shared.state().sizes.get(key).copied()
    }

    /// Keys of every stored object, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.state().sizes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every single-shot PUT, in call order
    pub fn puts(&self) -> Vec<PutRecord> {
        self.shared.state().puts.clone()
    }

    /// Every multipart session, in creation order
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.shared.state().sessions.clone()
    }

    /// Highest number of single-shot PUTs observed in flight at once
    pub fn peak_concurrent_puts(&self) -> usize {
        self.shared.peak_puts.load(Ordering::SeqCst)
    }

    /// Highest number of part uploads observed in flight at once
    pub fn peak_concurrent_parts(&self) -> usize {
        self.shared.peak_parts.load(Ordering::SeqCst)
    }

    fn with_session<T>(&self, index: usize, f: impl FnOnce(&mut SessionRecord) -> T) -> T {
        let mut state = self.shared.state();
        f(&mut state.sessions[index])
    }
}

/// Decrements an in-flight gauge when dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_object(
        &self,
        key: &str,
        body: ObjectRange,
        content_type: &str,
        acl: CannedAcl,
    ) -> BackendResult<()> {
        let now = self.shared.in_flight_puts.fetch_add(1, Ordering::SeqCst) + 1;
        let _gauge = InFlight(&self.shared.in_flight_puts);
        self.shared.peak_puts.fetch_max(now, Ordering::SeqCst);

        let delay = *self
            .shared
            .put_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.shared.state().puts.push(PutRecord {
            key: key.to_string(),
            length: body.length(),
            content_type: content_type.to_string(),
            acl,
        });

        if self.shared.failures().put_keys.contains(key) {
            return Err(BackendError::Rejected(format!("PUT {}", key)));
        }

        let loaded = self.shared.load(&body).await?;
        let mut state = self.shared.state();
        state.sizes.insert(key.to_string(), loaded.length);
        if !self.shared.record_only {
            state.objects.insert(key.to_string(), loaded.data);
        }
        Ok(())
    }

    async fn init_multipart(
        &self,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
    ) -> BackendResult<Arc<dyn MultipartSession>> {
        if self.shared.failures().init_keys.contains(key) {
            return Err(BackendError::Rejected(format!("create multipart upload {}", key)));
        }

        let mut state = self.shared.state();
        let index = state.sessions.len();
        let upload_id = format!("upload-{}", index + 1);

        state.sessions.push(SessionRecord {
            key: key.to_string(),
            upload_id: upload_id.clone(),
            content_type: content_type.to_string(),
            acl,
            ..Default::default()
        });
        state.staged.insert(upload_id.clone(), BTreeMap::new());

        Ok(Arc::new(MemorySession {
            backend: self.clone(),
            index,
            key: key.to_string(),
            upload_id,
        }))
    }
}

struct MemorySession {
    backend: MemoryBackend,
    index: usize,
    key: String,
    upload_id: String,
}

#[async_trait]
impl MultipartSession for MemorySession {
    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn put_part(&self, part_number: u32, body: ObjectRange) -> BackendResult<CompletedPart> {
        let shared = &self.backend.shared;
        let now = shared.in_flight_parts.fetch_add(1, Ordering::SeqCst) + 1;
        let _gauge = InFlight(&shared.in_flight_parts);
        shared.peak_parts.fetch_max(now, Ordering::SeqCst);

        self.backend.with_session(self.index, |session| {
            session.parts.push(PartRecord {
                part_number,
                offset: body.offset(),
                length: body.length(),
            })
        });

        let delay = self
            .backend
            .shared
            .part_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&part_number)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.backend.shared.failures().parts.contains(&part_number) {
            return Err(BackendError::Rejected(format!(
                "part {} of {}",
                part_number, self.upload_id
            )));
        }

        let loaded = self.backend.shared.load(&body).await?;

        let mut state = self.backend.shared.state();
        let staged = state
            .staged
            .get_mut(&self.upload_id)
            .ok_or_else(|| BackendError::Multipart(format!("no such upload {}", self.upload_id)))?;
        staged.insert(part_number, loaded);
        state.sessions[self.index].finish_order.push(part_number);

        Ok(CompletedPart::new(
            part_number,
            format!("\"{}-{}\"", self.upload_id, part_number),
        ))
    }

    async fn complete(&self, parts: &[CompletedPart]) -> BackendResult<()> {
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        self.backend.with_session(self.index, |session| {
            session.complete_calls += 1;
            session.committed = Some(numbers.clone());
        });

        if self.backend.shared.failures().commit {
            return Err(BackendError::Rejected(format!(
                "complete multipart upload {}",
                self.upload_id
            )));
        }

        if numbers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BackendError::Multipart(
                "parts must be listed in ascending order".to_string(),
            ));
        }

        let mut state = self.backend.shared.state();
        let staged = state
            .staged
            .remove(&self.upload_id)
            .ok_or_else(|| BackendError::Multipart(format!("no such upload {}", self.upload_id)))?;

        let mut object = BytesMut::new();
        let mut size = 0;
        for number in &numbers {
            let part = staged.get(number).ok_or_else(|| {
                BackendError::Multipart(format!("part {} was never uploaded", number))
            })?;
            size += part.length;
            object.extend_from_slice(&part.data);
        }

        state.sizes.insert(self.key.clone(), size);
        if !self.backend.shared.record_only {
            state.objects.insert(self.key.clone(), object.freeze());
        }
        Ok(())
    }

    async fn abort(&self) -> BackendResult<()> {
        self.backend
            .with_session(self.index, |session| session.abort_calls += 1);

        if self.backend.shared.failures().abort {
            return Err(BackendError::Rejected(format!(
                "abort multipart upload {}",
                self.upload_id
            )));
        }

        self.backend.shared.state().staged.remove(&self.upload_id);
        Ok(())
    }
}
