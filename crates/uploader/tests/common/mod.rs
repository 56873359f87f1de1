//! Fault-injecting backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chunkwise_protocol::{
    ChunkAck, EventKind, FinalizeResponse, InitSessionRequest, InitSessionResponse, ProgressEvent,
    SessionStatusResponse,
};
use chunkwise_transfer::{ChunkSource, MemorySource};
use chunkwise_uploader::{
    BackendError, BackendFuture, MemoryBackend, RetryPolicy, Subscription, UploadBackend,
    UploadClient, UploaderConfig,
};
use tokio::sync::Notify;

/// Pauses a chunk upload until released.
pub struct Gate {
    pub reached: Notify,
    pub release: Notify,
}

/// Wraps [`MemoryBackend`] with scripted failures and call accounting.
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    attempts: Mutex<Vec<u32>>,
    chunk_faults: Mutex<HashMap<u32, VecDeque<BackendError>>>,
    finalize_faults: Mutex<VecDeque<BackendError>>,
    status_faults: Mutex<VecDeque<BackendError>>,
    gates: Mutex<HashMap<u32, Arc<Gate>>>,
    finalize_calls: AtomicUsize,
}

impl FaultyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `errors.len()` uploads of chunk `index` fail in order.
    pub fn fail_chunk(&self, index: u32, errors: Vec<BackendError>) {
        self.chunk_faults
            .lock()
            .unwrap()
            .insert(index, errors.into());
    }

    pub fn fail_finalize(&self, errors: Vec<BackendError>) {
        *self.finalize_faults.lock().unwrap() = errors.into();
    }

    /// The next `errors.len()` session status queries fail in order.
    pub fn fail_status(&self, errors: Vec<BackendError>) {
        *self.status_faults.lock().unwrap() = errors.into();
    }

    pub fn clear_faults(&self) {
        self.chunk_faults.lock().unwrap().clear();
        self.finalize_faults.lock().unwrap().clear();
        self.status_faults.lock().unwrap().clear();
    }

    /// The next upload of chunk `index` waits until the gate is released.
    pub fn gate(&self, index: u32) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            reached: Notify::new(),
            release: Notify::new(),
        });
        self.gates.lock().unwrap().insert(index, Arc::clone(&gate));
        gate
    }

    /// Every chunk upload attempt, in call order.
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, index: u32) -> usize {
        self.attempts().iter().filter(|&&i| i == index).count()
    }

    pub fn reset_attempts(&self) {
        self.attempts.lock().unwrap().clear();
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }
}

impl UploadBackend for FaultyBackend {
    fn initialize_session<'a>(
        &'a self,
        request: &'a InitSessionRequest,
    ) -> BackendFuture<'a, InitSessionResponse> {
        self.inner.initialize_session(request)
    }

    fn upload_chunk<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
        checksum: &'a str,
        data: &'a [u8],
    ) -> BackendFuture<'a, ChunkAck> {
        Box::pin(async move {
            self.attempts.lock().unwrap().push(index);

            let gate = self.gates.lock().unwrap().remove(&index);
            if let Some(gate) = gate {
                gate.reached.notify_one();
                gate.release.notified().await;
            }

            let fault = self
                .chunk_faults
                .lock()
                .unwrap()
                .get_mut(&index)
                .and_then(VecDeque::pop_front);
            if let Some(err) = fault {
                return Err(err);
            }
            self.inner
                .upload_chunk(session_id, index, checksum, data)
                .await
        })
    }

    fn session_status<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BackendFuture<'a, SessionStatusResponse> {
        Box::pin(async move {
            let fault = self.status_faults.lock().unwrap().pop_front();
            if let Some(err) = fault {
                return Err(err);
            }
            self.inner.session_status(session_id).await
        })
    }

    fn finalize<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, FinalizeResponse> {
        Box::pin(async move {
            self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            let fault = self.finalize_faults.lock().unwrap().pop_front();
            if let Some(err) = fault {
                return Err(err);
            }
            self.inner.finalize(session_id).await
        })
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, ()> {
        self.inner.delete_session(session_id)
    }
}

/// 10 chunks of 1 KiB.
pub const CHUNK: u64 = 1024;
pub const FILE_SIZE: usize = 10 * 1024;

pub fn test_data() -> Vec<u8> {
    (0..FILE_SIZE).map(|i| (i % 251) as u8).collect()
}

pub fn source() -> Arc<dyn ChunkSource> {
    Arc::new(MemorySource::new(test_data()))
}

pub fn config(concurrency: usize, max_retries: u32) -> UploaderConfig {
    UploaderConfig {
        chunk_size: CHUNK,
        concurrency,
        retry: RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        },
        ..UploaderConfig::default()
    }
}

pub fn client(backend: &Arc<FaultyBackend>, config: UploaderConfig) -> Arc<UploadClient> {
    let backend: Arc<dyn UploadBackend> = backend.clone();
    Arc::new(UploadClient::new(backend, config).unwrap())
}

pub fn transient() -> BackendError {
    BackendError::Transport("connection reset".into())
}

/// Collects every buffered event.
pub fn drain(sub: &mut Subscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(evt) = sub.try_recv() {
        events.push(evt);
    }
    events
}

pub fn count_failures(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::UploadFailed { .. }))
        .count()
}
