//! In-process [`UploadBackend`] that keeps sessions in memory.
//!
//! Used for local runs and as the reference backend in tests. Chunk bodies
//! are checked against their checksum and expected length before they are
//! acknowledged, and finalize is idempotent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use chunkwise_protocol::{
    ChunkAck, FinalizeResponse, InitSessionRequest, InitSessionResponse, SessionStatusResponse,
};
use chunkwise_transfer::{ChunkPlan, checksum_bytes};

use crate::backend::{BackendFuture, UploadBackend};
use crate::error::BackendError;

struct StoredSession {
    request: InitSessionRequest,
    plan: ChunkPlan,
    chunks: BTreeMap<u32, Vec<u8>>,
    job_id: Option<String>,
    assembled: Option<Vec<u8>>,
}

/// Upload backend backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops a session as if it had expired on the server.
    pub fn evict(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    /// The assembled file of a finalized session.
    pub fn assembled(&self, session_id: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(session_id)
            .and_then(|s| s.assembled.clone())
    }

    /// Indices currently stored for a session.
    pub fn stored_chunks(&self, session_id: &str) -> Option<Vec<u32>> {
        self.lock()
            .get(session_id)
            .map(|s| s.chunks.keys().copied().collect())
    }

    /// The request a session was created with.
    pub fn request(&self, session_id: &str) -> Option<InitSessionRequest> {
        self.lock().get(session_id).map(|s| s.request.clone())
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self, request: &InitSessionRequest) -> Result<InitSessionResponse, BackendError> {
        let plan = ChunkPlan::new(request.file_size, request.chunk_size, u64::MAX).map_err(
            |e| BackendError::Rejected {
                status: 400,
                message: e.to_string(),
            },
        )?;
        if plan.total_chunks() != request.total_chunks {
            return Err(BackendError::Rejected {
                status: 400,
                message: format!(
                    "total_chunks {} does not match size {} / chunk {}",
                    request.total_chunks, request.file_size, request.chunk_size
                ),
            });
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(%session_id, file = %request.file_name, "memory backend: session created");
        self.lock().insert(
            session_id.clone(),
            StoredSession {
                request: request.clone(),
                plan,
                chunks: BTreeMap::new(),
                job_id: None,
                assembled: None,
            },
        );
        Ok(InitSessionResponse { session_id })
    }

    fn store(
        &self,
        session_id: &str,
        index: u32,
        checksum: &str,
        data: &[u8],
    ) -> Result<ChunkAck, BackendError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))?;

        let expected = session
            .plan
            .descriptor(index)
            .map(|d| d.size)
            .ok_or_else(|| BackendError::Rejected {
                status: 400,
                message: format!(
                    "chunk {index} out of range (total {})",
                    session.plan.total_chunks()
                ),
            })?;
        if data.len() as u64 != expected {
            return Err(BackendError::Rejected {
                status: 400,
                message: format!("chunk {index}: expected {expected} bytes, got {}", data.len()),
            });
        }
        if !checksum_bytes(data).eq_ignore_ascii_case(checksum) {
            return Err(BackendError::Rejected {
                status: 400,
                message: format!("chunk {index}: checksum mismatch"),
            });
        }

        // Re-sending a stored chunk overwrites it with identical bytes.
        session.chunks.insert(index, data.to_vec());
        Ok(ChunkAck { acknowledged: true })
    }

    fn status(&self, session_id: &str) -> Result<SessionStatusResponse, BackendError> {
        let sessions = self.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionStatusResponse {
            acknowledged_chunks: session.chunks.keys().copied().collect(),
        })
    }

    fn assemble(&self, session_id: &str) -> Result<FinalizeResponse, BackendError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))?;

        if let Some(job_id) = &session.job_id {
            return Ok(FinalizeResponse {
                job_id: job_id.clone(),
            });
        }

        let missing = session.plan.total_chunks() as usize - session.chunks.len();
        if missing > 0 {
            return Err(BackendError::Rejected {
                status: 409,
                message: format!("{missing} chunks missing"),
            });
        }

        let mut file = Vec::with_capacity(session.request.file_size as usize);
        for data in session.chunks.values() {
            file.extend_from_slice(data);
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(%session_id, %job_id, bytes = file.len(), "memory backend: assembled");

        session.assembled = Some(file);
        session.job_id = Some(job_id.clone());
        Ok(FinalizeResponse { job_id })
    }
}

impl UploadBackend for MemoryBackend {
    fn initialize_session<'a>(
        &'a self,
        request: &'a InitSessionRequest,
    ) -> BackendFuture<'a, InitSessionResponse> {
        Box::pin(async move { self.create(request) })
    }

    fn upload_chunk<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
        checksum: &'a str,
        data: &'a [u8],
    ) -> BackendFuture<'a, ChunkAck> {
        Box::pin(async move { self.store(session_id, index, checksum, data) })
    }

    fn session_status<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BackendFuture<'a, SessionStatusResponse> {
        Box::pin(async move { self.status(session_id) })
    }

    fn finalize<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, FinalizeResponse> {
        Box::pin(async move { self.assemble(session_id) })
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if self.lock().remove(session_id).is_some() {
                Ok(())
            } else {
                Err(BackendError::SessionNotFound(session_id.to_string()))
            }
        })
    }
}
