use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chunkwise_protocol::UploadStatus;

use crate::TransferError;
use crate::chunked::{ChunkDescriptor, ChunkPlan};
use crate::progress::ProgressModel;

/// Point-in-time view of a session, safe to hand to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub status: UploadStatus,
    pub acknowledged_chunks: usize,
    pub bytes_transferred: u64,
    pub progress: f64,
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
    pub last_error: Option<String>,
    pub job_id: Option<String>,
    /// SHA-256 of the whole file, as sent at initialization.
    pub fingerprint: String,
    pub metadata: BTreeMap<String, String>,
}

/// One upload attempt for one file (thread-safe).
///
/// All mutation of the acknowledged-chunk set goes through
/// [`acknowledge`](Self::acknowledge) and
/// [`merge_acknowledged`](Self::merge_acknowledged), which share a single
/// insertion path. The set never shrinks.
pub struct UploadSession {
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    id: String,
    file_name: String,
    fingerprint: String,
    metadata: BTreeMap<String, String>,
    plan: ChunkPlan,
    status: UploadStatus,
    acknowledged: BTreeSet<u32>,
    bytes_transferred: u64,
    last_error: Option<String>,
    job_id: Option<String>,
    progress: ProgressModel,
}

impl SessionInner {
    fn transition(&mut self, next: UploadStatus) -> Result<UploadStatus, TransferError> {
        let prev = self.status;
        if !prev.can_transition_to(next) {
            return Err(TransferError::InvalidTransition {
                from: prev,
                to: next,
            });
        }
        self.status = next;
        Ok(prev)
    }

    /// Inserts acknowledged indices; returns how many were new.
    fn insert_acks(&mut self, indices: &[u32]) -> Result<usize, TransferError> {
        let total = self.plan.total_chunks();
        if let Some(&index) = indices.iter().find(|&&i| i >= total) {
            return Err(TransferError::ChunkOutOfRange { index, total });
        }
        let mut added = 0;
        for &index in indices {
            if self.acknowledged.insert(index) {
                self.bytes_transferred += self.plan.chunk_len(index);
                added += 1;
            }
        }
        if added > 0 {
            self.progress.record(self.bytes_transferred);
        }
        Ok(added)
    }

    fn all_acknowledged(&self) -> bool {
        self.acknowledged.len() == self.plan.total_chunks() as usize
    }
}

impl UploadSession {
    /// Creates a session in `initializing` state for a planned file.
    ///
    /// The session id is assigned by [`start`](Self::start) once the server
    /// acknowledges creation.
    pub fn new(
        plan: ChunkPlan,
        file_name: String,
        fingerprint: String,
        metadata: BTreeMap<String, String>,
        progress: ProgressModel,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                id: String::new(),
                file_name,
                fingerprint,
                metadata,
                plan,
                status: UploadStatus::Initializing,
                acknowledged: BTreeSet::new(),
                bytes_transferred: 0,
                last_error: None,
                job_id: None,
                progress,
            }),
        }
    }

    /// Rebuilds a session for a server-side id whose local state was lost.
    ///
    /// The session starts `paused` with no local acknowledgments; a resume
    /// reconciles it against the server.
    pub fn restored(
        session_id: String,
        plan: ChunkPlan,
        file_name: String,
        fingerprint: String,
        metadata: BTreeMap<String, String>,
        progress: ProgressModel,
    ) -> Self {
        let session = Self::new(plan, file_name, fingerprint, metadata, progress);
        {
            let mut s = session.lock();
            s.id = session_id;
            s.status = UploadStatus::Paused;
        }
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the server-issued id: `initializing -> uploading`.
    pub fn start(&self, session_id: String) -> Result<(), TransferError> {
        let mut s = self.lock();
        s.transition(UploadStatus::Uploading)?;
        s.id = session_id;
        Ok(())
    }

    /// Records a chunk acknowledgment.
    ///
    /// Returns `Ok(true)` if the index was new. Acknowledgments arriving
    /// after cancellation are discarded (`Ok(false)`).
    pub fn acknowledge(&self, index: u32) -> Result<bool, TransferError> {
        let mut s = self.lock();
        if s.status == UploadStatus::Cancelled {
            return Ok(false);
        }
        Ok(s.insert_acks(&[index])? > 0)
    }

    /// Unions the server's authoritative acknowledged set into the local one.
    ///
    /// Returns how many indices were newly added.
    pub fn merge_acknowledged(&self, indices: &[u32]) -> Result<usize, TransferError> {
        let mut s = self.lock();
        if s.status == UploadStatus::Cancelled {
            return Ok(0);
        }
        s.insert_acks(indices)
    }

    /// `uploading -> paused`. Already paused is a no-op.
    pub fn pause(&self) -> Result<bool, TransferError> {
        let mut s = self.lock();
        if s.status == UploadStatus::Paused {
            return Ok(false);
        }
        s.transition(UploadStatus::Paused)?;
        Ok(true)
    }

    /// `paused | failed -> uploading`; clears the last error and restarts
    /// the speed window.
    pub fn resume(&self) -> Result<(), TransferError> {
        let mut s = self.lock();
        s.transition(UploadStatus::Uploading)?;
        s.last_error = None;
        s.progress.reset();
        Ok(())
    }

    /// `uploading -> assembling`, only once every chunk is acknowledged.
    pub fn begin_assembly(&self) -> Result<(), TransferError> {
        let mut s = self.lock();
        if !s.all_acknowledged() {
            return Err(TransferError::InvalidTransition {
                from: s.status,
                to: UploadStatus::Assembling,
            });
        }
        s.transition(UploadStatus::Assembling)?;
        Ok(())
    }

    /// `assembling -> completed` with the downstream job id.
    pub fn complete(&self, job_id: String) -> Result<(), TransferError> {
        let mut s = self.lock();
        if !s.all_acknowledged() {
            return Err(TransferError::InvalidTransition {
                from: s.status,
                to: UploadStatus::Completed,
            });
        }
        s.transition(UploadStatus::Completed)?;
        s.job_id = Some(job_id);
        Ok(())
    }

    /// Marks the session failed with `reason`. On a session that already
    /// failed only the reason is replaced.
    pub fn fail(&self, reason: &str) -> Result<(), TransferError> {
        let mut s = self.lock();
        if s.status != UploadStatus::Failed {
            s.transition(UploadStatus::Failed)?;
        }
        s.last_error = Some(reason.to_string());
        Ok(())
    }

    /// Marks the session cancelled. Already cancelled is a no-op.
    pub fn cancel(&self) -> Result<bool, TransferError> {
        let mut s = self.lock();
        if s.status == UploadStatus::Cancelled {
            return Ok(false);
        }
        s.transition(UploadStatus::Cancelled)?;
        Ok(true)
    }

    /// Unacknowledged chunks in ascending index order.
    pub fn missing_chunks(&self) -> Vec<ChunkDescriptor> {
        let s = self.lock();
        s.plan
            .iter()
            .filter(|d| !s.acknowledged.contains(&d.index))
            .collect()
    }

    /// Lowest unacknowledged chunk index, or `None` when all are stored.
    pub fn resume_cursor(&self) -> Option<u32> {
        let s = self.lock();
        (0..s.plan.total_chunks()).find(|i| !s.acknowledged.contains(i))
    }

    pub fn is_acknowledged(&self, index: u32) -> bool {
        self.lock().acknowledged.contains(&index)
    }

    pub fn is_fully_acknowledged(&self) -> bool {
        self.lock().all_acknowledged()
    }

    /// Copy of the acknowledged-chunk set.
    pub fn acknowledged(&self) -> BTreeSet<u32> {
        self.lock().acknowledged.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.lock();
        let progress = s.progress.snapshot();
        SessionSnapshot {
            session_id: s.id.clone(),
            file_name: s.file_name.clone(),
            file_size: s.plan.file_size(),
            chunk_size: s.plan.chunk_size(),
            total_chunks: s.plan.total_chunks(),
            status: s.status,
            acknowledged_chunks: s.acknowledged.len(),
            bytes_transferred: s.bytes_transferred,
            progress: progress.percent,
            speed: progress.speed,
            eta: progress.eta,
            last_error: s.last_error.clone(),
            job_id: s.job_id.clone(),
            fingerprint: s.fingerprint.clone(),
            metadata: s.metadata.clone(),
        }
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn status(&self) -> UploadStatus {
        self.lock().status
    }

    pub fn plan(&self) -> ChunkPlan {
        self.lock().plan
    }

    pub fn file_name(&self) -> String {
        self.lock().file_name.clone()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.lock().bytes_transferred
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn job_id(&self) -> Option<String> {
        self.lock().job_id.clone()
    }
}
