//! Caller-facing upload API.
//!
//! `UploadClient` owns the session registry and hands each transfer to the
//! engine. Every operation addresses a session by its server-issued id.

use std::path::Path;
use std::sync::Arc;

use chunkwise_protocol::{EventKind, InitSessionRequest, UploadStatus};
use chunkwise_transfer::{
    ChunkPlan, ChunkSource, FileSource, ProgressModel, SessionSnapshot, TransferError,
    UploadSession, fingerprint_source, validate_upload,
};
use tracing::{info, warn};

use crate::backend::UploadBackend;
use crate::config::UploaderConfig;
use crate::engine::{TransferEngine, fail_session};
use crate::error::UploadError;
use crate::registry::{SessionEntry, SessionRegistry, Subscription};
use crate::resume::{self, ResumePoint};
use crate::types::UploadOptions;

/// Resumable upload client.
pub struct UploadClient {
    backend: Arc<dyn UploadBackend>,
    config: UploaderConfig,
    registry: SessionRegistry,
}

/// A validated file ready to become a session.
struct Prepared {
    plan: ChunkPlan,
    fingerprint: String,
}

impl UploadClient {
    /// Creates a client. Fails if `config` does not validate.
    pub fn new(backend: Arc<dyn UploadBackend>, config: UploaderConfig) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            registry: SessionRegistry::default(),
        })
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Validates and plans `source`, opens a server session and registers
    /// it in `uploading` state. Returns the session id.
    ///
    /// Validation errors are raised before any network call.
    pub async fn initialize_upload(
        &self,
        file_name: &str,
        source: Arc<dyn ChunkSource>,
        options: UploadOptions,
    ) -> Result<String, UploadError> {
        let prepared = self.prepare(file_name, &source).await?;
        let plan = prepared.plan;

        let request = InitSessionRequest {
            file_name: file_name.to_string(),
            file_size: plan.file_size(),
            total_chunks: plan.total_chunks(),
            chunk_size: plan.chunk_size(),
            fingerprint: prepared.fingerprint.clone(),
            metadata: options.metadata.clone(),
        };
        let response = self.backend.initialize_session(&request).await?;

        let session = UploadSession::new(
            plan,
            file_name.to_string(),
            prepared.fingerprint,
            options.metadata,
            self.progress_model(plan.file_size()),
        );
        session
            .start(response.session_id.clone())
            .map_err(UploadError::State)?;
        self.registry.insert(SessionEntry::new(session, source));

        info!(
            session = %response.session_id,
            file = %file_name,
            size = plan.file_size(),
            chunks = plan.total_chunks(),
            "upload session initialized"
        );
        Ok(response.session_id)
    }

    /// Opens `path` and initializes an upload named after its file name.
    pub async fn initialize_file(
        &self,
        path: &Path,
        options: UploadOptions,
    ) -> Result<String, UploadError> {
        let file_name = file_name_of(path)?;
        let source: Arc<dyn ChunkSource> =
            Arc::new(FileSource::open(path).map_err(UploadError::Source)?);
        self.initialize_upload(&file_name, source, options).await
    }

    /// Rebuilds local state for a server-side session after the client lost
    /// it. The session is registered `paused`; call [`resume`](Self::resume)
    /// to reconcile and continue. Restoring a known id is a no-op.
    pub async fn restore_session(
        &self,
        session_id: &str,
        file_name: &str,
        source: Arc<dyn ChunkSource>,
        options: UploadOptions,
    ) -> Result<(), UploadError> {
        if self.registry.get(session_id).is_some() {
            return Ok(());
        }
        let prepared = self.prepare(file_name, &source).await?;
        let session = UploadSession::restored(
            session_id.to_string(),
            prepared.plan,
            file_name.to_string(),
            prepared.fingerprint,
            options.metadata,
            self.progress_model(prepared.plan.file_size()),
        );
        self.registry.insert(SessionEntry::new(session, source));
        info!(session = %session_id, file = %file_name, "session restored");
        Ok(())
    }

    /// [`restore_session`](Self::restore_session) for a file on disk.
    pub async fn restore_file(
        &self,
        session_id: &str,
        path: &Path,
        options: UploadOptions,
    ) -> Result<(), UploadError> {
        let file_name = file_name_of(path)?;
        let source: Arc<dyn ChunkSource> =
            Arc::new(FileSource::open(path).map_err(UploadError::Source)?);
        self.restore_session(session_id, &file_name, source, options)
            .await
    }

    /// Drives a freshly initialized session to completion and returns the
    /// job id.
    pub async fn upload(&self, session_id: &str) -> Result<String, UploadError> {
        let entry = self.entry(session_id)?;
        let _guard = entry
            .try_drive()
            .ok_or_else(|| UploadError::AlreadyRunning(session_id.to_string()))?;
        self.engine().run(&entry).await
    }

    /// Reconciles with the server and continues the transfer from the
    /// lowest unacknowledged chunk.
    ///
    /// Valid from `paused` and `failed`, and for an `uploading` or
    /// `assembling` session whose driver went away. A completed session
    /// returns its job id.
    pub async fn resume(&self, session_id: &str) -> Result<String, UploadError> {
        let entry = self.entry(session_id)?;
        let _guard = entry
            .try_drive()
            .ok_or_else(|| UploadError::AlreadyRunning(session_id.to_string()))?;

        match entry.session.status() {
            UploadStatus::Completed | UploadStatus::Assembling => {
                return self.engine().run(&entry).await;
            }
            UploadStatus::Cancelled => return Err(UploadError::Cancelled(session_id.to_string())),
            UploadStatus::Initializing => {
                return Err(UploadError::NotActive {
                    session_id: session_id.to_string(),
                    status: UploadStatus::Initializing,
                });
            }
            UploadStatus::Uploading | UploadStatus::Paused | UploadStatus::Failed => {}
        }

        let point = match resume::resolve(self.backend.as_ref(), &entry, &self.config.retry).await
        {
            Ok(point) => point,
            Err(e) if !e.can_resume() => return Err(fail_session(&entry, e)),
            Err(e) => return Err(e),
        };

        if matches!(
            entry.session.status(),
            UploadStatus::Paused | UploadStatus::Failed
        ) {
            entry
                .session
                .resume()
                .map_err(|e| state_error(&entry, e))?;
        }
        info!(session = %session_id, cursor = ?point.resume_cursor, "upload resumed");
        entry.emit(EventKind::UploadResumed {
            resume_cursor: point.resume_cursor,
        });

        self.engine().run(&entry).await
    }

    /// Reconciles local acknowledgment state with the server without
    /// transferring anything.
    pub async fn refresh(&self, session_id: &str) -> Result<ResumePoint, UploadError> {
        let entry = self.entry(session_id)?;
        resume::resolve(self.backend.as_ref(), &entry, &self.config.retry).await
    }

    /// Stops scheduling new chunks. In-flight chunks finish and their
    /// acknowledgments are kept; the driving call returns
    /// [`UploadError::Paused`]. Pausing a paused session is a no-op.
    pub fn pause(&self, session_id: &str) -> Result<(), UploadError> {
        let entry = self.entry(session_id)?;
        match entry.session.pause() {
            Ok(true) => {
                info!(session = %session_id, "upload paused");
                entry.emit(EventKind::UploadPaused);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(state_error(&entry, e)),
        }
    }

    /// Cancels the session, aborts in-flight chunks and asks the server to
    /// release its storage. Cancelling twice is a no-op.
    pub async fn cancel(&self, session_id: &str) -> Result<(), UploadError> {
        let entry = self.entry(session_id)?;
        match entry.session.cancel() {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => return Err(state_error(&entry, e)),
        }
        entry.cancel.cancel();
        info!(session = %session_id, "upload cancelled");
        entry.emit(EventKind::UploadCancelled);

        if let Err(e) = self.backend.delete_session(session_id).await {
            warn!(session = %session_id, error = %e, "failed to release server session");
        }
        Ok(())
    }

    /// Requests assembly once every chunk is stored. Calling it again on a
    /// completed session returns the same job id.
    pub async fn finalize(&self, session_id: &str) -> Result<String, UploadError> {
        let entry = self.entry(session_id)?;
        if let Some(job_id) = entry.session.job_id() {
            return Ok(job_id);
        }
        if !entry.session.is_fully_acknowledged() {
            return Err(UploadError::NotActive {
                session_id: session_id.to_string(),
                status: entry.session.status(),
            });
        }
        let _guard = entry
            .try_drive()
            .ok_or_else(|| UploadError::AlreadyRunning(session_id.to_string()))?;
        self.engine().run(&entry).await
    }

    /// Subscribes to progress events of a session.
    pub fn subscribe(&self, session_id: &str) -> Result<Subscription, UploadError> {
        Ok(self.entry(session_id)?.subscribe())
    }

    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, UploadError> {
        Ok(self.entry(session_id)?.session.snapshot())
    }

    /// Ids of all registered sessions, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .all()
            .iter()
            .map(|e| e.session.id())
            .collect();
        ids.sort();
        ids
    }

    /// Drops a session in a terminal state from the registry and returns
    /// its final snapshot.
    pub fn remove(&self, session_id: &str) -> Result<SessionSnapshot, UploadError> {
        let entry = self.entry(session_id)?;
        let status = entry.session.status();
        if !status.is_terminal() || entry.is_driving() {
            return Err(UploadError::NotActive {
                session_id: session_id.to_string(),
                status,
            });
        }
        self.registry.remove(session_id);
        info!(session = %session_id, %status, "session removed");
        Ok(entry.session.snapshot())
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, UploadError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| UploadError::UnknownSession(session_id.to_string()))
    }

    fn engine(&self) -> TransferEngine<'_> {
        TransferEngine::new(
            self.backend.as_ref(),
            &self.config.retry,
            self.config.concurrency,
        )
    }

    fn progress_model(&self, total_bytes: u64) -> ProgressModel {
        ProgressModel::new(
            total_bytes,
            Some(self.config.progress_window()),
            Some(self.config.progress_max_samples),
        )
    }

    async fn prepare(
        &self,
        file_name: &str,
        source: &Arc<dyn ChunkSource>,
    ) -> Result<Prepared, UploadError> {
        let limits = self.config.limits();
        validate_upload(file_name, source.len(), &limits).map_err(UploadError::Validation)?;
        let plan = ChunkPlan::new(source.len(), self.config.chunk_size, limits.max_file_size)
            .map_err(UploadError::Validation)?;

        let hashing = Arc::clone(source);
        let fingerprint = tokio::task::spawn_blocking(move || fingerprint_source(hashing.as_ref()))
            .await
            .map_err(|e| UploadError::Source(TransferError::Io(std::io::Error::other(e))))?
            .map_err(UploadError::Source)?;

        Ok(Prepared { plan, fingerprint })
    }
}

fn file_name_of(path: &Path) -> Result<String, UploadError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            UploadError::Validation(TransferError::InvalidFileName(path.display().to_string()))
        })
}

/// Maps a rejected transition to the error the caller should see.
fn state_error(entry: &SessionEntry, err: TransferError) -> UploadError {
    let session_id = entry.session.id();
    match entry.session.status() {
        UploadStatus::Cancelled => UploadError::Cancelled(session_id),
        status @ (UploadStatus::Completed | UploadStatus::Initializing) => {
            UploadError::NotActive { session_id, status }
        }
        _ => UploadError::State(err),
    }
}
