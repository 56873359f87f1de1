//! Transfer engine: sends missing chunks and finalizes the session.
//!
//! One driver runs per session. Chunks are scheduled in ascending index
//! order with at most `concurrency` uploads in flight. Transient failures
//! are retried per chunk with exponential backoff; the first permanent
//! failure stops scheduling, lets in-flight uploads drain, and fails the
//! session with exactly one `upload_failed` event.

use std::sync::Arc;

use chunkwise_protocol::{EventKind, UploadStatus};
use chunkwise_transfer::{ChunkDescriptor, TransferError, read_chunk};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;

use crate::backend::UploadBackend;
use crate::error::{BackendError, UploadError};
use crate::registry::SessionEntry;
use crate::retry::RetryPolicy;

pub(crate) struct TransferEngine<'a> {
    backend: &'a dyn UploadBackend,
    policy: &'a RetryPolicy,
    concurrency: usize,
}

impl<'a> TransferEngine<'a> {
    pub(crate) fn new(
        backend: &'a dyn UploadBackend,
        policy: &'a RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            backend,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Drives `entry` to completion and returns the job id.
    ///
    /// The caller must hold the session's driver slot.
    pub(crate) async fn run(&self, entry: &Arc<SessionEntry>) -> Result<String, UploadError> {
        let session_id = entry.session.id();

        match entry.session.status() {
            UploadStatus::Uploading => {}
            UploadStatus::Assembling => return self.finalize(entry).await,
            UploadStatus::Completed => {
                return entry.session.job_id().ok_or(UploadError::NotActive {
                    session_id,
                    status: UploadStatus::Completed,
                });
            }
            UploadStatus::Paused => return Err(UploadError::Paused(session_id)),
            UploadStatus::Cancelled => return Err(UploadError::Cancelled(session_id)),
            status => return Err(UploadError::NotActive { session_id, status }),
        }

        if let Some(err) = self.transfer(entry).await {
            return Err(fail_session(entry, err));
        }

        match entry.session.status() {
            UploadStatus::Uploading => {}
            UploadStatus::Paused => {
                tracing::info!(session = %session_id, "transfer paused");
                return Err(UploadError::Paused(session_id));
            }
            UploadStatus::Cancelled => return Err(UploadError::Cancelled(session_id)),
            status => return Err(UploadError::NotActive { session_id, status }),
        }
        if entry.cancel.is_cancelled() {
            return Err(UploadError::Cancelled(session_id));
        }

        entry.session.begin_assembly().map_err(UploadError::State)?;
        tracing::info!(session = %session_id, "all chunks stored, assembling");
        entry.emit(EventKind::AssemblyStarted);

        self.finalize(entry).await
    }

    /// Sends every missing chunk. Returns the first permanent failure, if
    /// any, after in-flight uploads have drained.
    async fn transfer(&self, entry: &Arc<SessionEntry>) -> Option<UploadError> {
        let session_id = entry.session.id();
        let mut pending = entry.session.missing_chunks().into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<UploadError> = None;

        tracing::info!(
            session = %session_id,
            missing = pending.len(),
            cursor = ?entry.session.resume_cursor(),
            concurrency = self.concurrency,
            "transfer started"
        );

        loop {
            while failure.is_none()
                && in_flight.len() < self.concurrency
                && entry.session.status() == UploadStatus::Uploading
                && !entry.cancel.is_cancelled()
            {
                match pending.next() {
                    Some(descriptor) => {
                        in_flight.push(self.send_chunk(entry, &session_id, descriptor));
                    }
                    None => break,
                }
            }
            if in_flight.is_empty() {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => {
                    tracing::debug!(
                        session = %session_id,
                        in_flight = in_flight.len(),
                        "aborting in-flight chunks"
                    );
                    break;
                }
                result = in_flight.next() => result,
            };

            match result {
                Some(Ok(index)) => match entry.session.acknowledge(index) {
                    Ok(true) => {
                        tracing::debug!(session = %session_id, chunk = index, "chunk acknowledged");
                        entry.emit(EventKind::ChunkAck { index });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        failure.get_or_insert(UploadError::State(e));
                    }
                },
                Some(Err(e)) => {
                    if failure.is_none() {
                        tracing::debug!(session = %session_id, error = %e, "stopping scheduling");
                        failure = Some(e);
                    }
                }
                None => break,
            }
        }

        if entry.cancel.is_cancelled() {
            return None;
        }
        failure
    }

    /// Reads and uploads one chunk, retrying transient failures.
    async fn send_chunk(
        &self,
        entry: &Arc<SessionEntry>,
        session_id: &str,
        descriptor: ChunkDescriptor,
    ) -> Result<u32, UploadError> {
        let index = descriptor.index;
        let source = Arc::clone(&entry.source);
        let chunk = tokio::task::spawn_blocking(move || read_chunk(source.as_ref(), descriptor))
            .await
            .map_err(|e| UploadError::Source(TransferError::Io(std::io::Error::other(e))))?
            .map_err(UploadError::Source)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .backend
                .upload_chunk(session_id, index, &chunk.checksum, &chunk.data)
                .await
                .and_then(|ack| {
                    if ack.acknowledged {
                        Ok(())
                    } else {
                        Err(BackendError::NotAcknowledged(index))
                    }
                });

            match result {
                Ok(()) => return Ok(index),
                Err(e) if e.is_transient() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        session = %session_id,
                        chunk = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "chunk upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(UploadError::ChunkUploadExhausted {
                        index,
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(UploadError::from_backend(e, session_id)),
            }
        }
    }

    /// Requests assembly, retrying transient failures. Backends treat
    /// finalize as idempotent.
    async fn finalize(&self, entry: &Arc<SessionEntry>) -> Result<String, UploadError> {
        let session_id = entry.session.id();
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => return Err(UploadError::Cancelled(session_id)),
                result = self.backend.finalize(&session_id) => result,
            };
            match result {
                Ok(response) => break response,
                Err(e) if e.is_transient() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        session = %session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "finalize failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(fail_session(entry, UploadError::from_backend(e, &session_id)));
                }
            }
        };

        if let Err(e) = entry.session.complete(response.job_id.clone()) {
            // Cancelled while the finalize request was in flight.
            if entry.session.status() == UploadStatus::Cancelled {
                return Err(UploadError::Cancelled(session_id));
            }
            return Err(UploadError::State(e));
        }
        tracing::info!(session = %session_id, job_id = %response.job_id, "upload completed");
        entry.emit(EventKind::UploadCompleted {
            job_id: response.job_id.clone(),
        });
        Ok(response.job_id)
    }
}

/// Records `err` on the session and notifies subscribers once.
pub(crate) fn fail_session(entry: &SessionEntry, err: UploadError) -> UploadError {
    let session_id = entry.session.id();
    let reason = err.to_string();
    let status = entry.session.status();
    if status == UploadStatus::Cancelled {
        return UploadError::Cancelled(session_id);
    }
    if let Err(e) = entry.session.fail(&reason) {
        tracing::warn!(session = %session_id, error = %e, "could not mark session failed");
    }
    tracing::error!(
        session = %session_id,
        error = %reason,
        can_resume = err.can_resume(),
        "upload failed"
    );
    entry.emit(EventKind::UploadFailed {
        reason,
        can_resume: err.can_resume(),
    });
    err
}
