//! Reconciles local acknowledgment state with the server.

use chunkwise_protocol::UploadStatus;

use crate::backend::UploadBackend;
use crate::error::{BackendError, UploadError};
use crate::registry::SessionEntry;
use crate::retry::RetryPolicy;

/// Where a session stands after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Acknowledged chunks after the merge.
    pub acknowledged: usize,
    /// Indices the server confirmed that local state lacked.
    pub newly_acknowledged: usize,
    /// Lowest unacknowledged index; `None` when every chunk is stored.
    pub resume_cursor: Option<u32>,
}

/// Queries the server's acknowledged set and unions it into the session.
///
/// Running it twice with no upload activity in between yields the same
/// acknowledged set and cursor. A session unknown to the server fails with
/// [`UploadError::SessionExpired`].
pub(crate) async fn resolve(
    backend: &dyn UploadBackend,
    entry: &SessionEntry,
    policy: &RetryPolicy,
) -> Result<ResumePoint, UploadError> {
    let session_id = entry.session.id();
    if entry.session.status() == UploadStatus::Cancelled {
        return Err(UploadError::Cancelled(session_id));
    }

    let status = query_status(backend, &session_id, policy).await?;

    let newly_acknowledged = entry
        .session
        .merge_acknowledged(&status.acknowledged_chunks)
        .map_err(|e| UploadError::Backend(BackendError::Decode(e.to_string())))?;

    let point = ResumePoint {
        acknowledged: entry.session.acknowledged().len(),
        newly_acknowledged,
        resume_cursor: entry.session.resume_cursor(),
    };
    tracing::info!(
        session = %session_id,
        acknowledged = point.acknowledged,
        newly_acknowledged,
        cursor = ?point.resume_cursor,
        "resume point resolved"
    );
    Ok(point)
}

async fn query_status(
    backend: &dyn UploadBackend,
    session_id: &str,
    policy: &RetryPolicy,
) -> Result<chunkwise_protocol::SessionStatusResponse, UploadError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match backend.session_status(session_id).await {
            Ok(status) => return Ok(status),
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    session = %session_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "session status query failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(UploadError::from_backend(e, session_id)),
        }
    }
}
