//! Upload error types.

use chunkwise_protocol::UploadStatus;
use chunkwise_transfer::TransferError;

/// Errors reported by an [`UploadBackend`](crate::UploadBackend).
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request rejected {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("chunk {0} not acknowledged")]
    NotAcknowledged(u32),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Transport failures, timeouts, 5xx responses and missing
    /// acknowledgments are worth retrying; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::Server { .. } | Self::NotAcknowledged(_)
        )
    }
}

/// Session-level upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Rejected before any session was created. Never retried.
    #[error("validation failed: {0}")]
    Validation(#[source] TransferError),

    /// Reading the local source failed.
    #[error("source error: {0}")]
    Source(#[source] TransferError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("chunk {index} failed after {attempts} attempts: {reason}")]
    ChunkUploadExhausted {
        index: u32,
        attempts: u32,
        reason: String,
    },

    /// The server no longer knows the session; restart from chunk 0.
    #[error("session expired on server: {0}")]
    SessionExpired(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {session_id} is {status}")]
    NotActive {
        session_id: String,
        status: UploadStatus,
    },

    #[error("session {0} is already transferring")]
    AlreadyRunning(String),

    #[error("session {0} paused")]
    Paused(String),

    #[error("session {0} cancelled")]
    Cancelled(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("state error: {0}")]
    State(#[source] TransferError),
}

impl UploadError {
    /// Maps a backend failure for `session_id`, surfacing a missing session
    /// as [`UploadError::SessionExpired`].
    pub(crate) fn from_backend(err: BackendError, session_id: &str) -> Self {
        match err {
            BackendError::SessionNotFound(_) => Self::SessionExpired(session_id.to_string()),
            other => Self::Backend(other),
        }
    }

    /// Whether a later resume attempt may succeed.
    pub fn can_resume(&self) -> bool {
        match self {
            Self::ChunkUploadExhausted { .. } | Self::Source(_) | Self::Paused(_) => true,
            Self::Backend(e) => e.is_transient(),
            _ => false,
        }
    }
}
