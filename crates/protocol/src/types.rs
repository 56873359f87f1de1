use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload session.
///
/// ```text
/// initializing -> uploading <-> paused -> assembling -> completed
///                     |           |           |
///                     +--------> failed <-----+
///
/// initializing | uploading | paused | assembling | failed -> cancelled
/// ```
///
/// `cancelled` is reachable from every non-terminal state and also from
/// `failed`, so a failed session can still release its server storage.
/// `failed` is terminal unless the caller explicitly resumes, which
/// re-enters `uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Initializing,
    Uploading,
    Paused,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    /// Returns `true` for `completed`, `failed` and `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if the state machine has an edge `self -> next`.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Initializing, Uploading) => true,
            (Uploading, Paused | Assembling | Failed) => true,
            (Paused, Uploading | Failed) => true,
            (Assembling, Completed | Failed) => true,
            // Explicit resume of a failed session.
            (Failed, Uploading) => true,
            // A failed session still holds server storage until cancelled.
            (Initializing | Uploading | Paused | Assembling | Failed, Cancelled) => true,
            _ => false,
        }
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
