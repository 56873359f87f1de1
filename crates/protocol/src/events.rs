//! Progress events delivered to session subscribers.

use serde::{Deserialize, Serialize};

/// What happened to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A chunk was durably stored by the server.
    ChunkAck { index: u32 },
    /// All chunks are stored; the finalize request is in flight.
    AssemblyStarted,
    /// The server assembled the file.
    UploadCompleted {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// The session failed. Emitted exactly once per failure.
    UploadFailed {
        reason: String,
        #[serde(rename = "canResume")]
        can_resume: bool,
    },
    UploadPaused,
    /// Transfer re-entered `uploading` after the resume cursor was resolved.
    UploadResumed {
        #[serde(rename = "resumeCursor", default, skip_serializing_if = "Option::is_none")]
        resume_cursor: Option<u32>,
    },
    UploadCancelled,
}

impl EventKind {
    /// Returns `true` if no further events follow for this transfer attempt.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::UploadCompleted { .. } | Self::UploadFailed { .. } | Self::UploadCancelled
        )
    }
}

/// Progress payload emitted for every session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    /// Percent complete in `[0, 100]`.
    pub progress: f64,
    /// Bytes per second over the sampling window; `None` while unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ack_flattens_type_tag() {
        let evt = ProgressEvent {
            session_id: "s1".into(),
            progress: 70.0,
            speed: Some(1024.0),
            eta_secs: None,
            kind: EventKind::ChunkAck { index: 6 },
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"type\":\"chunk_ack\""));
        assert!(json.contains("\"index\":6"));
        assert!(json.contains("\"sessionId\":\"s1\""));
        assert!(!json.contains("etaSecs"));
        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, evt);
    }

    #[test]
    fn failed_event_carries_can_resume() {
        let evt = ProgressEvent {
            session_id: "s1".into(),
            progress: 30.0,
            speed: None,
            eta_secs: None,
            kind: EventKind::UploadFailed {
                reason: "chunk 3 exhausted retries".into(),
                can_resume: true,
            },
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"type\":\"upload_failed\""));
        assert!(json.contains("\"canResume\":true"));
        assert!(!json.contains("speed"));
    }

    #[test]
    fn unit_variants_parse() {
        let json = r#"{"sessionId":"s1","progress":100.0,"type":"assembly_started"}"#;
        let parsed: ProgressEvent = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, EventKind::AssemblyStarted);
        assert!(parsed.speed.is_none());
    }

    #[test]
    fn final_kinds() {
        assert!(EventKind::UploadCancelled.is_final());
        assert!(
            EventKind::UploadCompleted {
                job_id: "j".into()
            }
            .is_final()
        );
        assert!(!EventKind::AssemblyStarted.is_final());
        assert!(!EventKind::UploadPaused.is_final());
    }
}
