use std::time::Duration;

/// Header carrying the SHA-256 hex digest of a chunk body.
pub const CHUNK_CHECKSUM_HEADER: &str = "X-Chunk-Sha256";

/// Collection path for upload sessions, relative to the backend base URL.
pub const UPLOADS_PATH: &str = "/uploads";

/// Timeout for a single backend request.
///
/// Chunk bodies are several MiB, so this is sized for slow links rather
/// than for the small JSON requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Path of a single session resource.
pub fn session_path(session_id: &str) -> String {
    format!("{UPLOADS_PATH}/{session_id}")
}

/// Path of one chunk within a session.
pub fn chunk_path(session_id: &str, index: u32) -> String {
    format!("{UPLOADS_PATH}/{session_id}/chunks/{index}")
}

/// Path of the finalize action for a session.
pub fn finalize_path(session_id: &str) -> String {
    format!("{UPLOADS_PATH}/{session_id}/finalize")
}
