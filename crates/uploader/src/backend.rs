//! Backend boundary of the upload protocol.
//!
//! `UploadBackend` is implemented by [`HttpBackend`](crate::HttpBackend) for
//! real servers and [`MemoryBackend`](crate::MemoryBackend) for in-process
//! use.

use std::future::Future;
use std::pin::Pin;

use chunkwise_protocol::{
    ChunkAck, FinalizeResponse, InitSessionRequest, InitSessionResponse, SessionStatusResponse,
};

use crate::error::BackendError;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Server-side session store and assembler.
pub trait UploadBackend: Send + Sync {
    /// Creates a session and returns its server-issued id.
    fn initialize_session<'a>(
        &'a self,
        request: &'a InitSessionRequest,
    ) -> BackendFuture<'a, InitSessionResponse>;

    /// Stores chunk `index`. `checksum` is the SHA-256 hex digest of `data`.
    fn upload_chunk<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
        checksum: &'a str,
        data: &'a [u8],
    ) -> BackendFuture<'a, ChunkAck>;

    /// Returns the chunk indices durably stored for `session_id`.
    ///
    /// Fails with [`BackendError::SessionNotFound`] if the session expired
    /// or was evicted.
    fn session_status<'a>(&'a self, session_id: &'a str)
    -> BackendFuture<'a, SessionStatusResponse>;

    /// Assembles the stored chunks. Idempotent: repeated calls on an
    /// assembled session return the same job id.
    fn finalize<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, FinalizeResponse>;

    /// Best-effort release of server storage held by the session.
    fn delete_session<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, ()>;
}
