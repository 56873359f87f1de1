//! Wire types shared by the chunkwise upload client and its backends.
//!
//! Nothing in this crate performs I/O. The request/response payloads mirror
//! the five backend operations of the resumable upload protocol
//! (initialize, upload chunk, status, finalize, delete) and the progress
//! events delivered to subscribers.

pub mod constants;
pub mod events;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use events::{EventKind, ProgressEvent};
pub use messages::{
    ChunkAck, ErrorResponse, FinalizeResponse, InitSessionRequest, InitSessionResponse,
    SessionStatusResponse,
};
pub use types::UploadStatus;
