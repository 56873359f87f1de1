//! Chunk planning, upload session state and progress tracking.
//!
//! Everything here is synchronous and transport-agnostic. The async
//! transfer engine in `chunkwise-uploader` drives these types.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{
    Chunk, ChunkDescriptor, ChunkPlan, ChunkSource, FileSource, MemorySource, checksum_bytes,
    fingerprint_source, read_chunk,
};
pub use progress::{ProgressModel, ProgressSnapshot};
pub use types::{SessionSnapshot, UploadSession};
pub use validation::{UploadLimits, validate_file_name, validate_upload};

use chunkwise_protocol::UploadStatus;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default upper bound on a single upload: 2 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is empty")]
    EmptyFile,

    #[error("file too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("file type not allowed: {0}")]
    DisallowedType(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("chunk {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },
}
