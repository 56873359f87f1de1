//! Resumable chunked upload client.
//!
//! This crate drives [`chunkwise_transfer::UploadSession`]s against an
//! [`UploadBackend`]. It is a library crate with no UI dependencies; callers
//! observe progress through [`Subscription`]s.
//!
//! # Pipeline
//!
//! 1. **Validate + plan**: reject bad files before any network call,
//!    split the source into fixed-size chunks
//! 2. **Initialize**: the backend issues a session id
//! 3. **Transfer**: send missing chunks in ascending order with bounded
//!    concurrency, retrying transient failures per chunk
//! 4. **Resume**: reconcile with the server's acknowledged set and
//!    continue from the lowest missing chunk
//! 5. **Finalize**: the backend assembles the file and returns a job id

pub mod backend;
pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod http;
pub mod memory;
pub mod registry;
mod resume;
pub mod retry;
pub mod types;

// Re-export primary types for convenience.
pub use backend::{BackendFuture, UploadBackend};
pub use client::UploadClient;
pub use config::UploaderConfig;
pub use error::{BackendError, UploadError};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use registry::{Subscription, SubscriptionHandle};
pub use resume::ResumePoint;
pub use retry::RetryPolicy;
pub use types::UploadOptions;
