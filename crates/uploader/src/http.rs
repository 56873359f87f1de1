//! HTTP implementation of [`UploadBackend`].
//!
//! Endpoints, relative to the base URL:
//!
//! | Operation | Request |
//! |---|---|
//! | initialize | `POST /uploads` (JSON body) |
//! | upload chunk | `PUT /uploads/{id}/chunks/{index}` (octet-stream, checksum header) |
//! | status | `GET /uploads/{id}` |
//! | finalize | `POST /uploads/{id}/finalize` |
//! | delete | `DELETE /uploads/{id}` |

use std::time::Duration;

use chunkwise_protocol::constants::{
    CHUNK_CHECKSUM_HEADER, UPLOADS_PATH, chunk_path, finalize_path, session_path,
};
use chunkwise_protocol::{
    ChunkAck, ErrorResponse, FinalizeResponse, InitSessionRequest, InitSessionResponse,
    SessionStatusResponse,
};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;

use crate::backend::{BackendFuture, UploadBackend};
use crate::error::BackendError;

/// Upload backend speaking JSON over HTTP.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Creates a backend for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::from)?;
        Ok(Self::with_client(http, base_url))
    }

    /// Uses a preconfigured client.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_init(
        &self,
        request: &InitSessionRequest,
    ) -> Result<InitSessionResponse, BackendError> {
        let resp = self
            .http
            .post(self.url(UPLOADS_PATH))
            .json(request)
            .send()
            .await?;
        decode(resp).await
    }

    async fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        checksum: &str,
        data: &[u8],
    ) -> Result<ChunkAck, BackendError> {
        let resp = self
            .http
            .put(self.url(&chunk_path(session_id, index)))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CHUNK_CHECKSUM_HEADER, checksum)
            .body(data.to_vec())
            .send()
            .await?;
        decode(resp).await
    }

    async fn get_status(&self, session_id: &str) -> Result<SessionStatusResponse, BackendError> {
        let resp = self
            .http
            .get(self.url(&session_path(session_id)))
            .send()
            .await?;
        decode(resp).await
    }

    async fn post_finalize(&self, session_id: &str) -> Result<FinalizeResponse, BackendError> {
        let resp = self
            .http
            .post(self.url(&finalize_path(session_id)))
            .send()
            .await?;
        decode(resp).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), BackendError> {
        let resp = self
            .http
            .delete(self.url(&session_path(session_id)))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }
}

impl UploadBackend for HttpBackend {
    fn initialize_session<'a>(
        &'a self,
        request: &'a InitSessionRequest,
    ) -> BackendFuture<'a, InitSessionResponse> {
        Box::pin(self.post_init(request))
    }

    fn upload_chunk<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
        checksum: &'a str,
        data: &'a [u8],
    ) -> BackendFuture<'a, ChunkAck> {
        Box::pin(self.put_chunk(session_id, index, checksum, data))
    }

    fn session_status<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BackendFuture<'a, SessionStatusResponse> {
        Box::pin(self.get_status(session_id))
    }

    fn finalize<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, FinalizeResponse> {
        Box::pin(self.post_finalize(session_id))
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(self.delete(session_id))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            classify_status(status.as_u16(), &err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(classify_status(
            status.as_u16(),
            &String::from_utf8_lossy(&body),
        ));
    }
    serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))
}

/// Maps a non-success HTTP status and its body to a [`BackendError`].
pub(crate) fn classify_status(status: u16, body: &str) -> BackendError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        404 => BackendError::SessionNotFound(message),
        408 => BackendError::Timeout,
        413 | 507 => BackendError::QuotaExceeded(message),
        429 => BackendError::Server { status, message },
        400..=499 => BackendError::Rejected { status, message },
        _ => BackendError::Server { status, message },
    }
}
