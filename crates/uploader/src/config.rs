use std::path::Path;
use std::time::Duration;

use chunkwise_protocol::constants::DEFAULT_REQUEST_TIMEOUT;
use chunkwise_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, UploadLimits};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Size of every chunk except possibly the last, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum chunk uploads in flight per session.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Width of the sliding window used for speed estimates.
    #[serde(default = "default_progress_window_secs")]
    pub progress_window_secs: u64,

    #[serde(default = "default_progress_max_samples")]
    pub progress_max_samples: usize,

    /// Accepted file extensions. Empty allows every type.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_concurrency() -> usize {
    2
}

fn default_progress_window_secs() -> u64 {
    5
}

fn default_progress_max_samples() -> usize {
    100
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "mp3", "wav", "m4a", "aac", "flac", "ogg", "opus", "webm", "mp4", "mov", "mkv",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            progress_window_secs: default_progress_window_secs(),
            progress_max_samples: default_progress_max_samples(),
            allowed_extensions: default_allowed_extensions(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl UploaderConfig {
    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, UploadError> {
        let config: Self =
            toml::from_str(s).map_err(|e| UploadError::Config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| UploadError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Writes configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UploadError::Config(format!("create config dir: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| UploadError::Config(format!("serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| UploadError::Config(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::Config("chunk_size must be positive".into()));
        }
        if self.max_file_size == 0 {
            return Err(UploadError::Config("max_file_size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::Config("concurrency must be at least 1".into()));
        }
        if self.progress_window_secs == 0 {
            return Err(UploadError::Config(
                "progress_window_secs must be positive".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(UploadError::Config(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(UploadError::Config(
                "retry.backoff_factor must be >= 1.0".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(UploadError::Config(
                "retry.max_delay_ms must be >= retry.initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.max_file_size,
            allowed_extensions: self
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn progress_window(&self) -> Duration {
        Duration::from_secs(self.progress_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
