use std::path::Path;

use crate::{DEFAULT_MAX_FILE_SIZE, TransferError};

/// Limits applied to a file before any session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_size: u64,
    /// Lower-case extensions without the dot. Empty allows every type.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: Vec::new(),
        }
    }
}

/// Validates the name a file is uploaded under.
///
/// Rejects:
/// - Empty names
/// - Names containing `/` or `\`
/// - `.` and `..`
/// - Control characters
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.trim().is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }
    if file_name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separators not allowed: {file_name}"
        )));
    }
    if file_name == "." || file_name == ".." {
        return Err(TransferError::InvalidFileName(format!(
            "reserved name: {file_name}"
        )));
    }
    if file_name.chars().any(char::is_control) {
        return Err(TransferError::InvalidFileName(
            "control characters not allowed".into(),
        ));
    }
    Ok(())
}

/// Validates a file against `limits`. Runs before any network call.
pub fn validate_upload(
    file_name: &str,
    file_size: u64,
    limits: &UploadLimits,
) -> Result<(), TransferError> {
    validate_file_name(file_name)?;

    if file_size == 0 {
        return Err(TransferError::EmptyFile);
    }
    if file_size > limits.max_file_size {
        return Err(TransferError::FileTooLarge {
            size: file_size,
            max: limits.max_file_size,
        });
    }

    if !limits.allowed_extensions.is_empty() {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let allowed = limits
            .allowed_extensions
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext));
        if ext.is_empty() || !allowed {
            return Err(TransferError::DisallowedType(if ext.is_empty() {
                file_name.to_string()
            } else {
                ext
            }));
        }
    }

    Ok(())
}
