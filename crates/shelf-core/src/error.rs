//! Error types module
//!
//! All failures of the upload lifecycle and of backend calls are unified under
//! [`UploadError`]. Per-file errors are converted into terminal transfer states by the
//! session; only batch-level errors reach the caller of a batch operation.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for per-file failures that do not stop the batch
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error reporting - defines how an error should be presented
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "BACKEND_UNREACHABLE")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation later may succeed
    fn is_recoverable(&self) -> bool;

    /// Whether this error aborts the whole batch instead of a single file
    fn is_batch_fatal(&self) -> bool;

    /// User-facing message (may differ from the internal error message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Preparation rejected for {file_name}: {reason}")]
    PreparationRejected { file_name: String, reason: String },

    #[error("Batch preparation failed: {0}")]
    BatchPreparation(String),

    #[error("Upload failed with status {status}: {body}")]
    TransferStatus { status: u16, body: String },

    #[error("Network error during file upload: {0}")]
    TransferNetwork(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Upload session is closed")]
    SessionClosed,
}

/// Result type for upload and backend operations
pub type UploadResult<T> = Result<T, UploadError>;

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for UploadError {
    fn from(err: validator::ValidationErrors) -> Self {
        UploadError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, batch_fatal, log_level).
fn upload_error_static_metadata(err: &UploadError) -> (&'static str, bool, bool, LogLevel) {
    match err {
        UploadError::InvalidInput(_) => ("INVALID_INPUT", false, false, LogLevel::Debug),
        UploadError::BackendUnreachable(_) => ("BACKEND_UNREACHABLE", true, true, LogLevel::Error),
        UploadError::Backend(_) => ("BACKEND_ERROR", false, false, LogLevel::Warn),
        UploadError::PreparationRejected { .. } => {
            ("PREPARATION_REJECTED", false, false, LogLevel::Warn)
        }
        UploadError::BatchPreparation(_) => ("BATCH_PREPARATION_FAILED", true, true, LogLevel::Error),
        UploadError::TransferStatus { .. } => ("TRANSFER_FAILED", true, false, LogLevel::Warn),
        UploadError::TransferNetwork(_) => ("TRANSFER_NETWORK_ERROR", true, false, LogLevel::Warn),
        UploadError::Io(_) => ("IO_ERROR", false, false, LogLevel::Warn),
        UploadError::Serialization(_) => ("SERIALIZATION_ERROR", false, false, LogLevel::Error),
        UploadError::SessionClosed => ("SESSION_CLOSED", false, true, LogLevel::Error),
    }
}

impl ErrorMetadata for UploadError {
    fn error_code(&self) -> &'static str {
        upload_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        upload_error_static_metadata(self).1
    }

    fn is_batch_fatal(&self) -> bool {
        upload_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        upload_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            UploadError::InvalidInput(ref msg) => msg.clone(),
            UploadError::BackendUnreachable(_) => "The backend could not be reached".to_string(),
            UploadError::Backend(ref msg) => msg.clone(),
            UploadError::PreparationRejected { file_name, reason } => {
                format!("Failed to prepare {}: {}", file_name, reason)
            }
            UploadError::BatchPreparation(_) => {
                "Failed to prepare files for upload. Nothing was uploaded.".to_string()
            }
            UploadError::TransferStatus { status, body } => {
                format!("Upload rejected ({}): {}", status, body)
            }
            UploadError::TransferNetwork(_) => "Network error during file upload".to_string(),
            UploadError::Io(ref err) => format!("Failed to read file: {}", err),
            UploadError::Serialization(_) => "Unexpected response from backend".to_string(),
            UploadError::SessionClosed => "Upload session is closed".to_string(),
        }
    }
}

impl UploadError {
    /// Emit this error through `tracing` at its configured level.
    pub fn log(&self, context: &str) {
        match self.log_level() {
            LogLevel::Debug => {
                tracing::debug!(error = %self, code = self.error_code(), "{}", context)
            }
            LogLevel::Warn => tracing::warn!(error = %self, code = self.error_code(), "{}", context),
            LogLevel::Error => {
                tracing::error!(error = %self, code = self.error_code(), "{}", context)
            }
        }
    }
}
