use serde::Serialize;
use shelf_core::models::{BatchId, FileId, FileKey, TransferState};
use shelf_core::{BatchSummary, FileSnapshot};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// User-facing message produced by the upload session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Uploaded { file_name: String },
    Cancelled { file_name: String },
    TransferFailed { file_name: String, reason: String },
    PreparationFailed { file_name: String, reason: String },
    BatchFailed { reason: String },
    /// Emitted when a batch finishes with anything other than full success
    Summary { processed: usize, succeeded: usize },
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::TransferFailed { .. } | Notice::PreparationFailed { .. } | Notice::BatchFailed { .. }
        )
    }
}

impl Display for Notice {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Notice::Uploaded { file_name } => write!(f, "Uploaded {}", file_name),
            Notice::Cancelled { file_name } => write!(f, "Upload cancelled: {}", file_name),
            Notice::TransferFailed { file_name, reason } => {
                write!(f, "Failed to upload {}: {}", file_name, reason)
            }
            Notice::PreparationFailed { file_name, reason } => {
                write!(f, "Failed to prepare {}: {}", file_name, reason)
            }
            Notice::BatchFailed { reason } => write!(f, "{}", reason),
            Notice::Summary {
                processed,
                succeeded,
            } => write!(f, "{} processed, {} succeeded", processed, succeeded),
        }
    }
}

/// Event emitted by the upload session. Every variant carries the batch it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    BatchStarted {
        batch_id: BatchId,
        library_id: String,
        files: Vec<FileSnapshot>,
    },
    Prepared {
        batch_id: BatchId,
        key: FileKey,
        file_id: FileId,
        file_name: String,
    },
    StateChanged {
        batch_id: BatchId,
        key: FileKey,
        file_id: FileId,
        state: TransferState,
    },
    Notice {
        batch_id: BatchId,
        notice: Notice,
    },
    /// Every file reached a terminal state
    Finished(BatchSummary),
    /// The batch was cancelled as a whole
    Aborted(BatchSummary),
    /// The batch's state was discarded
    Reset { batch_id: BatchId },
}

impl UploadEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            UploadEvent::BatchStarted { batch_id, .. }
            | UploadEvent::Prepared { batch_id, .. }
            | UploadEvent::StateChanged { batch_id, .. }
            | UploadEvent::Notice { batch_id, .. }
            | UploadEvent::Reset { batch_id } => *batch_id,
            UploadEvent::Finished(summary) | UploadEvent::Aborted(summary) => summary.batch_id,
        }
    }
}
