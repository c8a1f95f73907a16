//! Shelf uploader
//!
//! The upload session actor drives a batch of files through preparation, transfer and
//! completion, and hands successfully uploaded files to the reprocessing worker.

pub mod backend;
pub mod events;
pub mod preparation;
pub mod reprocess;
pub mod session;
pub mod transfer;

pub use backend::{HttpBackend, ProgressFn, UploadBackend};
pub use events::{Notice, UploadEvent};
pub use preparation::{prepare_batch, PreparationOutcome};
pub use reprocess::{ReprocessConfig, ReprocessEvent, ReprocessOutcome, Reprocessor};
pub use session::{SessionConfig, SessionHandle, UploadSession};
pub use transfer::TransferEvent;
