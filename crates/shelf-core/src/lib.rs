//! Shelf Core Library
//!
//! This crate provides the domain models, the upload [`Batch`] aggregate, error types
//! and configuration shared by every Shelf component.

pub mod batch;
pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use batch::{
    Batch, BatchSnapshot, BatchSummary, FailedFile, FileRef, FileSnapshot, TransferUpdate,
};
pub use config::ClientConfig;
pub use error::{ErrorMetadata, LogLevel, UploadError, UploadResult};
