//! Data models for the application
//!
//! This module contains the data structures shared by the API client, the upload
//! session and the CLI, organized by domain.

mod enrichment;
mod library_file;
mod transfer;
mod upload;

// Re-export all models for convenient imports
pub use enrichment::*;
pub use library_file::*;
pub use transfer::*;
pub use upload::*;
