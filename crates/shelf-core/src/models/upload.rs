use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use validator::Validate;

use crate::error::{UploadError, UploadResult};

/// Origin recorded by the backend for files uploaded from a local disk.
pub const DESKTOP_ORIGIN_URI: &str = "desktop";

/// Header carrying the per-file upload token on the transfer request.
pub const UPLOAD_TOKEN_HEADER: &str = "x-upload-token";

/// Batch-local identity of a selected file, generated at selection time.
///
/// Display names are not unique within a batch, so every lookup made before the
/// backend has assigned a [`FileId`] goes through this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileKey(Uuid);

impl FileKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FileKey {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FileKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Backend-assigned file identifier. It also serves as the upload token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<String> for FileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Where the bytes of a pending file come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A locally selected file awaiting upload.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub key: FileKey,
    pub name: String,
    pub size: u64,
    /// Content-type hint; the configured default is used when absent
    pub mime_type: Option<String>,
    pub source: FileSource,
}

impl PendingFile {
    /// Select a file on disk. The display name is the final path component.
    pub fn from_path(path: impl AsRef<Path>) -> UploadResult<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(UploadError::InvalidInput(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                UploadError::InvalidInput(format!("Invalid file name: {}", path.display()))
            })?
            .to_string();

        Ok(Self {
            key: FileKey::new(),
            mime_type: guess_mime_type(&name).map(str::to_string),
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Select an in-memory file.
    pub fn from_bytes(
        name: impl Into<String>,
        content: impl Into<Bytes>,
        mime_type: Option<String>,
    ) -> Self {
        let content = content.into();
        Self {
            key: FileKey::new(),
            name: name.into(),
            size: content.len() as u64,
            mime_type,
            source: FileSource::Memory(content),
        }
    }
}

/// Best-effort content type from the file extension.
pub fn guess_mime_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(mime)
}

/// Input of the `prepareFile` mutation.
#[derive(Debug, Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PrepareFileRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "File name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[validate(length(min = 1, message = "Origin URI must not be empty"))]
    pub origin_uri: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "MIME type must be between 1 and 255 characters"
    ))]
    pub mime_type: String,
    #[validate(length(min = 1, message = "Library ID must not be empty"))]
    pub library_id: String,
}

impl PrepareFileRequest {
    /// Request for a file selected from the local disk.
    pub fn desktop(file: &PendingFile, library_id: &str, default_mime_type: &str) -> Self {
        Self {
            name: file.name.clone(),
            origin_uri: DESKTOP_ORIGIN_URI.to_string(),
            mime_type: file
                .mime_type
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| default_mime_type.to_string()),
            library_id: library_id.to_string(),
        }
    }
}

/// Input of the `cancelFileUpload` mutation.
#[derive(Debug, Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelUploadRequest {
    #[validate(length(min = 1, message = "File ID must not be empty"))]
    pub file_id: String,
    #[validate(length(min = 1, message = "Library ID must not be empty"))]
    pub library_id: String,
}

/// Server-issued upload target for one pending file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedUpload {
    pub file_key: FileKey,
    pub file_id: FileId,
    pub file_name: String,
    pub upload_url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
}

/// Hand-off from a finished upload batch to the reprocessing worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReprocessRequest {
    pub library_id: String,
    pub file_ids: Vec<FileId>,
}
