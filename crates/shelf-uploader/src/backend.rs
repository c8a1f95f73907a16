//! Backend seam of the uploader.
//!
//! The session and the reprocessing worker only talk to the backend through
//! [`UploadBackend`]. [`HttpBackend`] implements it on top of the HTTP client.

use async_trait::async_trait;
use shelf_api_client::ApiClient;
use shelf_core::models::{
    FileId, FileSource, LibraryFile, PendingFile, PrepareFileRequest, PreparedUpload,
};
use shelf_core::{ClientConfig, UploadResult};

/// Progress callback, called with `(loaded, total)` bytes.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send + Sync>;

#[async_trait]
pub trait UploadBackend: Send + Sync + 'static {
    /// Obtain an upload target for one file.
    async fn prepare_file(
        &self,
        file: &PendingFile,
        library_id: &str,
        default_mime_type: &str,
    ) -> UploadResult<PreparedUpload>;

    /// Stream the file content to its upload target.
    async fn transfer(
        &self,
        upload: &PreparedUpload,
        source: FileSource,
        on_progress: ProgressFn,
    ) -> UploadResult<()>;

    /// Release the server-side reservation of a file.
    async fn cancel_upload(&self, file_id: &FileId, library_id: &str) -> UploadResult<()>;

    async fn process_file(&self, file_id: &FileId) -> UploadResult<LibraryFile>;
}

/// [`UploadBackend`] backed by the Shelf HTTP API.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: ApiClient,
    chunk_size: usize,
}

impl HttpBackend {
    pub fn new(client: ApiClient, chunk_size: usize) -> Self {
        Self { client, chunk_size }
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let client = ApiClient::from_config(config)?;
        Ok(Self::new(client, config.upload_chunk_size_bytes))
    }
}

#[async_trait]
impl UploadBackend for HttpBackend {
    async fn prepare_file(
        &self,
        file: &PendingFile,
        library_id: &str,
        default_mime_type: &str,
    ) -> UploadResult<PreparedUpload> {
        let request = PrepareFileRequest::desktop(file, library_id, default_mime_type);
        let file_id = self.client.prepare_file(&request).await?;
        Ok(self.client.upload_target(file.key, &file.name, &file_id))
    }

    async fn transfer(
        &self,
        upload: &PreparedUpload,
        source: FileSource,
        on_progress: ProgressFn,
    ) -> UploadResult<()> {
        match source {
            FileSource::Path(path) => {
                self.client
                    .upload_file(upload, &path, self.chunk_size, on_progress)
                    .await
            }
            FileSource::Memory(content) => {
                self.client
                    .upload_bytes(upload, content, self.chunk_size, on_progress)
                    .await
            }
        }
    }

    async fn cancel_upload(&self, file_id: &FileId, library_id: &str) -> UploadResult<()> {
        self.client.cancel_file_upload(file_id, library_id).await
    }

    async fn process_file(&self, file_id: &FileId) -> UploadResult<LibraryFile> {
        self.client.process_file(file_id).await
    }
}
