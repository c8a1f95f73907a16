//! Byte transfer to a prepared upload target.

use crate::ApiClient;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, StatusCode};
use shelf_core::models::PreparedUpload;
use shelf_core::{UploadError, UploadResult};
use std::io;
use std::path::Path;
use tokio_util::io::ReaderStream;

/// Split `content` into chunks of at most `chunk_size` bytes without copying.
pub fn chunk_bytes(content: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    (0..content.len())
        .step_by(chunk_size)
        .map(|start| content.slice(start..(start + chunk_size).min(content.len())))
        .collect()
}

impl ApiClient {
    /// Send in-memory `content` to the target, split into `chunk_size` chunks.
    pub async fn upload_bytes<F>(
        &self,
        target: &PreparedUpload,
        content: Bytes,
        chunk_size: usize,
        on_progress: F,
    ) -> UploadResult<()>
    where
        F: FnMut(u64, u64) + Send + Sync + 'static,
    {
        let total = content.len() as u64;
        let chunks = chunk_bytes(&content, chunk_size)
            .into_iter()
            .map(Ok::<Bytes, io::Error>);
        self.upload_stream(target, futures::stream::iter(chunks), total, on_progress)
            .await
    }

    /// Stream the file at `path` to the target without loading it into memory.
    pub async fn upload_file<F>(
        &self,
        target: &PreparedUpload,
        path: &Path,
        chunk_size: usize,
        on_progress: F,
    ) -> UploadResult<()>
    where
        F: FnMut(u64, u64) + Send + Sync + 'static,
    {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let stream = ReaderStream::with_capacity(file, chunk_size.max(1));
        self.upload_stream(target, stream, total, on_progress).await
    }

    /// Send `body` to the target as a streamed request of `total` bytes.
    ///
    /// `on_progress(loaded, total)` is called each time a chunk is handed to the
    /// connection. Only a `200 OK` response counts as success. No retries are made and
    /// no overall timeout applies; callers abort the transfer by dropping the future.
    pub async fn upload_stream<S, F>(
        &self,
        target: &PreparedUpload,
        body: S,
        total: u64,
        mut on_progress: F,
    ) -> UploadResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
        F: FnMut(u64, u64) + Send + Sync + 'static,
    {
        let method = Method::from_bytes(target.method.as_bytes())
            .map_err(|_| UploadError::InvalidInput(format!("Invalid method: {}", target.method)))?;

        let mut loaded = 0u64;
        let stream = body.map(move |chunk| {
            if let Ok(chunk) = &chunk {
                loaded += chunk.len() as u64;
                on_progress(loaded, total);
            }
            chunk
        });

        let mut request = self
            .stream_client
            .request(method, &target.upload_url)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream));
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::TransferNetwork(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(
                file_id = %target.file_id,
                status = status.as_u16(),
                "Upload rejected"
            );
            return Err(UploadError::TransferStatus {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(file_id = %target.file_id, bytes = total, "Upload accepted");
        Ok(())
    }
}
