//! Test helpers for upload session tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use shelf_core::models::{FileId, FileSource, LibraryFile, PendingFile, PreparedUpload};
use shelf_core::{UploadError, UploadResult};
use shelf_uploader::{ProgressFn, UploadBackend, UploadEvent};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub enum PrepareBehavior {
    Accept,
    Reject(String),
    Unreachable,
    /// Accept once the notify fires
    Gate(Arc<Notify>),
}

#[derive(Clone, Debug)]
pub enum TransferBehavior {
    Complete,
    NetworkError,
    Status(u16),
    /// Report half the bytes, then never finish
    Hang,
}

/// In-memory [`UploadBackend`] with per-file-name behavior and call recording.
#[derive(Default)]
pub struct FakeBackend {
    prepare: Mutex<HashMap<String, PrepareBehavior>>,
    transfer: Mutex<HashMap<String, TransferBehavior>>,
    failing_process: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
    pub prepared: Mutex<Vec<FileId>>,
    pub transfers_started: Mutex<Vec<String>>,
    pub received_bytes: Mutex<HashMap<FileId, Bytes>>,
    pub cancelled: Mutex<Vec<FileId>>,
    pub processed: Mutex<Vec<FileId>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_prepare(&self, file_name: &str, behavior: PrepareBehavior) {
        self.prepare
            .lock()
            .unwrap()
            .insert(file_name.to_string(), behavior);
    }

    pub fn on_transfer(&self, file_name: &str, behavior: TransferBehavior) {
        self.transfer
            .lock()
            .unwrap()
            .insert(file_name.to_string(), behavior);
    }

    pub fn fail_process(&self, file_id: &str) {
        self.failing_process
            .lock()
            .unwrap()
            .insert(file_id.to_string());
    }

    pub fn cancelled_ids(&self) -> Vec<FileId> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.transfers_started.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadBackend for FakeBackend {
    async fn prepare_file(
        &self,
        file: &PendingFile,
        library_id: &str,
        _default_mime_type: &str,
    ) -> UploadResult<PreparedUpload> {
        let behavior = self
            .prepare
            .lock()
            .unwrap()
            .get(&file.name)
            .cloned()
            .unwrap_or(PrepareBehavior::Accept);

        match behavior {
            PrepareBehavior::Accept => {}
            PrepareBehavior::Reject(reason) => {
                return Err(UploadError::PreparationRejected {
                    file_name: file.name.clone(),
                    reason,
                })
            }
            PrepareBehavior::Unreachable => {
                return Err(UploadError::BackendUnreachable(
                    "connection refused".to_string(),
                ))
            }
            PrepareBehavior::Gate(notify) => notify.notified().await,
        }

        let id = FileId::new(format!(
            "file-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.prepared.lock().unwrap().push(id.clone());

        Ok(PreparedUpload {
            file_key: file.key,
            file_id: id.clone(),
            file_name: file.name.clone(),
            upload_url: "http://backend.test/upload".to_string(),
            method: "POST".to_string(),
            headers: vec![
                ("Authorization".to_string(), format!("ApiKey {}", library_id)),
                ("x-upload-token".to_string(), id.to_string()),
            ],
        })
    }

    async fn transfer(
        &self,
        upload: &PreparedUpload,
        source: FileSource,
        mut on_progress: ProgressFn,
    ) -> UploadResult<()> {
        let content = match source {
            FileSource::Memory(content) => content,
            FileSource::Path(path) => Bytes::from(tokio::fs::read(&path).await?),
        };
        self.transfers_started
            .lock()
            .unwrap()
            .push(upload.file_name.clone());
        let behavior = self
            .transfer
            .lock()
            .unwrap()
            .get(&upload.file_name)
            .cloned()
            .unwrap_or(TransferBehavior::Complete);

        let total = content.len() as u64;
        match behavior {
            TransferBehavior::Complete => {
                for step in 1..=4u64 {
                    on_progress(total * step / 4, total);
                    tokio::task::yield_now().await;
                }
                self.received_bytes
                    .lock()
                    .unwrap()
                    .insert(upload.file_id.clone(), content);
                Ok(())
            }
            TransferBehavior::NetworkError => {
                on_progress(total / 4, total);
                Err(UploadError::TransferNetwork("connection reset".to_string()))
            }
            TransferBehavior::Status(status) => Err(UploadError::TransferStatus {
                status,
                body: "rejected".to_string(),
            }),
            TransferBehavior::Hang => {
                on_progress(total / 2, total);
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn cancel_upload(&self, file_id: &FileId, _library_id: &str) -> UploadResult<()> {
        self.cancelled.lock().unwrap().push(file_id.clone());
        Ok(())
    }

    async fn process_file(&self, file_id: &FileId) -> UploadResult<LibraryFile> {
        self.processed.lock().unwrap().push(file_id.clone());
        if self.failing_process.lock().unwrap().contains(file_id.as_str()) {
            return Err(UploadError::Backend("processing queue full".to_string()));
        }
        Ok(LibraryFile {
            id: file_id.to_string(),
            name: None,
            origin_uri: None,
            mime_type: None,
            size: None,
            chunks: None,
            uploaded_at: None,
            processed_at: None,
            processing_error_message: None,
            drop_error: None,
        })
    }
}

pub fn pdf(name: &str) -> PendingFile {
    PendingFile::from_bytes(
        name,
        vec![0u8; 1024],
        Some("application/pdf".to_string()),
    )
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> UploadEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for upload event")
        .expect("event channel closed")
}

/// Collect events until (and including) the first one matching `done`.
pub async fn collect_until<F>(
    events: &mut mpsc::UnboundedReceiver<UploadEvent>,
    mut done: F,
) -> Vec<UploadEvent>
where
    F: FnMut(&UploadEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

/// Collect events until the batch's state is discarded.
pub async fn collect_until_reset(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    collect_until(events, |e| matches!(e, UploadEvent::Reset { .. })).await
}

/// Wait until the backend has received at least `count` cancellation notifications.
pub async fn wait_for_cancellations(backend: &FakeBackend, count: usize) -> Vec<FileId> {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let ids = backend.cancelled_ids();
            if ids.len() >= count {
                return ids;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for backend cancellations")
}
