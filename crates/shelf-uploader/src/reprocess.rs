//! Reprocessing worker.
//!
//! Receives [`ReprocessRequest`]s handed off by finished upload batches and queues every
//! file for processing on the backend. Its outcomes are reported on its own channel and
//! never affect the batch that requested them.

use serde::Serialize;
use shelf_core::models::{FileId, ReprocessRequest};
use shelf_core::{ClientConfig, ErrorMetadata};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::backend::UploadBackend;

#[derive(Clone, Debug)]
pub struct ReprocessConfig {
    pub max_concurrent: usize,
    /// Capacity of the request and event channels
    pub buffer: usize,
}

impl Default for ReprocessConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            buffer: 64,
        }
    }
}

impl From<&ClientConfig> for ReprocessConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_concurrent: config.reprocess_max_concurrent,
            buffer: config.event_buffer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReprocessOutcome {
    Queued,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReprocessEvent {
    pub library_id: String,
    pub file_id: FileId,
    pub outcome: ReprocessOutcome,
}

pub struct Reprocessor;

impl Reprocessor {
    /// Spawn the worker. Returns the request sender to give to an upload session and
    /// the receiver of per-file outcomes. The worker stops once every request sender
    /// has been dropped and in-flight work is done.
    pub fn spawn<B: UploadBackend + ?Sized>(
        backend: Arc<B>,
        config: ReprocessConfig,
    ) -> (
        mpsc::Sender<ReprocessRequest>,
        mpsc::Receiver<ReprocessEvent>,
    ) {
        let buffer = config.buffer.max(1);
        let (request_tx, request_rx) = mpsc::channel(buffer);
        let (event_tx, event_rx) = mpsc::channel(buffer);
        tokio::spawn(Self::run(backend, config, request_rx, event_tx));
        (request_tx, event_rx)
    }

    async fn run<B: UploadBackend + ?Sized>(
        backend: Arc<B>,
        config: ReprocessConfig,
        mut requests: mpsc::Receiver<ReprocessRequest>,
        events: mpsc::Sender<ReprocessEvent>,
    ) {
        tracing::info!(
            max_concurrent = config.max_concurrent,
            "Reprocessing worker started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        while let Some(request) = requests.recv().await {
            tracing::info!(
                library_id = %request.library_id,
                file_count = request.file_ids.len(),
                "Reprocessing request received"
            );

            for file_id in request.file_ids {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let backend = backend.clone();
                let events = events.clone();
                let library_id = request.library_id.clone();

                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = match backend.process_file(&file_id).await {
                        Ok(file) => {
                            tracing::info!(file_id = %file.id, "File queued for processing");
                            ReprocessOutcome::Queued
                        }
                        Err(e) => {
                            e.log("Failed to reprocess file");
                            ReprocessOutcome::Failed {
                                reason: e.client_message(),
                            }
                        }
                    };
                    let _ = events
                        .send(ReprocessEvent {
                            library_id,
                            file_id,
                            outcome,
                        })
                        .await;
                });
            }

            // reap finished tasks without waiting
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        tracing::info!("Reprocessing worker stopped");
    }
}
