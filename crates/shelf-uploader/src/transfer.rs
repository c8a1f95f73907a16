//! Transfer execution for one prepared file.

use shelf_core::models::{BatchId, FileId, FileSource, PreparedUpload};
use shelf_core::{ErrorMetadata, TransferUpdate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::UploadBackend;

/// Update of one transfer, tagged with the batch that started it.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub batch_id: BatchId,
    pub file_id: FileId,
    pub update: TransferUpdate,
}

/// Spawn the transfer of one file.
///
/// The transfer races `token`; when the token fires first the request future is
/// dropped, which aborts the connection, and `Cancelled` is reported. Exactly one
/// terminal update is sent per transfer.
pub fn spawn_transfer<B: UploadBackend + ?Sized>(
    backend: Arc<B>,
    batch_id: BatchId,
    upload: PreparedUpload,
    source: FileSource,
    token: CancellationToken,
    events: mpsc::Sender<TransferEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let file_id = upload.file_id.clone();

        let progress_tx = events.clone();
        let progress_id = file_id.clone();
        let on_progress = Box::new(move |loaded: u64, total: u64| {
            // Dropped progress is superseded by later updates
            let _ = progress_tx.try_send(TransferEvent {
                batch_id,
                file_id: progress_id.clone(),
                update: TransferUpdate::Progress { loaded, total },
            });
        });

        let run = backend.transfer(&upload, source, on_progress);

        let update = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(file_id = %file_id, "Transfer cancelled");
                TransferUpdate::Cancelled
            }
            result = run => match result {
                Ok(()) => {
                    tracing::info!(file_id = %file_id, file_name = %upload.file_name, "Transfer completed");
                    TransferUpdate::Completed
                }
                Err(e) => {
                    e.log("Transfer failed");
                    TransferUpdate::Failed(e.client_message())
                }
            },
        };

        if events
            .send(TransferEvent {
                batch_id,
                file_id,
                update,
            })
            .await
            .is_err()
        {
            tracing::debug!("Upload session gone, dropping transfer result");
        }
    })
}
