//! Upload session actor.
//!
//! One task owns the current [`Batch`] and is its only mutator. It reacts to caller
//! commands sent through a [`SessionHandle`], to preparation results and to transfer
//! events, and reports everything that happens as [`UploadEvent`]s.
//!
//! Every internal message carries the id of the batch it belongs to; messages for a
//! batch that is no longer current are dropped, so a replaced batch can never affect
//! its successor.

use futures::future::join_all;
use shelf_core::models::{
    BatchId, CancellationHandle, FileId, FileKey, PendingFile, PreparedUpload, ReprocessRequest,
    TransferState,
};
use shelf_core::{Batch, BatchSnapshot, ClientConfig, ErrorMetadata, UploadError, UploadResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::backend::UploadBackend;
use crate::events::{Notice, UploadEvent};
use crate::preparation::{prepare_batch, release_reservations, PreparationOutcome};
use crate::transfer::{spawn_transfer, TransferEvent};

const COMMAND_BUFFER: usize = 32;
const PREPARED_BUFFER: usize = 8;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub default_mime_type: String,
    /// Capacity of the channel carrying transfer updates back to the session
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_mime_type: "application/pdf".to_string(),
            event_buffer: 256,
        }
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            default_mime_type: config.default_mime_type.clone(),
            event_buffer: config.event_buffer,
        }
    }
}

enum Command {
    Start {
        library_id: String,
        files: Vec<PendingFile>,
        reply: oneshot::Sender<UploadResult<BatchId>>,
    },
    CancelOne {
        key: FileKey,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<BatchSnapshot>>,
    },
}

struct PreparedBatch {
    batch_id: BatchId,
    library_id: String,
    result: UploadResult<Vec<PreparationOutcome>>,
}

/// Cloneable handle to a running upload session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Start { library_id, files, .. } => f
                .debug_struct("Start")
                .field("library_id", library_id)
                .field("files", &files.len())
                .finish(),
            Command::CancelOne { key, .. } => f.debug_struct("CancelOne").field("key", key).finish(),
            Command::CancelAll { .. } => f.write_str("CancelAll"),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> UploadResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| UploadError::SessionClosed)?;
        response.await.map_err(|_| UploadError::SessionClosed)
    }

    /// Start a new batch. An active batch is cancelled first.
    ///
    /// Resolves once preparation is over: with the batch id when transfers were
    /// started (or the batch was cancelled meanwhile), or with
    /// [`UploadError::BatchPreparation`] when the backend could not be reached.
    pub async fn start(
        &self,
        library_id: impl Into<String>,
        files: Vec<PendingFile>,
    ) -> UploadResult<BatchId> {
        let library_id = library_id.into();
        self.request(|reply| Command::Start {
            library_id,
            files,
            reply,
        })
        .await?
    }

    /// Cancel one file's transfer. Returns `false` when the file has no active transfer.
    pub async fn cancel_one(&self, key: FileKey) -> UploadResult<bool> {
        self.request(|reply| Command::CancelOne { key, reply }).await
    }

    /// Cancel every transfer and discard the batch. Returns the number of transfers aborted.
    pub async fn cancel_all(&self) -> UploadResult<usize> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    pub async fn snapshot(&self) -> UploadResult<Option<BatchSnapshot>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}

pub struct UploadSession<B: UploadBackend + ?Sized> {
    backend: Arc<B>,
    config: SessionConfig,
    batch: Option<Batch>,
    pending_start: Option<(BatchId, oneshot::Sender<UploadResult<BatchId>>)>,
    events: mpsc::UnboundedSender<UploadEvent>,
    transfer_tx: mpsc::Sender<TransferEvent>,
    prepared_tx: mpsc::Sender<PreparedBatch>,
    reprocess_tx: Option<mpsc::Sender<ReprocessRequest>>,
}

impl<B: UploadBackend + ?Sized> UploadSession<B> {
    /// Spawn a session. Events are delivered on the returned receiver; completed
    /// batches are handed to `reprocess_tx` when given.
    ///
    /// The event stream never blocks the session. Progress is reported at most once
    /// per whole percent, so an idle consumer holds a bounded number of events.
    pub fn spawn(
        backend: Arc<B>,
        config: SessionConfig,
        reprocess_tx: Option<mpsc::Sender<ReprocessRequest>>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<UploadEvent>) {
        let buffer = config.event_buffer.max(1);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_rx) = mpsc::channel(buffer);
        let (prepared_tx, prepared_rx) = mpsc::channel(PREPARED_BUFFER);

        let session = Self {
            backend,
            config,
            batch: None,
            pending_start: None,
            events: events_tx,
            transfer_tx,
            prepared_tx,
            reprocess_tx,
        };
        tokio::spawn(session.run(command_rx, transfer_rx, prepared_rx));

        (
            SessionHandle {
                commands: command_tx,
            },
            events_rx,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transfers: mpsc::Receiver<TransferEvent>,
        mut prepared: mpsc::Receiver<PreparedBatch>,
    ) {
        tracing::info!("Upload session started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = transfers.recv() => self.handle_transfer(event),
                Some(result) = prepared.recv() => self.handle_prepared(result),
            }
        }

        if let Some(mut batch) = self.batch.take() {
            let aborted = batch
                .drain_handles()
                .into_iter()
                .filter(|(_, handle)| handle.invoke())
                .count();
            tracing::warn!(
                batch_id = %batch.id(),
                aborted,
                "Upload session closed with an active batch"
            );
        }
        tracing::info!("Upload session stopped");
    }

    fn emit(&self, event: UploadEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("No event receiver");
        }
    }

    fn notice(&self, batch_id: BatchId, notice: Notice) {
        self.emit(UploadEvent::Notice { batch_id, notice });
    }

    fn current(&self, batch_id: BatchId) -> bool {
        self.batch.as_ref().map(Batch::id) == Some(batch_id)
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::debug!(command = ?command, "Session command");
        match command {
            Command::Start {
                library_id,
                files,
                reply,
            } => self.start(library_id, files, reply).await,
            Command::CancelOne { key, reply } => {
                let cancelled = self.cancel_one(key);
                let _ = reply.send(cancelled);
            }
            Command::CancelAll { reply } => {
                let aborted = self.cancel_all().await;
                let _ = reply.send(aborted);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.batch.as_ref().map(Batch::snapshot));
            }
        }
    }

    async fn start(
        &mut self,
        library_id: String,
        files: Vec<PendingFile>,
        reply: oneshot::Sender<UploadResult<BatchId>>,
    ) {
        if self.batch.is_some() {
            tracing::info!("New selection replaces the active batch");
            self.cancel_all().await;
        }

        let batch = match Batch::new(library_id.clone(), files) {
            Ok(batch) => batch,
            Err(e) => {
                e.log("Rejected file selection");
                let _ = reply.send(Err(e));
                return;
            }
        };
        let batch_id = batch.id();

        tracing::info!(
            batch_id = %batch_id,
            library_id = %library_id,
            file_count = batch.len(),
            "Upload batch started"
        );

        let files = batch.files().to_vec();
        let snapshot = batch.snapshot();
        self.batch = Some(batch);
        self.pending_start = Some((batch_id, reply));

        self.emit(UploadEvent::BatchStarted {
            batch_id,
            library_id: library_id.clone(),
            files: snapshot.files,
        });

        let backend = self.backend.clone();
        let default_mime_type = self.config.default_mime_type.clone();
        let prepared_tx = self.prepared_tx.clone();
        tokio::spawn(async move {
            let result = prepare_batch(&*backend, &library_id, &files, &default_mime_type).await;
            let _ = prepared_tx
                .send(PreparedBatch {
                    batch_id,
                    library_id,
                    result,
                })
                .await;
        });
    }

    fn reply_start(&mut self, batch_id: BatchId, result: UploadResult<BatchId>) {
        if let Some((pending_id, reply)) = self.pending_start.take() {
            if pending_id == batch_id {
                let _ = reply.send(result);
            } else {
                self.pending_start = Some((pending_id, reply));
            }
        }
    }

    fn handle_prepared(&mut self, prepared: PreparedBatch) {
        let PreparedBatch {
            batch_id,
            library_id,
            result,
        } = prepared;

        if !self.current(batch_id) {
            tracing::debug!(batch_id = %batch_id, "Preparation finished for a replaced batch");
            if let Ok(outcomes) = result {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    release_reservations(&*backend, &library_id, &outcomes).await;
                });
            }
            return;
        }

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.notice(
                    batch_id,
                    Notice::BatchFailed {
                        reason: e.client_message(),
                    },
                );
                self.batch = None;
                self.reply_start(batch_id, Err(e));
                self.emit(UploadEvent::Reset { batch_id });
                return;
            }
        };

        for outcome in outcomes {
            match outcome {
                PreparationOutcome::Prepared(upload) => self.begin_transfer(batch_id, upload),
                PreparationOutcome::Failed {
                    key,
                    file_name,
                    error,
                } => {
                    if let Some(batch) = self.batch.as_mut() {
                        batch.record_preparation_failure(key, error.to_string());
                    }
                    self.notice(
                        batch_id,
                        Notice::PreparationFailed {
                            file_name,
                            reason: error.client_message(),
                        },
                    );
                }
            }
        }

        self.reply_start(batch_id, Ok(batch_id));
        self.check_finished();
    }

    fn begin_transfer(&mut self, batch_id: BatchId, upload: PreparedUpload) {
        let Some(batch) = self.batch.as_mut() else {
            return;
        };
        let key = upload.file_key;
        let file_id = upload.file_id.clone();
        let Some(source) = batch.file(key).map(|f| f.source.clone()) else {
            return;
        };
        if !batch.record_prepared(upload.clone()) {
            tracing::warn!(file_id = %file_id, "Ignoring duplicate preparation result");
            return;
        }

        let handle = CancellationHandle::new();
        let token = handle.token();
        batch.begin_transfer(key, handle);
        let state = batch.state(&file_id).cloned();
        let file_name = upload.file_name.clone();

        spawn_transfer(
            self.backend.clone(),
            batch_id,
            upload,
            source,
            token,
            self.transfer_tx.clone(),
        );

        self.emit(UploadEvent::Prepared {
            batch_id,
            key,
            file_id: file_id.clone(),
            file_name,
        });
        if let Some(state) = state {
            self.emit(UploadEvent::StateChanged {
                batch_id,
                key,
                file_id,
                state,
            });
        }
    }

    fn handle_transfer(&mut self, event: TransferEvent) {
        let TransferEvent {
            batch_id,
            file_id,
            update,
        } = event;

        let Some(batch) = self.batch.as_mut().filter(|b| b.id() == batch_id) else {
            tracing::debug!(batch_id = %batch_id, file_id = %file_id, "Dropping stale transfer event");
            return;
        };
        let Some(key) = batch.key_for(&file_id) else {
            return;
        };
        let previous = batch.state(&file_id).map(TransferState::progress);
        let Some(state) = batch.apply(&file_id, update) else {
            return;
        };
        if let (TransferState::Transferring { percent }, Some(previous)) = (&state, previous) {
            // one event per whole percent
            if percent.floor() == previous.floor() {
                return;
            }
        }
        let file_name = batch
            .file(key)
            .map(|f| f.name.clone())
            .unwrap_or_default();

        let notice = match &state {
            TransferState::Completed => Some(Notice::Uploaded { file_name }),
            TransferState::Cancelled => Some(Notice::Cancelled { file_name }),
            TransferState::Failed { reason } => Some(Notice::TransferFailed {
                file_name,
                reason: reason.clone(),
            }),
            TransferState::Idle | TransferState::Transferring { .. } => None,
        };
        let terminal = state.is_terminal();

        self.emit(UploadEvent::StateChanged {
            batch_id,
            key,
            file_id,
            state,
        });
        if let Some(notice) = notice {
            self.notice(batch_id, notice);
        }
        if terminal {
            self.check_finished();
        }
    }

    fn cancel_one(&mut self, key: FileKey) -> bool {
        let Some(batch) = self.batch.as_mut() else {
            return false;
        };
        let Some(handle) = batch.take_handle(key) else {
            tracing::debug!(file_key = %key, "No active transfer to cancel");
            return false;
        };

        let invoked = handle.invoke();
        let file_id = batch.file_id(key).cloned();
        let library_id = batch.library_id().to_string();

        if let Some(file_id) = file_id {
            tracing::info!(file_id = %file_id, "Cancelling upload");
            let backend = self.backend.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.cancel_upload(&file_id, &library_id).await {
                    tracing::warn!(error = %e, file_id = %file_id, "Failed to notify backend of cancellation");
                }
            });
        }
        invoked
    }

    /// Notify the backend for every known file, abort every transfer and discard the batch.
    async fn cancel_all(&mut self) -> usize {
        let Some(batch) = self.batch.as_mut() else {
            return 0;
        };
        let batch_id = batch.id();
        let library_id = batch.library_id().to_string();
        let mappings = batch.file_id_mappings();

        let results = join_all(
            mappings
                .iter()
                .map(|(_, file_id)| self.backend.cancel_upload(file_id, &library_id)),
        )
        .await;
        for ((_, file_id), result) in mappings.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(error = %e, file_id = %file_id, "Failed to notify backend of cancellation");
            }
        }

        let Some(mut batch) = self.batch.take() else {
            return 0;
        };
        let aborted = batch
            .drain_handles()
            .into_iter()
            .filter(|(_, handle)| handle.invoke())
            .count();
        let changed = batch.cancel_unfinished();

        tracing::info!(
            batch_id = %batch_id,
            aborted,
            cancelled = changed.len(),
            "Upload batch cancelled"
        );

        for key in changed {
            if let Some(file_id) = batch.file_id(key).cloned() {
                self.emit(UploadEvent::StateChanged {
                    batch_id,
                    key,
                    file_id,
                    state: TransferState::Cancelled,
                });
            }
        }

        self.emit(UploadEvent::Aborted(batch.summary()));
        self.reply_start(batch_id, Ok(batch_id));
        self.emit(UploadEvent::Reset { batch_id });
        aborted
    }

    /// Close the batch once every file has a terminal outcome.
    fn check_finished(&mut self) {
        if !self.batch.as_ref().is_some_and(Batch::is_finished) {
            return;
        }
        let Some(batch) = self.batch.take() else {
            return;
        };
        let summary = batch.summary();
        let batch_id = summary.batch_id;

        tracing::info!(
            batch_id = %batch_id,
            total = summary.total,
            completed = summary.completed.len(),
            cancelled = summary.cancelled.len(),
            failed = summary.failed.len(),
            "Upload batch finished"
        );

        self.emit(UploadEvent::Finished(summary.clone()));
        if summary.is_mixed() {
            self.notice(
                batch_id,
                Notice::Summary {
                    processed: summary.total,
                    succeeded: summary.completed.len(),
                },
            );
        }

        let file_ids: Vec<FileId> = summary.completed_file_ids();
        if !file_ids.is_empty() {
            self.request_reprocess(summary.library_id.clone(), file_ids);
        }

        self.reply_start(batch_id, Ok(batch_id));
        self.emit(UploadEvent::Reset { batch_id });
    }

    fn request_reprocess(&self, library_id: String, file_ids: Vec<FileId>) {
        let Some(tx) = &self.reprocess_tx else {
            tracing::debug!("No reprocessing worker attached");
            return;
        };
        let count = file_ids.len();
        match tx.try_send(ReprocessRequest {
            library_id,
            file_ids,
        }) {
            Ok(()) => tracing::info!(file_count = count, "Reprocessing requested"),
            Err(e) => tracing::error!(error = %e, "Failed to hand off reprocessing request"),
        }
    }
}
