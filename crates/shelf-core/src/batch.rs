//! Upload batch aggregate
//!
//! A [`Batch`] owns every piece of state of one upload session: the selected files,
//! the prepared upload targets, the `FileKey -> FileId` bridge between selection-time
//! and server-time identity, the per-file transfer states and the active cancellation
//! handles. All mutations go through methods that keep these collections consistent.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::{UploadError, UploadResult};
use crate::models::{
    BatchId, CancellationHandle, FileId, FileKey, PendingFile, PreparedUpload, TransferState,
};

/// Update reported by a running transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferUpdate {
    /// Bytes sent so far out of a known total.
    Progress { loaded: u64, total: u64 },
    Completed,
    Cancelled,
    Failed(String),
}

impl TransferUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferUpdate::Progress { .. })
    }
}

/// A selected file that ended in a successful or cancelled transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    pub key: FileKey,
    pub name: String,
    pub file_id: Option<FileId>,
}

/// A selected file that failed in preparation or transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub key: FileKey,
    pub name: String,
    pub file_id: Option<FileId>,
    pub reason: String,
}

/// Outcome of a batch, grouped by terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub library_id: String,
    pub total: usize,
    pub completed: Vec<FileRef>,
    pub cancelled: Vec<FileRef>,
    pub failed: Vec<FailedFile>,
}

impl BatchSummary {
    pub fn completed_file_ids(&self) -> Vec<FileId> {
        self.completed
            .iter()
            .filter_map(|f| f.file_id.clone())
            .collect()
    }

    /// More than one kind of outcome, or anything other than full success.
    pub fn is_mixed(&self) -> bool {
        self.completed.len() != self.total
    }

    pub fn accounted(&self) -> usize {
        self.completed.len() + self.cancelled.len() + self.failed.len()
    }
}

/// Read-only view of one file in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct FileSnapshot {
    pub key: FileKey,
    pub name: String,
    pub size: u64,
    pub file_id: Option<FileId>,
    /// `None` while preparation is outstanding
    pub state: Option<TransferState>,
    pub cancellable: bool,
}

/// Read-only view of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub batch_id: BatchId,
    pub library_id: String,
    pub files: Vec<FileSnapshot>,
}

impl BatchSnapshot {
    pub fn transferring(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.state, Some(TransferState::Transferring { .. })))
            .count()
    }
}

#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    library_id: String,
    files: Vec<PendingFile>,
    prepared: HashMap<FileKey, PreparedUpload>,
    file_ids: HashMap<FileKey, FileId>,
    keys_by_file_id: HashMap<FileId, FileKey>,
    transfers: HashMap<FileId, TransferState>,
    handles: HashMap<FileKey, CancellationHandle>,
    preparation_failures: HashMap<FileKey, String>,
    /// Cancelled while still awaiting preparation
    withdrawn: HashSet<FileKey>,
    completed: usize,
    cancelled: usize,
}

impl Batch {
    pub fn new(library_id: impl Into<String>, files: Vec<PendingFile>) -> UploadResult<Self> {
        let library_id = library_id.into();
        if library_id.trim().is_empty() {
            return Err(UploadError::InvalidInput(
                "Library ID must not be empty".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(UploadError::InvalidInput(
                "At least one file must be selected".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if !files.iter().all(|f| seen.insert(f.key)) {
            return Err(UploadError::InvalidInput(
                "Duplicate file key in selection".to_string(),
            ));
        }

        Ok(Self {
            id: BatchId::new(),
            library_id,
            files,
            prepared: HashMap::new(),
            file_ids: HashMap::new(),
            keys_by_file_id: HashMap::new(),
            transfers: HashMap::new(),
            handles: HashMap::new(),
            preparation_failures: HashMap::new(),
            withdrawn: HashSet::new(),
            completed: 0,
            cancelled: 0,
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn library_id(&self) -> &str {
        &self.library_id
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PendingFile] {
        &self.files
    }

    pub fn file(&self, key: FileKey) -> Option<&PendingFile> {
        self.files.iter().find(|f| f.key == key)
    }

    pub fn prepared(&self, key: FileKey) -> Option<&PreparedUpload> {
        self.prepared.get(&key)
    }

    pub fn file_id(&self, key: FileKey) -> Option<&FileId> {
        self.file_ids.get(&key)
    }

    pub fn key_for(&self, file_id: &FileId) -> Option<FileKey> {
        self.keys_by_file_id.get(file_id).copied()
    }

    /// Every known `FileKey -> FileId` mapping.
    pub fn file_id_mappings(&self) -> Vec<(FileKey, FileId)> {
        self.file_ids
            .iter()
            .map(|(key, id)| (*key, id.clone()))
            .collect()
    }

    pub fn state(&self, file_id: &FileId) -> Option<&TransferState> {
        self.transfers.get(file_id)
    }

    pub fn state_for_key(&self, key: FileKey) -> Option<&TransferState> {
        self.file_ids.get(&key).and_then(|id| self.transfers.get(id))
    }

    pub fn has_handle(&self, key: FileKey) -> bool {
        self.handles.contains_key(&key)
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled
    }

    /// Record the upload target issued for a file. The file starts out `Idle`.
    pub fn record_prepared(&mut self, upload: PreparedUpload) -> bool {
        let key = upload.file_key;
        if self.file(key).is_none()
            || self.prepared.contains_key(&key)
            || self.preparation_failures.contains_key(&key)
            || self.withdrawn.contains(&key)
            || self.keys_by_file_id.contains_key(&upload.file_id)
        {
            return false;
        }

        self.file_ids.insert(key, upload.file_id.clone());
        self.keys_by_file_id.insert(upload.file_id.clone(), key);
        self.transfers
            .insert(upload.file_id.clone(), TransferState::Idle);
        self.prepared.insert(key, upload);
        true
    }

    /// Record that no upload target could be issued for a file.
    pub fn record_preparation_failure(&mut self, key: FileKey, reason: impl Into<String>) -> bool {
        if self.file(key).is_none()
            || self.prepared.contains_key(&key)
            || self.preparation_failures.contains_key(&key)
            || self.withdrawn.contains(&key)
        {
            return false;
        }
        self.preparation_failures.insert(key, reason.into());
        true
    }

    /// Move a prepared file from `Idle` to `Transferring` and register its handle.
    ///
    /// A file enters `Transferring` at most once.
    pub fn begin_transfer(&mut self, key: FileKey, handle: CancellationHandle) -> bool {
        let Some(file_id) = self.file_ids.get(&key) else {
            return false;
        };
        match self.transfers.get_mut(file_id) {
            Some(state @ TransferState::Idle) => {
                *state = TransferState::Transferring { percent: 0.0 };
                self.handles.insert(key, handle);
                true
            }
            _ => false,
        }
    }

    /// Apply a transfer update. Returns the new state when it changed.
    ///
    /// Progress never decreases and is ignored when the total is unknown. Terminal
    /// states are final and release the file's handle.
    pub fn apply(&mut self, file_id: &FileId, update: TransferUpdate) -> Option<TransferState> {
        let key = self.keys_by_file_id.get(file_id).copied()?;
        let state = self.transfers.get_mut(file_id)?;
        if state.is_terminal() {
            return None;
        }

        let next = match update {
            TransferUpdate::Progress { loaded, total } => {
                let TransferState::Transferring { percent } = *state else {
                    return None;
                };
                if total == 0 {
                    return None;
                }
                let next = ((loaded as f64 / total as f64) * 100.0).clamp(0.0, 100.0);
                if next <= percent {
                    return None;
                }
                TransferState::Transferring { percent: next }
            }
            TransferUpdate::Completed => {
                self.completed += 1;
                TransferState::Completed
            }
            TransferUpdate::Cancelled => {
                self.cancelled += 1;
                TransferState::Cancelled
            }
            TransferUpdate::Failed(reason) => TransferState::Failed { reason },
        };

        if next.is_terminal() {
            self.handles.remove(&key);
        }
        *state = next.clone();
        Some(next)
    }

    /// Remove and return the handle of a file, if one is active.
    pub fn take_handle(&mut self, key: FileKey) -> Option<CancellationHandle> {
        self.handles.remove(&key)
    }

    /// Remove and return every active handle.
    pub fn drain_handles(&mut self) -> Vec<(FileKey, CancellationHandle)> {
        self.handles.drain().collect()
    }

    /// Mark every file that has not reached a terminal state as cancelled and drop
    /// all handles. Returns the keys that changed state.
    pub fn cancel_unfinished(&mut self) -> Vec<FileKey> {
        let mut changed = Vec::new();
        for file in &self.files {
            if self.preparation_failures.contains_key(&file.key) || self.withdrawn.contains(&file.key) {
                continue;
            }
            match self.file_ids.get(&file.key) {
                Some(file_id) => {
                    if let Some(state) = self.transfers.get_mut(file_id) {
                        if !state.is_terminal() {
                            *state = TransferState::Cancelled;
                            self.cancelled += 1;
                            changed.push(file.key);
                        }
                    }
                }
                None => {
                    self.withdrawn.insert(file.key);
                    self.cancelled += 1;
                    changed.push(file.key);
                }
            }
        }
        self.handles.clear();
        changed
    }

    /// True once every selected file has a terminal outcome.
    pub fn is_finished(&self) -> bool {
        self.files.iter().all(|f| {
            if self.preparation_failures.contains_key(&f.key) || self.withdrawn.contains(&f.key) {
                return true;
            }
            self.state_for_key(f.key)
                .map(TransferState::is_terminal)
                .unwrap_or(false)
        })
    }

    pub fn summary(&self) -> BatchSummary {
        let mut completed = Vec::new();
        let mut cancelled = Vec::new();
        let mut failed = Vec::new();

        for file in &self.files {
            let file_id = self.file_ids.get(&file.key).cloned();
            if let Some(reason) = self.preparation_failures.get(&file.key) {
                failed.push(FailedFile {
                    key: file.key,
                    name: file.name.clone(),
                    file_id,
                    reason: reason.clone(),
                });
                continue;
            }
            let file_ref = FileRef {
                key: file.key,
                name: file.name.clone(),
                file_id: file_id.clone(),
            };
            if self.withdrawn.contains(&file.key) {
                cancelled.push(file_ref);
                continue;
            }
            match self.state_for_key(file.key) {
                Some(TransferState::Completed) => completed.push(file_ref),
                Some(TransferState::Cancelled) => cancelled.push(file_ref),
                Some(TransferState::Failed { reason }) => failed.push(FailedFile {
                    key: file.key,
                    name: file.name.clone(),
                    file_id,
                    reason: reason.clone(),
                }),
                _ => {}
            }
        }

        BatchSummary {
            batch_id: self.id,
            library_id: self.library_id.clone(),
            total: self.files.len(),
            completed,
            cancelled,
            failed,
        }
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let files = self
            .files
            .iter()
            .map(|f| {
                let state = match self.preparation_failures.get(&f.key) {
                    Some(reason) => Some(TransferState::Failed {
                        reason: reason.clone(),
                    }),
                    None if self.withdrawn.contains(&f.key) => Some(TransferState::Cancelled),
                    None => self.state_for_key(f.key).cloned(),
                };
                FileSnapshot {
                    key: f.key,
                    name: f.name.clone(),
                    size: f.size,
                    file_id: self.file_ids.get(&f.key).cloned(),
                    state,
                    cancellable: self.handles.contains_key(&f.key),
                }
            })
            .collect();

        BatchSnapshot {
            batch_id: self.id,
            library_id: self.library_id.clone(),
            files,
        }
    }
}
