//! Batch preparation: one `prepareFile` call per selected file, all in flight at once.

use futures::future::join_all;
use shelf_core::models::{PendingFile, PreparedUpload};
use shelf_core::{ErrorMetadata, UploadError, UploadResult};

use crate::backend::UploadBackend;

/// Result of preparing one file.
#[derive(Debug)]
pub enum PreparationOutcome {
    Prepared(PreparedUpload),
    Failed {
        key: shelf_core::models::FileKey,
        file_name: String,
        error: UploadError,
    },
}

/// Prepare every file of a batch concurrently.
///
/// Per-file rejections are returned as [`PreparationOutcome::Failed`]. If any call
/// fails with a batch-fatal error (the backend could not be reached), the reservations
/// that did succeed are released and a single [`UploadError::BatchPreparation`] is
/// returned instead.
#[tracing::instrument(skip(backend, files, default_mime_type), fields(file_count = files.len()))]
pub async fn prepare_batch<B: UploadBackend + ?Sized>(
    backend: &B,
    library_id: &str,
    files: &[PendingFile],
    default_mime_type: &str,
) -> UploadResult<Vec<PreparationOutcome>> {
    let results = join_all(
        files
            .iter()
            .map(|file| backend.prepare_file(file, library_id, default_mime_type)),
    )
    .await;

    let mut outcomes = Vec::with_capacity(files.len());
    let mut fatal: Option<UploadError> = None;
    for (file, result) in files.iter().zip(results) {
        match result {
            Ok(upload) => outcomes.push(PreparationOutcome::Prepared(upload)),
            Err(e) if e.is_batch_fatal() => {
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
            Err(error) => {
                error.log("File preparation failed");
                outcomes.push(PreparationOutcome::Failed {
                    key: file.key,
                    file_name: file.name.clone(),
                    error,
                });
            }
        }
    }

    let Some(fatal) = fatal else {
        tracing::info!(
            prepared = outcomes
                .iter()
                .filter(|o| matches!(o, PreparationOutcome::Prepared(_)))
                .count(),
            "Batch prepared"
        );
        return Ok(outcomes);
    };

    fatal.log("Batch preparation failed");
    release_reservations(backend, library_id, &outcomes).await;
    Err(UploadError::BatchPreparation(fatal.to_string()))
}

/// Best-effort release of every prepared reservation in `outcomes`.
pub(crate) async fn release_reservations<B: UploadBackend + ?Sized>(
    backend: &B,
    library_id: &str,
    outcomes: &[PreparationOutcome],
) {
    let prepared: Vec<&PreparedUpload> = outcomes
        .iter()
        .filter_map(|o| match o {
            PreparationOutcome::Prepared(upload) => Some(upload),
            PreparationOutcome::Failed { .. } => None,
        })
        .collect();
    if prepared.is_empty() {
        return;
    }

    let results = join_all(
        prepared
            .iter()
            .map(|upload| backend.cancel_upload(&upload.file_id, library_id)),
    )
    .await;
    for (upload, result) in prepared.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                file_id = %upload.file_id,
                "Failed to release file reservation"
            );
        }
    }
}
