mod helpers;

use helpers::*;
use shelf_core::models::{FileKey, PendingFile, ReprocessRequest, TransferState};
use shelf_core::UploadError;
use shelf_uploader::{Notice, SessionConfig, SessionHandle, UploadEvent, UploadSession};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

fn spawn_session(
    backend: Arc<FakeBackend>,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<UploadEvent>,
    mpsc::Receiver<ReprocessRequest>,
) {
    let (reprocess_tx, reprocess_rx) = mpsc::channel(8);
    let (handle, events) = UploadSession::spawn(backend, SessionConfig::default(), Some(reprocess_tx));
    (handle, events, reprocess_rx)
}

fn finished_summary(events: &[UploadEvent]) -> shelf_core::BatchSummary {
    events
        .iter()
        .find_map(|e| match e {
            UploadEvent::Finished(summary) => Some(summary.clone()),
            _ => None,
        })
        .expect("batch did not finish")
}

fn notices(events: &[UploadEvent]) -> Vec<Notice> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Notice { notice, .. } => Some(notice.clone()),
            _ => None,
        })
        .collect()
}

async fn wait_until_transferring(handle: &SessionHandle, count: usize) {
    for _ in 0..200 {
        if let Some(snapshot) = handle.snapshot().await.unwrap() {
            if snapshot.transferring() >= count {
                return;
            }
        }
        tokio::task::yield_now().await;
    }
    panic!("transfers did not start");
}

#[tokio::test]
async fn test_all_files_complete_and_reprocess_receives_every_id() {
    let backend = FakeBackend::new();
    let (handle, mut events, mut reprocess) = spawn_session(backend.clone());

    let batch_id = handle
        .start("lib-1", vec![pdf("a.pdf"), pdf("b.pdf")])
        .await
        .unwrap();
    let seen = collect_until_reset(&mut events).await;

    let summary = finished_summary(&seen);
    assert_eq!(summary.batch_id, batch_id);
    assert_eq!(summary.completed.len(), 2);
    assert!(!summary.is_mixed());
    assert!(!notices(&seen)
        .iter()
        .any(|n| matches!(n, Notice::Summary { .. })));

    let request = reprocess.recv().await.unwrap();
    assert_eq!(request.library_id, "lib-1");
    let mut ids = request.file_ids.clone();
    ids.sort();
    let mut expected = summary.completed_file_ids();
    expected.sort();
    assert_eq!(ids, expected);

    assert!(handle.snapshot().await.unwrap().is_none());
}

#[tokio::test]
async fn test_mixed_outcomes_complete_cancel_and_network_failure() {
    let backend = FakeBackend::new();
    backend.on_transfer("b.pdf", TransferBehavior::Hang);
    backend.on_transfer("c.pdf", TransferBehavior::NetworkError);
    let (handle, mut events, mut reprocess) = spawn_session(backend.clone());

    let files = vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")];
    let key_b = files[1].key;
    handle.start("lib-1", files).await.unwrap();

    // wait for A and C to settle so only B is left transferring
    let mut seen = collect_until(&mut events, {
        let mut settled = 0;
        move |e| {
            if let UploadEvent::StateChanged { state, .. } = e {
                if state.is_terminal() {
                    settled += 1;
                }
            }
            settled == 2
        }
    })
    .await;

    assert!(handle.cancel_one(key_b).await.unwrap());
    seen.extend(collect_until_reset(&mut events).await);

    let summary = finished_summary(&seen);
    assert_eq!(summary.accounted(), 3);
    assert_eq!(summary.completed[0].name, "a.pdf");
    assert_eq!(summary.cancelled[0].name, "b.pdf");
    assert_eq!(summary.failed[0].name, "c.pdf");

    let notices = notices(&seen);
    assert_eq!(
        notices
            .iter()
            .filter(|n| matches!(n, Notice::Uploaded { file_name } if file_name == "a.pdf"))
            .count(),
        1
    );
    assert!(notices
        .iter()
        .any(|n| matches!(n, Notice::Cancelled { file_name } if file_name == "b.pdf")));
    assert!(notices
        .iter()
        .any(|n| matches!(n, Notice::TransferFailed { file_name, .. } if file_name == "c.pdf")));
    assert!(notices.contains(&Notice::Summary {
        processed: 3,
        succeeded: 1
    }));

    let request = reprocess.recv().await.unwrap();
    assert_eq!(request.file_ids, summary.completed_file_ids());
    assert_eq!(
        wait_for_cancellations(&backend, 1).await,
        vec![summary.cancelled[0].file_id.clone().unwrap()]
    );
}

#[tokio::test]
async fn test_cancel_twice_notifies_backend_once() {
    let backend = FakeBackend::new();
    backend.on_transfer("a.pdf", TransferBehavior::Hang);
    backend.on_transfer("b.pdf", TransferBehavior::Hang);
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    let files = vec![pdf("a.pdf"), pdf("b.pdf")];
    let key_a = files[0].key;
    handle.start("lib-1", files).await.unwrap();

    assert!(handle.cancel_one(key_a).await.unwrap());
    assert!(!handle.cancel_one(key_a).await.unwrap());
    wait_for_cancellations(&backend, 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(backend.cancelled_ids().len(), 1);

    collect_until(&mut events, |e| {
        matches!(e, UploadEvent::StateChanged { state: TransferState::Cancelled, .. })
    })
    .await;
    let snapshot = handle.snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.transferring(), 1);

    handle.cancel_all().await.unwrap();
}

#[tokio::test]
async fn test_cancel_before_transfer_starts_is_noop() {
    let backend = FakeBackend::new();
    let gate = Arc::new(Notify::new());
    backend.on_prepare("a.pdf", PrepareBehavior::Gate(gate.clone()));
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    let files = vec![pdf("a.pdf")];
    let key = files[0].key;
    let starter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.start("lib-1", files).await })
    };
    collect_until(&mut events, |e| matches!(e, UploadEvent::BatchStarted { .. })).await;

    let before = handle.snapshot().await.unwrap().unwrap();
    assert!(!handle.cancel_one(key).await.unwrap());
    assert!(!handle.cancel_one(FileKey::new()).await.unwrap());
    let after = handle.snapshot().await.unwrap().unwrap();
    assert_eq!(before.batch_id, after.batch_id);
    assert!(after.files[0].state.is_none());
    assert!(backend.cancelled_ids().is_empty());

    gate.notify_one();
    starter.await.unwrap().unwrap();
    let seen = collect_until_reset(&mut events).await;
    assert_eq!(finished_summary(&seen).completed.len(), 1);
}

#[tokio::test]
async fn test_cancel_all_leaves_nothing_transferring() {
    let backend = FakeBackend::new();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        backend.on_transfer(name, TransferBehavior::Hang);
    }
    let (handle, mut events, mut reprocess) = spawn_session(backend.clone());

    handle
        .start("lib-1", vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
        .await
        .unwrap();
    wait_until_transferring(&handle, 3).await;

    assert_eq!(handle.cancel_all().await.unwrap(), 3);
    assert!(handle.snapshot().await.unwrap().is_none());
    assert_eq!(backend.cancelled_ids().len(), 3);

    let seen = collect_until_reset(&mut events).await;
    let aborted = seen
        .iter()
        .find_map(|e| match e {
            UploadEvent::Aborted(summary) => Some(summary.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(aborted.cancelled.len(), 3);
    assert!(reprocess.try_recv().is_err());

    // nothing to cancel any more
    assert_eq!(handle.cancel_all().await.unwrap(), 0);
}

#[tokio::test]
async fn test_backend_outage_fails_whole_batch() {
    let backend = FakeBackend::new();
    backend.on_prepare("b.pdf", PrepareBehavior::Unreachable);
    let (handle, mut events, mut reprocess) = spawn_session(backend.clone());

    let err = handle
        .start("lib-1", vec![pdf("a.pdf"), pdf("b.pdf")])
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::BatchPreparation(_)));

    let seen = collect_until_reset(&mut events).await;
    let batch_failures = notices(&seen)
        .into_iter()
        .filter(|n| matches!(n, Notice::BatchFailed { .. }))
        .count();
    assert_eq!(batch_failures, 1);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, UploadEvent::StateChanged { .. })));

    assert!(backend.started().is_empty());
    // the reservation that did succeed is released
    assert_eq!(backend.cancelled_ids(), backend.prepared.lock().unwrap().clone());
    assert!(reprocess.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_preparation_counts_as_failed() {
    let backend = FakeBackend::new();
    backend.on_prepare("b.pdf", PrepareBehavior::Reject("quota exceeded".to_string()));
    let (handle, mut events, mut reprocess) = spawn_session(backend.clone());

    handle
        .start("lib-1", vec![pdf("a.pdf"), pdf("b.pdf")])
        .await
        .unwrap();
    let seen = collect_until_reset(&mut events).await;

    let summary = finished_summary(&seen);
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.contains("quota exceeded"));
    assert!(notices(&seen)
        .iter()
        .any(|n| matches!(n, Notice::PreparationFailed { file_name, .. } if file_name == "b.pdf")));
    assert_eq!(backend.started(), vec!["a.pdf".to_string()]);

    let request = reprocess.recv().await.unwrap();
    assert_eq!(request.file_ids.len(), 1);
}

#[tokio::test]
async fn test_reselection_isolates_old_handles() {
    let backend = FakeBackend::new();
    backend.on_transfer("old.pdf", TransferBehavior::Hang);
    backend.on_transfer("new.pdf", TransferBehavior::Hang);
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    let old_files = vec![pdf("old.pdf")];
    let old_key = old_files[0].key;
    let old_batch = handle.start("lib-1", old_files).await.unwrap();
    wait_until_transferring(&handle, 1).await;

    let new_batch = handle.start("lib-1", vec![pdf("new.pdf")]).await.unwrap();
    assert_ne!(old_batch, new_batch);
    wait_until_transferring(&handle, 1).await;

    // the old batch was cancelled and notified
    assert_eq!(backend.cancelled_ids().len(), 1);
    assert!(!handle.cancel_one(old_key).await.unwrap());

    let snapshot = handle.snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.batch_id, new_batch);
    assert!(matches!(
        snapshot.files[0].state,
        Some(TransferState::Transferring { .. })
    ));

    handle.cancel_all().await.unwrap();
    let seen = collect_until(&mut events, |e| {
        matches!(e, UploadEvent::Reset { batch_id } if *batch_id == new_batch)
    })
    .await;

    // once the old batch is gone none of its events follow
    let old_reset = seen
        .iter()
        .position(|e| matches!(e, UploadEvent::Reset { batch_id } if *batch_id == old_batch))
        .unwrap();
    assert!(!seen[old_reset + 1..]
        .iter()
        .any(|e| e.batch_id() == old_batch));
}

#[tokio::test]
async fn test_cancel_during_preparation_releases_late_reservations() {
    let backend = FakeBackend::new();
    let gate = Arc::new(Notify::new());
    backend.on_prepare("slow.pdf", PrepareBehavior::Gate(gate.clone()));
    let (handle, mut events, mut reprocess) = spawn_session(backend.clone());

    let starter = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .start("lib-1", vec![pdf("fast.pdf"), pdf("slow.pdf")])
                .await
        })
    };
    let started = collect_until(&mut events, |e| matches!(e, UploadEvent::BatchStarted { .. })).await;
    let batch_id = started[started.len() - 1].batch_id();

    assert_eq!(handle.cancel_all().await.unwrap(), 0);
    assert_eq!(starter.await.unwrap().unwrap(), batch_id);
    let seen = collect_until_reset(&mut events).await;
    let aborted = seen
        .iter()
        .find_map(|e| match e {
            UploadEvent::Aborted(summary) => Some(summary.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(aborted.cancelled.len(), 2);

    gate.notify_one();
    let mut released = wait_for_cancellations(&backend, 2).await;
    let mut prepared = backend.prepared.lock().unwrap().clone();
    released.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    prepared.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(released, prepared);

    assert!(backend.started().is_empty());
    assert!(handle.snapshot().await.unwrap().is_none());
    assert!(events.try_recv().is_err());
    assert!(reprocess.try_recv().is_err());
}

#[tokio::test]
async fn test_reselection_during_preparation_releases_old_reservations() {
    let backend = FakeBackend::new();
    let gate = Arc::new(Notify::new());
    backend.on_prepare("old.pdf", PrepareBehavior::Gate(gate.clone()));
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    let starter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.start("lib-1", vec![pdf("old.pdf")]).await })
    };
    let started = collect_until(&mut events, |e| matches!(e, UploadEvent::BatchStarted { .. })).await;
    let old_batch = started[started.len() - 1].batch_id();

    let new_batch = handle.start("lib-1", vec![pdf("new.pdf")]).await.unwrap();
    assert_eq!(starter.await.unwrap().unwrap(), old_batch);
    let mut seen = collect_until(&mut events, |e| {
        matches!(e, UploadEvent::Reset { batch_id } if *batch_id == new_batch)
    })
    .await;
    let new_id = finished_summary(&seen).completed_file_ids()[0].clone();

    gate.notify_one();
    let released = wait_for_cancellations(&backend, 1).await;
    let old_ids: Vec<_> = backend
        .prepared
        .lock()
        .unwrap()
        .iter()
        .filter(|id| **id != new_id)
        .cloned()
        .collect();
    assert_eq!(released, old_ids);
    assert_eq!(backend.started(), vec!["new.pdf".to_string()]);

    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let old_reset = seen
        .iter()
        .position(|e| matches!(e, UploadEvent::Reset { batch_id } if *batch_id == old_batch))
        .unwrap();
    assert!(!seen[old_reset + 1..]
        .iter()
        .any(|e| e.batch_id() == old_batch));
}

#[tokio::test]
async fn test_large_batch_starts_without_draining_events() {
    let backend = FakeBackend::new();
    let config = SessionConfig {
        event_buffer: 16,
        ..SessionConfig::default()
    };
    let (handle, mut events) = UploadSession::spawn(backend, config, None);

    let files: Vec<PendingFile> = (0..200).map(|i| pdf(&format!("doc-{}.pdf", i))).collect();
    let started = tokio::time::timeout(EVENT_TIMEOUT, handle.start("lib-1", files))
        .await
        .expect("start did not resolve");
    assert!(started.is_ok());

    // commands are still served while nobody reads events
    tokio::time::timeout(EVENT_TIMEOUT, handle.snapshot())
        .await
        .expect("snapshot did not resolve")
        .unwrap();

    let seen = collect_until_reset(&mut events).await;
    assert_eq!(finished_summary(&seen).completed.len(), 200);
}

#[tokio::test]
async fn test_duplicate_names_are_cancelled_independently() {
    let backend = FakeBackend::new();
    backend.on_transfer("same.pdf", TransferBehavior::Hang);
    let (handle, _events, _reprocess) = spawn_session(backend.clone());

    let files = vec![pdf("same.pdf"), pdf("same.pdf")];
    let first = files[0].key;
    let second = files[1].key;
    handle.start("lib-1", files).await.unwrap();
    wait_until_transferring(&handle, 2).await;

    assert!(handle.cancel_one(first).await.unwrap());
    assert_eq!(wait_for_cancellations(&backend, 1).await.len(), 1);

    let snapshot = handle.snapshot().await.unwrap().unwrap();
    let second_state = snapshot
        .files
        .iter()
        .find(|f| f.key == second)
        .and_then(|f| f.state.clone());
    assert!(matches!(
        second_state,
        Some(TransferState::Transferring { .. })
    ));

    handle.cancel_all().await.unwrap();
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let backend = FakeBackend::new();
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    handle.start("lib-1", vec![pdf("a.pdf")]).await.unwrap();
    let seen = collect_until_reset(&mut events).await;

    let progress: Vec<f64> = seen
        .iter()
        .filter_map(|e| match e {
            UploadEvent::StateChanged {
                state: TransferState::Transferring { percent },
                ..
            } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
}

#[tokio::test]
async fn test_uploads_file_from_disk() {
    let backend = FakeBackend::new();
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"%PDF-1.7 test document").unwrap();
    let file = PendingFile::from_path(tmp.path()).unwrap();

    handle.start("lib-1", vec![file]).await.unwrap();
    let seen = collect_until_reset(&mut events).await;
    let summary = finished_summary(&seen);
    let file_id = summary.completed[0].file_id.clone().unwrap();

    let received = backend.received_bytes.lock().unwrap();
    assert_eq!(received[&file_id].as_ref(), b"%PDF-1.7 test document");
}

#[tokio::test]
async fn test_missing_file_fails_only_that_file() {
    let backend = FakeBackend::new();
    let (handle, mut events, _reprocess) = spawn_session(backend.clone());

    let tmp = tempfile::NamedTempFile::new().unwrap();
    let file = PendingFile::from_path(tmp.path()).unwrap();
    drop(tmp);

    handle
        .start("lib-1", vec![file, pdf("b.pdf")])
        .await
        .unwrap();
    let seen = collect_until_reset(&mut events).await;
    let summary = finished_summary(&seen);
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.starts_with("Failed to read file"));
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let backend = FakeBackend::new();
    let (handle, _events, _reprocess) = spawn_session(backend);

    let err = handle.start("lib-1", vec![]).await.unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));
    assert!(handle.snapshot().await.unwrap().is_none());
}
