use super::*;
use crate::archive::{archive_key, ArchiveStore, ArchivedObject, OpendalArchive};
use crate::chunk_store::PlannedChunk;
use crate::error::{DomainErrorKind, InternalErrorKind};
use crate::gateway::{plan_segments, ExportStatus, GatewayError, GatewayErrorKind, TimeWindow};
use crate::testing::{CollectingHandler, FakeGateway, MemoryStore};
use chrono::DateTime;
use entity::recording_chunks;
use opendal::{services, Operator};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Archive whose next `failures` uploads fail with a storage error.
struct FlakyArchive {
    inner: OpendalArchive,
    failures: AtomicUsize,
    uploads: AtomicUsize,
}

#[async_trait::async_trait]
impl ArchiveStore for FlakyArchive {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn stored_size(&self, key: &str) -> Result<Option<i64>, Error> {
        self.inner.stored_size(key).await
    }

    async fn upsert(
        &self,
        key: &str,
        source: &Path,
        expected_size: i64,
    ) -> Result<ArchivedObject, Error> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::storage(opendal::Error::new(
                opendal::ErrorKind::Unexpected,
                "connection reset by storage",
            )));
        }
        self.inner.upsert(key, source, expected_size).await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemoryStore>,
    gateway: Arc<FakeGateway>,
    operator: Operator,
    archive: Arc<FlakyArchive>,
    events: Arc<CollectingHandler>,
    _work_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(tune: impl FnOnce(&mut PipelineSettings)) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let mut settings = PipelineSettings {
            max_retries: 3,
            download_concurrency: 3,
            poll_backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
            poll_timeout: Duration::from_secs(2),
            export_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            consolidation_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(5),
            retry_backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
            work_dir: work_dir.path().to_path_buf(),
            ..PipelineSettings::default()
        };
        tune(&mut settings);

        let store = Arc::new(MemoryStore::default());
        let gateway = Arc::new(FakeGateway::new(settings.segment_duration));
        let operator = Operator::new(services::Memory::default())
            .unwrap()
            .finish();
        let events = Arc::new(CollectingHandler::default());
        let archive = Arc::new(FlakyArchive {
            inner: OpendalArchive::new(operator.clone(), "court-recordings"),
            failures: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        });

        let orchestrator = Orchestrator::new(
            Collaborators {
                recordings: store.clone(),
                chunks: store.clone(),
                gateway: gateway.clone(),
                archive: archive.clone(),
                events: EventPublisher::new().with_handler(events.clone()),
            },
            settings,
        );

        Self {
            orchestrator,
            store,
            gateway,
            operator,
            archive,
            events,
            _work_dir: work_dir,
        }
    }

    async fn booked(&self, start: &str, end: &str) -> recordings::Model {
        self.orchestrator
            .create_from_booking(request(start, end))
            .await
            .unwrap()
    }

    async fn reload(&self, id: Id) -> recordings::Model {
        self.store.find(id).await.unwrap()
    }

    /// Stores the three-chunk plan of a 09:00-09:45 recording, every chunk
    /// still requested under its first export task.
    async fn plan(&self, recording: &recordings::Model) -> Vec<recording_chunks::Model> {
        let plan = plan_segments(
            TimeWindow::new(recording.start_time, recording.end_time),
            self.orchestrator.settings().segment_duration,
        );
        self.store
            .create_plan(
                recording.id,
                plan.into_iter()
                    .zip(1..)
                    .map(|(window, n)| PlannedChunk {
                        chunk_number: n,
                        task_id: Some(format!("task-{n}")),
                        start_time: window.start,
                        end_time: window.end,
                    })
                    .collect(),
            )
            .await
            .unwrap()
    }

    /// A booked recording left at `status` by a stopped process, with every
    /// chunk downloaded into its working directory.
    async fn downloaded_at(&self, status: RecordingStatus) -> recordings::Model {
        let created = self.booked("09:00", "09:45").await;
        let dir = self.orchestrator.recording_dir(&created);
        tokio::fs::create_dir_all(&dir).await.unwrap();

        for chunk in self.plan(&created).await {
            let task_id = chunk.task_id.clone().unwrap();
            let path = dir.join(format!("chunk-{:04}.bin", chunk.chunk_number));
            let body = FakeGateway::body_of(&task_id);
            tokio::fs::write(&path, &body).await.unwrap();
            self.store.mark_ready(chunk.id, &task_id).await.unwrap();
            self.store
                .mark_downloaded(chunk.id, &path.to_string_lossy(), body.len() as i64)
                .await
                .unwrap();
        }

        let mut stored = self.reload(created.id).await;
        stored.status = status;
        stored.total_chunks = 3;
        if status == RecordingStatus::Uploading {
            stored.consolidated_chunks = 3;
            stored.total_duration_seconds = Some(2700);
            stored.total_file_size_bytes = Some(MERGED.len() as i64);
        }
        self.store.save(stored).await.unwrap()
    }

    fn statuses(&self, id: Id) -> Vec<RecordingStatus> {
        self.store
            .history()
            .into_iter()
            .filter(|row| row.id == id)
            .map(|row| row.status)
            .collect()
    }

    async fn archived(&self, key: &str) -> String {
        String::from_utf8(self.operator.read(key).await.unwrap().to_vec()).unwrap()
    }
}

/// Merged content of the three chunks of a 09:00-09:45 recording.
const MERGED: &str = "[task-1][task-2][task-3]";

fn at(time: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(&format!("2026-03-14T{time}:00+00:00")).unwrap()
}

fn request(start: &str, end: &str) -> RecordingRequest {
    RecordingRequest {
        facility_id: 1,
        court_id: 4,
        start_time: at(start),
        end_time: at(end),
        user_id: Some(7),
        booking_id: Some(99),
    }
}

fn permanent(message: &str) -> GatewayError {
    GatewayError::new(GatewayErrorKind::NotFound, message)
}

fn unavailable() -> GatewayError {
    GatewayError::new(GatewayErrorKind::Unavailable, "camera gateway unreachable")
}

#[tokio::test]
async fn booked_recording_is_consolidated_in_chunk_order_and_archived() {
    let harness = Harness::new();
    // The first chunk lands last.
    harness
        .gateway
        .delay_fetch("task-1", Duration::from_millis(50));
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.total_chunks, 3);
    assert_eq!(recording.fetched_chunks, 3);
    assert_eq!(recording.consolidated_chunks, 3);
    assert_eq!(recording.total_duration_seconds, Some(2700));
    assert_eq!(recording.retry_count, 0);
    assert_eq!(
        recording.consolidated_storage_key.as_deref(),
        Some(archive_key(recording.external_id).as_str())
    );
    assert_eq!(
        recording.consolidated_storage_bucket.as_deref(),
        Some("court-recordings")
    );
    assert!(recording.archived_at.is_some());
    assert!(recording.notification_sent_at.is_some());

    let key = archive_key(recording.external_id);
    assert_eq!(
        harness.archived(&key).await,
        "[task-1][task-2][task-3]".to_string()
    );
    let objects = harness.operator.list("recordings/").await.unwrap();
    assert_eq!(
        objects.iter().filter(|o| o.metadata().is_file()).count(),
        1
    );

    // Local working files are gone once archived.
    assert!(!harness
        .orchestrator
        .recording_dir(&recording)
        .exists());
}

#[tokio::test]
async fn stored_rows_never_show_partial_consolidation_or_early_storage_keys() {
    let harness = Harness::new();
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let history = harness.store.history();
    assert!(!history.is_empty());
    for row in &history {
        assert!(
            row.consolidated_chunks == 0 || row.consolidated_chunks == row.total_chunks,
            "partial consolidation stored at {}",
            row.status
        );
        assert_eq!(
            row.consolidated_storage_key.is_some(),
            row.status == RecordingStatus::Completed,
            "storage key out of step with status {}",
            row.status
        );
    }

    let statuses: Vec<_> = history.iter().map(|row| row.status).collect();
    assert_eq!(
        statuses,
        vec![
            RecordingStatus::RequestingChunks,
            RecordingStatus::Polling,
            RecordingStatus::Downloading,
            RecordingStatus::Consolidating,
            RecordingStatus::Uploading,
            RecordingStatus::Completed,
            // notification_sent_at
            RecordingStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let harness = Harness::new();
    let created = harness.booked("09:00", "09:30").await;

    harness.orchestrator.run(created.id).await;

    let events = harness.events.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        DomainEvent::RecordingCreated {
            is_manual_recording: false,
            court_id: 4,
            ..
        }
    ));
    match &events[1] {
        DomainEvent::RecordingCompleted {
            recording_id,
            user_id,
            recording,
            ..
        } => {
            assert_eq!(*recording_id, created.id);
            assert_eq!(*user_id, Some(7));
            assert_eq!(recording["status"], "completed");
        }
        other => panic!("expected RecordingCompleted, got {other:?}"),
    }
}

#[tokio::test]
async fn permanent_download_failure_fails_recording_and_keeps_other_chunks() {
    let harness = Harness::new();
    harness
        .gateway
        .fail_fetch("task-2", vec![permanent("export file expired")]);
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(recording.failed_stage, Some(RecordingStatus::Downloading));
    assert_eq!(recording.retry_count, 0);
    assert!(recording.consolidated_storage_key.is_none());
    let message = recording.error_message.unwrap();
    assert!(message.contains("chunk 2"), "{message}");

    let statuses: Vec<_> = harness
        .store
        .chunks_of(created.id)
        .into_iter()
        .map(|c| (c.chunk_number, c.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (1, ChunkStatus::Downloaded),
            (2, ChunkStatus::Failed),
            (3, ChunkStatus::Downloaded),
        ]
    );

    let events = harness.events.events.lock().unwrap().clone();
    assert!(matches!(
        events.last(),
        Some(DomainEvent::RecordingFailed {
            retryable: true,
            ..
        })
    ));
}

#[tokio::test]
async fn operator_retry_resumes_downloading_without_refetching() {
    let harness = Harness::new();
    harness
        .gateway
        .fail_fetch("task-2", vec![permanent("export file expired")]);
    let created = harness.booked("09:00", "09:45").await;
    harness.orchestrator.run(created.id).await;

    let reopened = harness.orchestrator.retry(created.id).await.unwrap();
    assert_eq!(reopened.status, RecordingStatus::Downloading);
    assert_eq!(reopened.retry_count, 1);
    assert!(reopened.error_message.is_none());
    assert!(reopened.last_retry_at.is_some());
    assert_eq!(
        harness.store.chunks_of(created.id)[1].status,
        ChunkStatus::Ready
    );

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.fetched_chunks, 3);
    assert_eq!(harness.gateway.fetches_of("task-1"), 1);
    assert_eq!(harness.gateway.fetches_of("task-2"), 2);
    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn manual_recording_is_refused_when_camera_is_unavailable() {
    let harness = Harness::new();
    *harness.gateway.camera_error.lock().unwrap() = Some(permanent("no camera mapped to court"));

    let result = harness
        .orchestrator
        .create_manual(request("09:00", "09:45"))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(
        err.error_kind,
        DomainErrorKind::Internal(InternalErrorKind::Validation(_))
    ));
    assert_eq!(harness.store.recording_count(), 0);
    assert!(harness.events.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn manual_recording_is_created_when_camera_is_available() {
    let harness = Harness::new();

    let recording = harness
        .orchestrator
        .create_manual(request("18:00", "19:00"))
        .await
        .unwrap();

    assert!(recording.is_manual_recording);
    assert_eq!(recording.status, RecordingStatus::Pending);
    assert_eq!(recording.max_retries, 3);
}

#[tokio::test]
async fn inverted_window_is_refused() {
    let harness = Harness::new();

    let result = harness
        .orchestrator
        .create_from_booking(request("10:00", "09:00"))
        .await;

    assert!(matches!(
        result.unwrap_err().error_kind,
        DomainErrorKind::Internal(InternalErrorKind::Validation(_))
    ));
    assert_eq!(harness.store.recording_count(), 0);
}

#[tokio::test]
async fn restart_while_polling_only_polls_outstanding_chunks() {
    let harness = Harness::new();
    let created = harness.booked("09:00", "09:45").await;

    // State left behind by a process that stopped while polling.
    let chunks = harness.plan(&created).await;
    for chunk in &chunks[..2] {
        harness
            .store
            .mark_ready(chunk.id, chunk.task_id.as_deref().unwrap())
            .await
            .unwrap();
    }
    let mut stored = harness.reload(created.id).await;
    stored.status = RecordingStatus::Polling;
    stored.total_chunks = 3;
    harness.store.save(stored).await.unwrap();

    harness.orchestrator.run(created.id).await;

    assert_eq!(
        harness.gateway.poll_calls.lock().unwrap().clone(),
        vec!["task-3".to_string()]
    );
    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 0);
    assert_eq!(
        harness.reload(created.id).await.status,
        RecordingStatus::Completed
    );
}

#[tokio::test]
async fn pending_exports_are_polled_until_ready() {
    let harness = Harness::new();
    harness.gateway.script_polls(
        "task-2",
        vec![ExportStatus::Pending, ExportStatus::Pending],
    );
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let polls = harness.gateway.poll_calls.lock().unwrap().clone();
    assert_eq!(polls.iter().filter(|t| *t == "task-2").count(), 3);
    assert_eq!(polls.iter().filter(|t| *t == "task-1").count(), 1);
    assert_eq!(
        harness.reload(created.id).await.status,
        RecordingStatus::Completed
    );
}

#[tokio::test]
async fn export_that_never_becomes_ready_times_out_as_transient() {
    let harness = Harness::with(|settings| {
        settings.poll_timeout = Duration::from_millis(20);
        settings.poll_backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(5));
    });
    harness
        .gateway
        .script_polls("task-1", vec![ExportStatus::Pending; 1000]);
    let created = harness.booked("09:00", "09:15").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(recording.failed_stage, Some(RecordingStatus::Polling));
    assert_eq!(recording.retry_count, 3);
    assert!(recording
        .error_message
        .unwrap()
        .contains("poll timeout exceeded"));
}

#[tokio::test]
async fn transient_failures_exhaust_retries_and_stay_failed() {
    let harness = Harness::new();
    *harness.gateway.export_error.lock().unwrap() = Some(unavailable());
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(recording.failed_stage, Some(RecordingStatus::RequestingChunks));
    assert_eq!(recording.retry_count, 3);
    assert!(recording.last_retry_at.is_some());
    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 3);

    let events = harness.events.events.lock().unwrap().clone();
    assert!(matches!(
        events.last(),
        Some(DomainEvent::RecordingFailed {
            retryable: false,
            ..
        })
    ));

    // A terminal recording is left alone by any later run.
    *harness.gateway.export_error.lock().unwrap() = None;
    harness.orchestrator.run(created.id).await;
    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 3);
    assert_eq!(
        harness.reload(created.id).await.status,
        RecordingStatus::Failed
    );
}

#[tokio::test]
async fn transient_download_failure_is_retried_and_completes() {
    let harness = Harness::new();
    harness.gateway.fail_fetch("task-3", vec![unavailable()]);
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.retry_count, 1);
    assert_eq!(recording.fetched_chunks, 3);
    assert_eq!(harness.gateway.fetches_of("task-1"), 1);
    assert_eq!(harness.gateway.fetches_of("task-3"), 2);
}

#[tokio::test]
async fn retry_is_rejected_once_retries_are_used_up() {
    let harness = Harness::new();
    *harness.gateway.export_error.lock().unwrap() = Some(unavailable());
    let created = harness.booked("09:00", "09:45").await;
    harness.orchestrator.run(created.id).await;
    let before = harness.reload(created.id).await;

    let result = harness.orchestrator.retry(created.id).await;

    assert!(matches!(
        result.unwrap_err().error_kind,
        DomainErrorKind::Internal(InternalErrorKind::RetryRejected(_))
    ));
    let after = harness.reload(created.id).await;
    assert_eq!(after.retry_count, before.retry_count);
    assert_eq!(after.status, RecordingStatus::Failed);
}

#[tokio::test]
async fn retry_of_unfinished_recording_is_rejected() {
    let harness = Harness::new();
    let created = harness.booked("09:00", "09:45").await;

    let result = harness.orchestrator.retry(created.id).await;

    assert!(matches!(
        result.unwrap_err().error_kind,
        DomainErrorKind::Internal(InternalErrorKind::RetryRejected(_))
    ));
    assert_eq!(harness.reload(created.id).await.retry_count, 0);
}

#[tokio::test]
async fn concurrent_runs_drive_a_recording_once() {
    let harness = Harness::new();
    let created = harness.booked("09:00", "09:45").await;

    tokio::join!(
        harness.orchestrator.run(created.id),
        harness.orchestrator.run(created.id)
    );

    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 1);
    assert_eq!(harness.gateway.fetches_of("task-1"), 1);
    assert_eq!(
        harness.reload(created.id).await.status,
        RecordingStatus::Completed
    );
}

#[tokio::test]
async fn resume_unfinished_queues_only_non_terminal_recordings() {
    let harness = Harness::new();
    let finished = harness.booked("09:00", "09:15").await;
    harness.orchestrator.run(finished.id).await;
    harness.booked("10:00", "10:15").await;
    harness.booked("11:00", "11:15").await;

    assert_eq!(harness.orchestrator.resume_unfinished().await.unwrap(), 2);
}

#[tokio::test]
async fn dispatcher_starts_once_and_drives_queued_recordings() {
    let harness = Harness::new();
    let created = harness.booked("09:00", "09:15").await;

    let dispatcher = harness.orchestrator.spawn_workers();
    assert!(dispatcher.is_some());
    assert!(harness.orchestrator.spawn_workers().is_none());

    for _ in 0..200 {
        if harness.reload(created.id).await.status == RecordingStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        harness.reload(created.id).await.status,
        RecordingStatus::Completed
    );
}

#[tokio::test]
async fn lost_consolidated_file_is_consolidated_again_before_upload() {
    let harness = Harness::new();
    let seeded = harness.downloaded_at(RecordingStatus::Uploading).await;

    harness.orchestrator.run(seeded.id).await;

    let recording = harness.reload(seeded.id).await;
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.retry_count, 0);
    assert_eq!(recording.consolidated_chunks, 3);
    assert_eq!(
        harness.archived(&archive_key(recording.external_id)).await,
        MERGED
    );
    assert_eq!(
        harness.statuses(seeded.id),
        vec![
            RecordingStatus::Uploading,
            RecordingStatus::Consolidating,
            RecordingStatus::Uploading,
            RecordingStatus::Completed,
            RecordingStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn lost_consolidated_file_is_not_rebuilt_when_archive_is_complete() {
    let harness = Harness::new();
    let seeded = harness.downloaded_at(RecordingStatus::Uploading).await;
    harness
        .operator
        .write(&archive_key(seeded.external_id), MERGED.to_string())
        .await
        .unwrap();

    harness.orchestrator.run(seeded.id).await;

    assert_eq!(
        harness.reload(seeded.id).await.status,
        RecordingStatus::Completed
    );
    assert!(!harness
        .statuses(seeded.id)
        .contains(&RecordingStatus::Consolidating));
}

#[tokio::test]
async fn missing_chunk_file_fails_consolidation_without_using_retries() {
    let harness = Harness::new();
    let seeded = harness.downloaded_at(RecordingStatus::Consolidating).await;
    tokio::fs::remove_file(
        harness
            .orchestrator
            .recording_dir(&seeded)
            .join("chunk-0002.bin"),
    )
    .await
    .unwrap();

    harness.orchestrator.run(seeded.id).await;

    let recording = harness.reload(seeded.id).await;
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(recording.failed_stage, Some(RecordingStatus::Consolidating));
    assert_eq!(recording.retry_count, 0);
    assert_eq!(recording.consolidated_chunks, 0);
    let message = recording.error_message.unwrap();
    assert!(message.contains("chunk 2"), "{message}");
}

#[tokio::test]
async fn failed_upload_is_retried_automatically() {
    let harness = Harness::new();
    harness.archive.failures.store(1, Ordering::SeqCst);
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.retry_count, 1);
    assert!(recording.last_retry_at.is_some());
    assert!(recording.error_message.is_none());
    assert_eq!(harness.archive.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.archived(&archive_key(recording.external_id)).await,
        MERGED
    );
}

#[tokio::test]
async fn export_outside_retention_fails_at_once() {
    let harness = Harness::new();
    *harness.gateway.export_error.lock().unwrap() = Some(GatewayError::new(
        GatewayErrorKind::OutOfRetention,
        "footage older than 14 days",
    ));
    let created = harness.booked("09:00", "09:45").await;

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Failed);
    assert_eq!(recording.failed_stage, Some(RecordingStatus::RequestingChunks));
    assert_eq!(recording.retry_count, 0);
    assert!(recording
        .error_message
        .unwrap()
        .contains("footage older than 14 days"));
    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 1);
    assert!(harness.store.chunks_of(created.id).is_empty());
}

#[tokio::test]
async fn operator_retry_exports_a_failed_segment_again() {
    let harness = Harness::new();
    harness.gateway.script_polls(
        "task-2",
        vec![ExportStatus::Failed("nvr disk error".to_string())],
    );
    let created = harness.booked("09:00", "09:45").await;
    harness.orchestrator.run(created.id).await;

    let failed = harness.reload(created.id).await;
    assert_eq!(failed.status, RecordingStatus::Failed);
    assert_eq!(failed.failed_stage, Some(RecordingStatus::Polling));
    assert_eq!(failed.retry_count, 0);

    let reopened = harness.orchestrator.retry(created.id).await.unwrap();
    assert_eq!(reopened.status, RecordingStatus::Polling);
    let chunk = harness.store.chunks_of(created.id)[1].clone();
    assert_eq!(chunk.status, ChunkStatus::Requested);
    assert!(chunk.task_id.is_none());

    harness.orchestrator.run(created.id).await;

    let recording = harness.reload(created.id).await;
    assert_eq!(recording.status, RecordingStatus::Completed);
    assert_eq!(recording.retry_count, 1);
    assert_eq!(*harness.gateway.export_calls.lock().unwrap(), 2);
    let polls = harness.gateway.poll_calls.lock().unwrap().clone();
    assert_eq!(polls.iter().filter(|t| *t == "task-2").count(), 1);
    assert_eq!(
        harness.store.chunks_of(created.id)[1].task_id.as_deref(),
        Some("task-4")
    );
    assert_eq!(
        harness.archived(&archive_key(recording.external_id)).await,
        "[task-1][task-4][task-3]"
    );
}
