//! One method per non-terminal status. Each stage either persists the move to
//! the next status or returns a [`StageError`] for the orchestrator to book.

use super::Orchestrator;
use crate::archive::archive_key;
use crate::chunk_store::PlannedChunk;
use crate::consolidation::{consolidate, ConsolidationError};
use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use crate::gateway::{plan_segments, ExportStatus, GatewayError, TimeWindow};
use crate::state_machine::transition;
use entity::chunk_status::ChunkStatus;
use entity::recording_status::RecordingStatus;
use entity::{recording_chunks, recordings};
use events::DomainEvent;
use futures_util::{stream, StreamExt};
use log::*;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const CONSOLIDATED_FILE_NAME: &str = "consolidated.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Counted against the recording's retries and attempted again.
    Transient,
    /// Fails the recording immediately.
    Permanent,
}

/// Why a stage did not complete.
#[derive(Debug, Clone, PartialEq)]
pub struct StageError {
    pub class: FailureClass,
    pub message: String,
    pub chunk_number: Option<i32>,
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
            chunk_number: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
            chunk_number: None,
        }
    }

    fn for_chunk(mut self, chunk_number: i32) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }

    fn from_gateway(err: &GatewayError, context: &str) -> Self {
        let message = format!("{context}: {}", err.message);
        if err.is_transient() {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }
}

// Store failures are retried; a refused transition means the stored state is inconsistent.
impl From<Error> for StageError {
    fn from(err: Error) -> Self {
        match err.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::InvalidTransition { from, to }) => {
                StageError::permanent(format!("invalid transition from {from} to {to}"))
            }
            _ => StageError::transient(err.to_string()),
        }
    }
}

impl From<ConsolidationError> for StageError {
    fn from(err: ConsolidationError) -> Self {
        let stage_error = if err.is_transient() {
            StageError::transient(err.to_string())
        } else {
            StageError::permanent(err.to_string())
        };
        match err.chunk_number() {
            Some(chunk_number) => stage_error.for_chunk(chunk_number),
            None => stage_error,
        }
    }
}

async fn within<T, F>(limit: Duration, what: &str, work: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StageError>>,
{
    tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
        Err(StageError::transient(format!(
            "{what} timed out after {}s",
            limit.as_secs()
        )))
    })
}

fn window_of(recording: &recordings::Model) -> TimeWindow {
    TimeWindow::new(recording.start_time, recording.end_time)
}

impl Orchestrator {
    pub(super) fn recording_dir(&self, recording: &recordings::Model) -> PathBuf {
        self.settings()
            .work_dir
            .join(recording.external_id.to_string())
    }

    pub(super) async fn run_stage(&self, recording: recordings::Model) -> Result<(), StageError> {
        debug!("Running {} for recording {}", recording.status, recording.id);

        match recording.status {
            RecordingStatus::Pending => self.plan(recording).await,
            RecordingStatus::RequestingChunks => self.request_chunks(recording).await,
            RecordingStatus::Polling => self.poll_exports(recording).await,
            RecordingStatus::Downloading => self.download_chunks(recording).await,
            RecordingStatus::Consolidating => self.consolidate_chunks(recording).await,
            RecordingStatus::Uploading => self.upload(recording).await,
            status @ (RecordingStatus::Completed | RecordingStatus::Failed) => Err(
                StageError::permanent(format!("recording is already {status}")),
            ),
        }
    }

    async fn save_as(
        &self,
        mut recording: recordings::Model,
        to: RecordingStatus,
    ) -> Result<recordings::Model, StageError> {
        transition(&mut recording, to)?;
        Ok(self.inner.recordings.save(recording).await?)
    }

    async fn plan(&self, mut recording: recordings::Model) -> Result<(), StageError> {
        let segments = plan_segments(window_of(&recording), self.settings().segment_duration);
        if segments.is_empty() {
            return Err(StageError::permanent("recording window is empty"));
        }

        recording.total_chunks = segments.len() as i32;
        self.save_as(recording, RecordingStatus::RequestingChunks)
            .await?;
        Ok(())
    }

    async fn request_chunks(&self, mut recording: recordings::Model) -> Result<(), StageError> {
        // A plan stored before a restart means the exports were already accepted.
        let existing = self.inner.chunks.list_by_recording(recording.id).await?;
        if !existing.is_empty() {
            info!(
                "Recording {} already has {} planned chunks",
                recording.id,
                existing.len()
            );
            recording.total_chunks = existing.len() as i32;
            self.save_as(recording, RecordingStatus::Polling).await?;
            return Ok(());
        }

        let gateway = self.inner.gateway.clone();
        let (court_id, window) = (recording.court_id, window_of(&recording));
        let tasks = within(self.settings().export_timeout, "export request", async move {
            gateway
                .request_export(court_id, window)
                .await
                .map_err(|e| StageError::from_gateway(&e, "export request failed"))
        })
        .await?;
        if tasks.is_empty() {
            return Err(StageError::permanent("gateway accepted no export tasks"));
        }

        let planned = tasks
            .into_iter()
            .map(|task| PlannedChunk {
                chunk_number: task.chunk_number,
                task_id: Some(task.task_id),
                start_time: task.window.start,
                end_time: task.window.end,
            })
            .collect::<Vec<_>>();
        recording.total_chunks = planned.len() as i32;
        self.inner
            .chunks
            .create_plan(recording.id, planned)
            .await?;

        self.save_as(recording, RecordingStatus::Polling).await?;
        Ok(())
    }

    /// Polls only chunks still `requested`, backing off between rounds until
    /// every chunk is ready or the poll timeout runs out. A requested chunk
    /// without a task id is exported again first.
    async fn poll_exports(&self, recording: recordings::Model) -> Result<(), StageError> {
        let settings = self.settings();
        let deadline = Instant::now() + settings.poll_timeout;
        let mut round: u32 = 0;

        loop {
            let chunks = self.inner.chunks.list_by_recording(recording.id).await?;
            if let Some(failed) = chunks.iter().find(|c| c.status == ChunkStatus::Failed) {
                return Err(failed_chunk_error(failed));
            }

            let mut outstanding: Vec<_> = chunks
                .into_iter()
                .filter(|c| c.status == ChunkStatus::Requested)
                .collect();
            if outstanding.is_empty() {
                self.save_as(recording, RecordingStatus::Downloading)
                    .await?;
                return Ok(());
            }
            for chunk in outstanding.iter_mut().filter(|c| c.task_id.is_none()) {
                *chunk = self.export_again(&recording, chunk).await?;
            }

            let mut still_pending = Vec::new();
            for chunk in &outstanding {
                if !self.poll_chunk(chunk).await? {
                    still_pending.push(chunk.chunk_number);
                }
            }
            if still_pending.is_empty() {
                continue;
            }

            let delay = settings.poll_backoff.delay(round);
            round += 1;
            if Instant::now() + delay > deadline {
                return Err(StageError::transient(format!(
                    "poll timeout exceeded waiting for chunks {still_pending:?}"
                )));
            }
            debug!(
                "Recording {}: {} chunks not ready, polling again in {delay:?}",
                recording.id,
                still_pending.len()
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Starts a new export job for a chunk whose previous job failed.
    async fn export_again(
        &self,
        recording: &recordings::Model,
        chunk: &recording_chunks::Model,
    ) -> Result<recording_chunks::Model, StageError> {
        let chunk_number = chunk.chunk_number;
        let gateway = self.inner.gateway.clone();
        let (court_id, window) = (
            recording.court_id,
            TimeWindow::new(chunk.start_time, chunk.end_time),
        );
        let tasks = within(self.settings().export_timeout, "export request", async move {
            gateway.request_export(court_id, window).await.map_err(|e| {
                StageError::from_gateway(
                    &e,
                    &format!("export request for chunk {chunk_number} failed"),
                )
                .for_chunk(chunk_number)
            })
        })
        .await?;

        let task = match tasks.as_slice() {
            [task] => task,
            _ => {
                return Err(StageError::permanent(format!(
                    "gateway answered {} export tasks for chunk {chunk_number}",
                    tasks.len()
                ))
                .for_chunk(chunk_number))
            }
        };
        info!(
            "Recording {}: chunk {chunk_number} exported again as {}",
            recording.id, task.task_id
        );
        Ok(self.inner.chunks.assign_task(chunk.id, &task.task_id).await?)
    }

    /// Returns whether the chunk is ready.
    async fn poll_chunk(&self, chunk: &recording_chunks::Model) -> Result<bool, StageError> {
        let chunk_number = chunk.chunk_number;
        let task_id = chunk.task_id.as_deref().ok_or_else(|| {
            StageError::permanent(format!("chunk {chunk_number} has no export task"))
                .for_chunk(chunk_number)
        })?;

        let polled = tokio::time::timeout(
            self.settings().export_timeout,
            self.inner.gateway.poll_export_status(task_id),
        )
        .await;

        match polled {
            Ok(Ok(ExportStatus::Ready)) => {
                self.inner.chunks.mark_ready(chunk.id, task_id).await?;
                Ok(true)
            }
            Ok(Ok(ExportStatus::Pending)) => Ok(false),
            Ok(Ok(ExportStatus::Failed(reason))) => {
                self.inner.chunks.mark_failed(chunk.id, &reason).await?;
                Err(StageError::permanent(format!(
                    "export of chunk {chunk_number} failed: {reason}"
                ))
                .for_chunk(chunk_number))
            }
            // Transient poll errors only cost time; the poll timeout bounds them.
            Ok(Err(e)) if e.is_transient() => {
                warn!("Polling chunk {chunk_number} failed, will poll again: {e}");
                Ok(false)
            }
            Ok(Err(e)) => Err(StageError::from_gateway(
                &e,
                &format!("polling chunk {chunk_number} failed"),
            )
            .for_chunk(chunk_number)),
            Err(_) => {
                warn!("Polling chunk {chunk_number} timed out, will poll again");
                Ok(false)
            }
        }
    }

    async fn download_chunks(&self, recording: recordings::Model) -> Result<(), StageError> {
        let chunks = self.inner.chunks.list_by_recording(recording.id).await?;
        if let Some(failed) = chunks.iter().find(|c| c.status == ChunkStatus::Failed) {
            return Err(failed_chunk_error(failed));
        }
        if let Some(unexported) = chunks.iter().find(|c| c.status == ChunkStatus::Requested) {
            return Err(StageError::permanent(format!(
                "chunk {} was never reported ready",
                unexported.chunk_number
            ))
            .for_chunk(unexported.chunk_number));
        }

        let dir = self.recording_dir(&recording);
        let ready: Vec<_> = chunks
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Ready)
            .collect();

        // Every fetch runs to completion so chunks that succeed stay downloaded.
        let mut errors: Vec<StageError> = stream::iter(ready)
            .map(|chunk| self.fetch_chunk(chunk, &dir))
            .buffer_unordered(self.settings().download_concurrency.max(1))
            .filter_map(|result| async move { result.err() })
            .collect()
            .await;
        if !errors.is_empty() {
            errors.sort_by_key(|e| (e.class != FailureClass::Permanent, e.chunk_number));
            return Err(errors.remove(0));
        }

        let mut recording = self.inner.recordings.find(recording.id).await?;
        if recording.fetched_chunks < recording.total_chunks {
            return Err(StageError::transient(format!(
                "only {} of {} chunks fetched",
                recording.fetched_chunks, recording.total_chunks
            )));
        }

        recording.consolidation_started_at = Some(chrono::Utc::now().into());
        self.save_as(recording, RecordingStatus::Consolidating)
            .await?;
        Ok(())
    }

    async fn fetch_chunk(
        &self,
        chunk: recording_chunks::Model,
        dir: &Path,
    ) -> Result<(), StageError> {
        let chunk_number = chunk.chunk_number;
        let task_id = chunk.task_id.clone().ok_or_else(|| {
            StageError::permanent(format!("chunk {chunk_number} has no export task"))
                .for_chunk(chunk_number)
        })?;
        let destination = dir.join(format!("chunk-{chunk_number:04}.bin"));

        let fetched = tokio::time::timeout(
            self.settings().download_timeout,
            self.inner.gateway.fetch_chunk(&task_id, &destination),
        )
        .await;

        let fetched = match fetched {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) if e.is_transient() => {
                return Err(StageError::from_gateway(
                    &e,
                    &format!("download of chunk {chunk_number} failed"),
                )
                .for_chunk(chunk_number))
            }
            Ok(Err(e)) => {
                self.inner.chunks.mark_failed(chunk.id, &e.message).await?;
                return Err(StageError::permanent(format!(
                    "download of chunk {chunk_number} failed permanently: {}",
                    e.message
                ))
                .for_chunk(chunk_number));
            }
            Err(_) => {
                return Err(StageError::transient(format!(
                    "download of chunk {chunk_number} timed out"
                ))
                .for_chunk(chunk_number))
            }
        };

        self.inner
            .chunks
            .mark_downloaded(
                chunk.id,
                &fetched.path.to_string_lossy(),
                fetched.size_bytes,
            )
            .await?;
        Ok(())
    }

    async fn consolidate_chunks(&self, mut recording: recordings::Model) -> Result<(), StageError> {
        if recording.fetched_chunks != recording.total_chunks {
            return Err(StageError::permanent(format!(
                "cannot consolidate {} of {} chunks",
                recording.fetched_chunks, recording.total_chunks
            )));
        }

        let chunks = self.inner.chunks.list_by_recording(recording.id).await?;
        let output = self.recording_dir(&recording).join(CONSOLIDATED_FILE_NAME);
        let tolerance = self.settings().continuity_tolerance;

        let outcome = within(self.settings().consolidation_timeout, "consolidation", async {
            consolidate(&chunks, &output, tolerance)
                .await
                .map_err(StageError::from)
        })
        .await?;

        recording.total_duration_seconds = Some(outcome.total_duration_seconds);
        recording.total_file_size_bytes = Some(outcome.total_file_size_bytes);
        recording.consolidated_chunks = outcome.chunk_count;
        recording.consolidation_completed_at = Some(chrono::Utc::now().into());
        self.save_as(recording, RecordingStatus::Uploading).await?;
        Ok(())
    }

    async fn upload(&self, mut recording: recordings::Model) -> Result<(), StageError> {
        let dir = self.recording_dir(&recording);
        let source = dir.join(CONSOLIDATED_FILE_NAME);
        let key = archive_key(recording.external_id);

        let local_size = match tokio::fs::metadata(&source).await {
            Ok(metadata) if metadata.is_file() => Some(metadata.len() as i64),
            _ => None,
        };
        let expected_size = match (recording.total_file_size_bytes, local_size) {
            (Some(size), _) | (None, Some(size)) => size,
            (None, None) => return self.consolidate_again(recording).await,
        };
        // Without the local file, only an already complete object lets the upload finish.
        if local_size.is_none() && self.archived_size(&key).await? != Some(expected_size) {
            return self.consolidate_again(recording).await;
        }

        let stored = within(self.settings().upload_timeout, "archive upload", async {
            self.inner
                .archive
                .upsert(&key, &source, expected_size)
                .await
                .map_err(|e| match e.error_kind {
                    DomainErrorKind::External(_) => {
                        StageError::transient(format!("archive upload failed: {e}"))
                    }
                    DomainErrorKind::Internal(_) => {
                        StageError::permanent(format!("archive upload failed: {e}"))
                    }
                })
        })
        .await?;

        recording.consolidated_storage_key = Some(stored.key);
        recording.consolidated_storage_bucket = Some(stored.bucket);
        recording.archived_at = Some(chrono::Utc::now().into());
        recording.error_message = None;
        let mut recording = self.save_as(recording, RecordingStatus::Completed).await?;

        self.inner
            .events
            .publish(DomainEvent::RecordingCompleted {
                recording_id: recording.id,
                external_id: recording.external_id,
                user_id: recording.user_id,
                recording: serde_json::to_value(&recording).unwrap_or_default(),
            })
            .await;

        if recording.user_id.is_some() {
            recording.notification_sent_at = Some(chrono::Utc::now().into());
            if let Err(e) = self.inner.recordings.save(recording).await {
                warn!("Failed to record notification time: {e}");
            }
        }

        if !self.settings().keep_local_files {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Removed working files in {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
            }
        }

        Ok(())
    }

    async fn archived_size(&self, key: &str) -> Result<Option<i64>, StageError> {
        within(self.settings().upload_timeout, "archive lookup", async {
            self.inner
                .archive
                .stored_size(key)
                .await
                .map_err(|e| StageError::transient(format!("archive lookup failed: {e}")))
        })
        .await
    }

    /// Sends a recording whose consolidated file was lost back to consolidation.
    async fn consolidate_again(&self, mut recording: recordings::Model) -> Result<(), StageError> {
        warn!(
            "Recording {}: consolidated file is gone and no complete archive exists, consolidating again",
            recording.id
        );
        recording.consolidated_chunks = 0;
        recording.total_duration_seconds = None;
        recording.total_file_size_bytes = None;
        recording.consolidation_started_at = Some(chrono::Utc::now().into());
        recording.consolidation_completed_at = None;
        self.save_as(recording, RecordingStatus::Consolidating)
            .await?;
        Ok(())
    }
}

fn failed_chunk_error(chunk: &recording_chunks::Model) -> StageError {
    StageError::permanent(format!(
        "chunk {} failed: {}",
        chunk.chunk_number,
        chunk.failure_reason.as_deref().unwrap_or("unknown reason")
    ))
    .for_chunk(chunk.chunk_number)
}
