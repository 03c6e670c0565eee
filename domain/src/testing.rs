//! In-memory collaborators for pipeline tests.

use crate::chunk_store::{ChunkStore, PlannedChunk};
use crate::error::Error;
use crate::gateway::{
    existing_chunk, plan_segments, CameraAvailability, CameraGateway, ExportStatus, ExportTask,
    FetchedChunk, GatewayError, TimeWindow,
};
use crate::recording_store::{NewRecording, RecordingFilter, RecordingStore};
use async_trait::async_trait;
use entity::chunk_status::ChunkStatus;
use entity::recording_status::RecordingStatus;
use entity::{recording_chunks, recordings, Id};
use events::{DomainEvent, EventHandler};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    recordings: BTreeMap<Id, recordings::Model>,
    chunks: BTreeMap<Id, recording_chunks::Model>,
    next_id: Id,
    /// Every recording row as written by `save`, in order.
    history: Vec<recordings::Model>,
}

impl Tables {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// Recording and chunk tables behind one mutex, so `mark_downloaded` is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn history(&self) -> Vec<recordings::Model> {
        self.tables.lock().unwrap().history.clone()
    }

    pub fn recording_count(&self) -> usize {
        self.tables.lock().unwrap().recordings.len()
    }

    pub fn chunks_of(&self, recording_id: Id) -> Vec<recording_chunks::Model> {
        let tables = self.tables.lock().unwrap();
        let mut chunks: Vec<_> = tables
            .chunks
            .values()
            .filter(|c| c.recording_id == recording_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_number);
        chunks
    }

    fn update_chunk(
        &self,
        chunk_id: Id,
        change: impl FnOnce(&mut recording_chunks::Model),
    ) -> Result<recording_chunks::Model, Error> {
        let mut tables = self.tables.lock().unwrap();
        let chunk = tables.chunks.get_mut(&chunk_id).ok_or_else(Error::not_found)?;
        change(chunk);
        chunk.updated_at = chrono::Utc::now().into();
        Ok(chunk.clone())
    }
}

#[async_trait]
impl RecordingStore for MemoryStore {
    async fn create(&self, new: NewRecording) -> Result<recordings::Model, Error> {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id();
        let now = chrono::Utc::now().into();
        let recording = recordings::Model {
            id,
            external_id: Uuid::new_v4(),
            facility_id: new.facility_id,
            court_id: new.court_id,
            booking_id: new.booking_id,
            user_id: new.user_id,
            start_time: new.start_time,
            end_time: new.end_time,
            status: RecordingStatus::Pending,
            failed_stage: None,
            total_chunks: 0,
            fetched_chunks: 0,
            consolidated_chunks: 0,
            total_duration_seconds: None,
            total_file_size_bytes: None,
            retry_count: 0,
            max_retries: new.max_retries,
            error_message: None,
            consolidated_storage_key: None,
            consolidated_storage_bucket: None,
            is_manual_recording: new.is_manual_recording,
            created_at: now,
            updated_at: now,
            consolidation_started_at: None,
            consolidation_completed_at: None,
            archived_at: None,
            last_retry_at: None,
            notification_sent_at: None,
        };
        tables.recordings.insert(id, recording.clone());
        Ok(recording)
    }

    async fn save(&self, mut recording: recordings::Model) -> Result<recordings::Model, Error> {
        let mut tables = self.tables.lock().unwrap();
        let stored = tables
            .recordings
            .get(&recording.id)
            .ok_or_else(Error::not_found)?;
        // The counter is owned by mark_downloaded, like the column update in the database.
        recording.fetched_chunks = stored.fetched_chunks;
        recording.updated_at = chrono::Utc::now().into();
        tables.recordings.insert(recording.id, recording.clone());
        tables.history.push(recording.clone());
        Ok(recording)
    }

    async fn find(&self, id: Id) -> Result<recordings::Model, Error> {
        self.tables
            .lock()
            .unwrap()
            .recordings
            .get(&id)
            .cloned()
            .ok_or_else(Error::not_found)
    }

    async fn find_unfinished(&self) -> Result<Vec<recordings::Model>, Error> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .recordings
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list(&self, filter: RecordingFilter) -> Result<Vec<recordings::Model>, Error> {
        let mut found: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .recordings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn create_plan(
        &self,
        recording_id: Id,
        planned: Vec<PlannedChunk>,
    ) -> Result<Vec<recording_chunks::Model>, Error> {
        let mut tables = self.tables.lock().unwrap();
        let now = chrono::Utc::now().into();
        let mut created = Vec::new();
        for chunk in planned {
            let id = tables.next_id();
            let model = recording_chunks::Model {
                id,
                recording_id,
                chunk_number: chunk.chunk_number,
                task_id: chunk.task_id,
                status: ChunkStatus::Requested,
                start_time: chunk.start_time,
                end_time: chunk.end_time,
                local_path: None,
                file_size_bytes: None,
                failure_reason: None,
                created_at: now,
                updated_at: now,
            };
            tables.chunks.insert(id, model.clone());
            created.push(model);
        }
        Ok(created)
    }

    async fn mark_ready(
        &self,
        chunk_id: Id,
        task_id: &str,
    ) -> Result<recording_chunks::Model, Error> {
        self.update_chunk(chunk_id, |chunk| {
            chunk.status = ChunkStatus::Ready;
            chunk.task_id = Some(task_id.to_string());
        })
    }

    async fn mark_downloaded(
        &self,
        chunk_id: Id,
        local_path: &str,
        file_size_bytes: i64,
    ) -> Result<(recording_chunks::Model, recordings::Model), Error> {
        let mut tables = self.tables.lock().unwrap();
        let chunk = tables.chunks.get_mut(&chunk_id).ok_or_else(Error::not_found)?;
        let newly_downloaded = chunk.status != ChunkStatus::Downloaded;
        if newly_downloaded {
            chunk.status = ChunkStatus::Downloaded;
            chunk.local_path = Some(local_path.to_string());
            chunk.file_size_bytes = Some(file_size_bytes);
            chunk.failure_reason = None;
        }
        let chunk = chunk.clone();

        let recording = tables
            .recordings
            .get_mut(&chunk.recording_id)
            .ok_or_else(Error::not_found)?;
        if newly_downloaded {
            recording.fetched_chunks += 1;
        }
        Ok((chunk, recording.clone()))
    }

    async fn mark_failed(
        &self,
        chunk_id: Id,
        reason: &str,
    ) -> Result<recording_chunks::Model, Error> {
        self.update_chunk(chunk_id, |chunk| {
            chunk.status = ChunkStatus::Failed;
            chunk.failure_reason = Some(reason.to_string());
        })
    }

    async fn assign_task(
        &self,
        chunk_id: Id,
        task_id: &str,
    ) -> Result<recording_chunks::Model, Error> {
        self.update_chunk(chunk_id, |chunk| {
            chunk.status = ChunkStatus::Requested;
            chunk.task_id = Some(task_id.to_string());
        })
    }

    async fn reset_failed(&self, recording_id: Id, status: ChunkStatus) -> Result<u64, Error> {
        let mut tables = self.tables.lock().unwrap();
        let mut reset = 0;
        for chunk in tables.chunks.values_mut() {
            if chunk.recording_id == recording_id && chunk.status == ChunkStatus::Failed {
                chunk.status = status;
                chunk.failure_reason = None;
                if status == ChunkStatus::Requested {
                    chunk.task_id = None;
                }
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn list_by_recording(
        &self,
        recording_id: Id,
    ) -> Result<Vec<recording_chunks::Model>, Error> {
        Ok(self.chunks_of(recording_id))
    }
}

/// Scriptable camera gateway. Task ids are numbered in the order exports are
/// requested, so the first export of a recording yields `task-{chunk_number}`.
/// Exports are ready and fetches succeed unless scripted otherwise; an export
/// reported as failed stays failed.
pub struct FakeGateway {
    segment_duration: chrono::Duration,
    pub camera_error: Mutex<Option<GatewayError>>,
    pub export_error: Mutex<Option<GatewayError>>,
    pub export_calls: Mutex<usize>,
    next_task: Mutex<usize>,
    pub poll_script: Mutex<HashMap<String, VecDeque<ExportStatus>>>,
    pub poll_calls: Mutex<Vec<String>>,
    pub fetch_errors: Mutex<HashMap<String, VecDeque<GatewayError>>>,
    pub fetch_delays: Mutex<HashMap<String, Duration>>,
    pub fetch_calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new(segment_duration: chrono::Duration) -> Self {
        Self {
            segment_duration,
            camera_error: Mutex::new(None),
            export_error: Mutex::new(None),
            export_calls: Mutex::new(0),
            next_task: Mutex::new(0),
            poll_script: Mutex::new(HashMap::new()),
            poll_calls: Mutex::new(Vec::new()),
            fetch_errors: Mutex::new(HashMap::new()),
            fetch_delays: Mutex::new(HashMap::new()),
            fetch_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script_polls(&self, task_id: &str, statuses: Vec<ExportStatus>) {
        self.poll_script
            .lock()
            .unwrap()
            .insert(task_id.to_string(), statuses.into());
    }

    pub fn fail_fetch(&self, task_id: &str, errors: Vec<GatewayError>) {
        self.fetch_errors
            .lock()
            .unwrap()
            .insert(task_id.to_string(), errors.into());
    }

    pub fn delay_fetch(&self, task_id: &str, delay: Duration) {
        self.fetch_delays
            .lock()
            .unwrap()
            .insert(task_id.to_string(), delay);
    }

    pub fn fetches_of(&self, task_id: &str) -> usize {
        self.fetch_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|t| *t == task_id)
            .count()
    }

    /// Bytes written for a task, so merged output can be checked for order.
    pub fn body_of(task_id: &str) -> String {
        format!("[{task_id}]")
    }
}

#[async_trait]
impl CameraGateway for FakeGateway {
    async fn check_availability(&self, court_id: Id) -> Result<CameraAvailability, GatewayError> {
        match self.camera_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(CameraAvailability {
                court_id,
                available: true,
                camera_id: Some(format!("cam-{court_id}")),
                reason: None,
            }),
        }
    }

    async fn request_export(
        &self,
        _court_id: Id,
        window: TimeWindow,
    ) -> Result<Vec<ExportTask>, GatewayError> {
        *self.export_calls.lock().unwrap() += 1;
        if let Some(err) = self.export_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut next_task = self.next_task.lock().unwrap();
        Ok(plan_segments(window, self.segment_duration)
            .into_iter()
            .zip(1..)
            .map(|(window, chunk_number)| {
                *next_task += 1;
                ExportTask {
                    chunk_number,
                    task_id: format!("task-{}", *next_task),
                    window,
                }
            })
            .collect())
    }

    async fn poll_export_status(&self, task_id: &str) -> Result<ExportStatus, GatewayError> {
        self.poll_calls.lock().unwrap().push(task_id.to_string());
        let mut script = self.poll_script.lock().unwrap();
        let scripted = script.get_mut(task_id).and_then(|statuses| {
            let status = statuses.pop_front()?;
            if matches!(status, ExportStatus::Failed(_)) {
                statuses.push_front(status.clone());
            }
            Some(status)
        });
        Ok(scripted.unwrap_or(ExportStatus::Ready))
    }

    async fn fetch_chunk(
        &self,
        task_id: &str,
        destination: &Path,
    ) -> Result<FetchedChunk, GatewayError> {
        self.fetch_calls.lock().unwrap().push(task_id.to_string());
        let delay = self.fetch_delays.lock().unwrap().get(task_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .fetch_errors
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }
        if let Some(existing) = existing_chunk(destination).await {
            return Ok(existing);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = Self::body_of(task_id);
        tokio::fs::write(destination, body.as_bytes()).await?;
        Ok(FetchedChunk {
            path: destination.to_path_buf(),
            size_bytes: body.len() as i64,
            cached: false,
        })
    }
}

/// Keeps every published event.
#[derive(Default)]
pub struct CollectingHandler {
    pub events: Mutex<Vec<DomainEvent>>,
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn handle(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
