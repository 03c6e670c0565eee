//! Drives recordings through their lifecycle.
//!
//! Work arrives as recording ids on a queue. Each id is driven by one task at
//! a time: the task first takes the recording's lock, then a worker permit,
//! and runs stages until the recording is terminal. Every stage persists its
//! transition before the next stage starts, so a restarted process resumes
//! from the last stored status.

use crate::archive::ArchiveStore;
use crate::backoff::Backoff;
use crate::chunk_store::ChunkStore;
use crate::error::Error;
use crate::gateway::{CameraAvailability, CameraGateway};
use crate::recording_store::{NewRecording, RecordingStore};
use crate::state_machine::{resume_stage, transition};
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use entity::chunk_status::ChunkStatus;
use entity::recording_status::RecordingStatus;
use entity::{recordings, Id};
use events::{DomainEvent, EventPublisher};
use log::*;
use service::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

mod stages;
#[cfg(test)]
mod tests;

pub use stages::{FailureClass, StageError};

/// Tunables of the pipeline, normally read from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub segment_duration: chrono::Duration,
    pub max_retries: i32,
    pub worker_concurrency: usize,
    pub download_concurrency: usize,
    pub poll_backoff: Backoff,
    pub poll_timeout: Duration,
    pub export_timeout: Duration,
    pub download_timeout: Duration,
    pub consolidation_timeout: Duration,
    pub upload_timeout: Duration,
    pub retry_backoff: Backoff,
    pub continuity_tolerance: chrono::Duration,
    pub work_dir: PathBuf,
    pub keep_local_files: bool,
    pub scan_interval: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            segment_duration: chrono::Duration::seconds(config.segment_duration_secs as i64),
            max_retries: config.max_retries,
            worker_concurrency: config.worker_concurrency.max(1),
            download_concurrency: config.download_concurrency.max(1),
            poll_backoff: Backoff::new(
                Duration::from_millis(config.poll_initial_interval_ms),
                Duration::from_millis(config.poll_max_interval_ms),
            ),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            export_timeout: Duration::from_secs(config.export_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            consolidation_timeout: Duration::from_secs(config.consolidation_timeout_secs),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
            retry_backoff: Backoff::new(
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ),
            continuity_tolerance: chrono::Duration::milliseconds(
                config.continuity_tolerance_ms as i64,
            ),
            work_dir: config.work_dir.clone(),
            keep_local_files: config.keep_local_files,
            scan_interval: Duration::from_secs(config.scan_interval_secs.max(1)),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            segment_duration: chrono::Duration::minutes(15),
            max_retries: 5,
            worker_concurrency: 4,
            download_concurrency: 2,
            poll_backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(30)),
            poll_timeout: Duration::from_secs(30 * 60),
            export_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(10 * 60),
            consolidation_timeout: Duration::from_secs(15 * 60),
            upload_timeout: Duration::from_secs(15 * 60),
            retry_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            continuity_tolerance: chrono::Duration::seconds(2),
            work_dir: PathBuf::from("./recordings-work"),
            keep_local_files: false,
            scan_interval: Duration::from_secs(60),
        }
    }
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub recordings: Arc<dyn RecordingStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub gateway: Arc<dyn CameraGateway>,
    pub archive: Arc<dyn ArchiveStore>,
    pub events: EventPublisher,
}

/// Who asked for a recording and which court window it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingRequest {
    pub facility_id: Id,
    pub court_id: Id,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub user_id: Option<Id>,
    pub booking_id: Option<Id>,
}

impl RecordingRequest {
    fn validate(&self) -> Result<(), Error> {
        if self.facility_id <= 0 {
            return Err(Error::validation("facility_id is required"));
        }
        if self.court_id <= 0 {
            return Err(Error::validation("court_id is required"));
        }
        if self.end_time <= self.start_time {
            return Err(Error::validation("end_time must be after start_time"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    recordings: Arc<dyn RecordingStore>,
    chunks: Arc<dyn ChunkStore>,
    gateway: Arc<dyn CameraGateway>,
    archive: Arc<dyn ArchiveStore>,
    events: EventPublisher,
    settings: PipelineSettings,
    // One lock per recording currently owned by a task.
    locks: DashMap<Id, Arc<Mutex<()>>>,
    workers: Arc<Semaphore>,
    queue: mpsc::UnboundedSender<Id>,
    receiver: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Id>>>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let Collaborators {
            recordings,
            chunks,
            gateway,
            archive,
            events,
        } = collaborators;

        Self {
            inner: Arc::new(Inner {
                recordings,
                chunks,
                gateway,
                archive,
                events,
                workers: Arc::new(Semaphore::new(settings.worker_concurrency.max(1))),
                settings,
                locks: DashMap::new(),
                queue,
                receiver: std::sync::Mutex::new(Some(receiver)),
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    pub fn recording_store(&self) -> &dyn RecordingStore {
        self.inner.recordings.as_ref()
    }

    pub fn chunk_store(&self) -> &dyn ChunkStore {
        self.inner.chunks.as_ref()
    }

    /// Starts the dispatcher that turns queued ids into driving tasks.
    ///
    /// Returns `None` if the dispatcher was already started.
    pub fn spawn_workers(&self) -> Option<JoinHandle<()>> {
        let mut receiver = self.inner.receiver.lock().ok()?.take()?;
        let this = self.clone();

        Some(tokio::spawn(async move {
            while let Some(id) = receiver.recv().await {
                let worker = this.clone();
                tokio::spawn(async move { worker.run(id).await });
            }
        }))
    }

    /// Periodically re-queues unfinished recordings that no task currently owns.
    pub fn spawn_scanner(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings().scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already resumed everything.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match this.scan().await {
                    Ok(0) => {}
                    Ok(count) => info!("Scan re-queued {count} unfinished recordings"),
                    Err(e) => warn!("Scan for unfinished recordings failed: {e}"),
                }
            }
        })
    }

    pub fn enqueue(&self, id: Id) {
        debug!("Queueing recording {id}");
        if self.inner.queue.send(id).is_err() {
            warn!("Recording queue is closed, recording {id} will be picked up by the next scan");
        }
    }

    /// Queues every recording that is not COMPLETED or FAILED.
    pub async fn resume_unfinished(&self) -> Result<usize, Error> {
        let unfinished = self.inner.recordings.find_unfinished().await?;
        for recording in &unfinished {
            info!(
                "Resuming recording {} at {}",
                recording.id, recording.status
            );
            self.enqueue(recording.id);
        }
        Ok(unfinished.len())
    }

    async fn scan(&self) -> Result<usize, Error> {
        let mut queued = 0;
        for recording in self.inner.recordings.find_unfinished().await? {
            if !self.inner.locks.contains_key(&recording.id) {
                self.enqueue(recording.id);
                queued += 1;
            }
        }
        Ok(queued)
    }

    fn lock_for(&self, id: Id) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, id: Id, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.inner
            .locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drives one recording until it is terminal.
    ///
    /// Concurrent calls for the same id run one after another; a later call
    /// finds the recording terminal and returns at once.
    pub async fn run(&self, id: Id) {
        let lock = self.lock_for(id);
        {
            let _owner = lock.lock().await;
            match self.inner.workers.clone().acquire_owned().await {
                Ok(_permit) => {
                    if let Err(e) = self.drive(id).await {
                        error!("Driving recording {id} stopped: {e}");
                    }
                }
                Err(_) => warn!("Worker pool closed, recording {id} not driven"),
            }
        }
        self.release_lock(id, lock);
    }

    async fn drive(&self, id: Id) -> Result<(), Error> {
        loop {
            let recording = self.inner.recordings.find(id).await?;
            if recording.status.is_terminal() {
                debug!("Recording {id} is {}, nothing to do", recording.status);
                return Ok(());
            }

            let stage = recording.status;
            if let Err(stage_error) = self.run_stage(recording).await {
                if !self.record_failure(id, stage, stage_error).await? {
                    return Ok(());
                }
            }
        }
    }

    /// Books a failed stage against the recording. Returns whether the stage
    /// should be attempted again.
    async fn record_failure(
        &self,
        id: Id,
        stage: RecordingStatus,
        stage_error: StageError,
    ) -> Result<bool, Error> {
        let mut recording = self.inner.recordings.find(id).await?;
        recording.error_message = Some(stage_error.message.clone());

        if stage_error.class == FailureClass::Transient {
            recording.retry_count += 1;
            if recording.retry_count < recording.max_retries {
                let delay = self
                    .settings()
                    .retry_backoff
                    .delay((recording.retry_count - 1) as u32);
                warn!(
                    "Recording {id} {stage} attempt {} of {} failed, retrying in {delay:?}: {}",
                    recording.retry_count, recording.max_retries, stage_error.message
                );
                recording.last_retry_at = Some(chrono::Utc::now().into());
                self.inner.recordings.save(recording).await?;
                tokio::time::sleep(delay).await;
                return Ok(true);
            }
            error!(
                "Recording {id} exhausted {} retries at {stage}: {}",
                recording.max_retries, stage_error.message
            );
        } else {
            error!(
                "Recording {id} failed permanently at {stage}: {}",
                stage_error.message
            );
        }

        recording.failed_stage = Some(stage);
        transition(&mut recording, RecordingStatus::Failed)?;
        let recording = self.inner.recordings.save(recording).await?;

        self.inner
            .events
            .publish(DomainEvent::RecordingFailed {
                recording_id: recording.id,
                external_id: recording.external_id,
                user_id: recording.user_id,
                error_message: stage_error.message,
                retryable: recording.retry_count < recording.max_retries,
            })
            .await;

        Ok(false)
    }

    /// Operator retry of a FAILED recording, resuming at the stage that failed.
    ///
    /// Refused, without touching the recording, unless it is FAILED and still
    /// has retries left.
    pub async fn retry(&self, id: Id) -> Result<recordings::Model, Error> {
        let lock = self.lock_for(id);
        // A recording owned by a task is still in flight, so it cannot be FAILED.
        let result = match lock.try_lock() {
            Ok(_owner) => self.reopen(id).await,
            Err(_) => Err(Error::retry_rejected(format!(
                "recording {id} is currently being processed"
            ))),
        };
        self.release_lock(id, lock);
        let recording = result?;

        self.inner
            .events
            .publish(DomainEvent::RecordingRetried {
                recording_id: recording.id,
                retry_count: recording.retry_count,
            })
            .await;
        self.enqueue(recording.id);

        Ok(recording)
    }

    async fn reopen(&self, id: Id) -> Result<recordings::Model, Error> {
        let mut recording = self.inner.recordings.find(id).await?;

        if recording.status != RecordingStatus::Failed {
            return Err(Error::retry_rejected(format!(
                "recording {id} is {}, only failed recordings can be retried",
                recording.status
            )));
        }
        if recording.retry_count >= recording.max_retries {
            return Err(Error::retry_rejected(format!(
                "recording {id} has used all {} retries",
                recording.max_retries
            )));
        }

        let target = resume_stage(recording.failed_stage);
        let reset_to = match target {
            RecordingStatus::Polling => Some(ChunkStatus::Requested),
            RecordingStatus::Downloading => Some(ChunkStatus::Ready),
            _ => None,
        };
        if let Some(status) = reset_to {
            self.inner.chunks.reset_failed(id, status).await?;
        }

        recording.retry_count += 1;
        recording.last_retry_at = Some(chrono::Utc::now().into());
        recording.error_message = None;
        recording.failed_stage = None;
        transition(&mut recording, target)?;

        info!(
            "Operator retry {} of {} for recording {id} resumes at {target}",
            recording.retry_count, recording.max_retries
        );
        self.inner.recordings.save(recording).await
    }

    /// Operator-created recording. The court's camera is checked first and no
    /// recording is created when it is unavailable.
    pub async fn create_manual(&self, request: RecordingRequest) -> Result<recordings::Model, Error> {
        request.validate()?;

        let availability = self
            .inner
            .gateway
            .check_availability(request.court_id)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    Error::from(e)
                } else {
                    Error::validation(format!(
                        "no camera available for court {}: {}",
                        request.court_id, e.message
                    ))
                }
            })?;
        if !availability.available {
            return Err(Error::validation(format!(
                "no camera available for court {}: {}",
                request.court_id,
                availability
                    .reason
                    .unwrap_or_else(|| "camera unavailable".to_string())
            )));
        }

        self.create(request, true).await
    }

    /// Recording triggered by the booking system at checkout.
    pub async fn create_from_booking(
        &self,
        request: RecordingRequest,
    ) -> Result<recordings::Model, Error> {
        request.validate()?;
        self.create(request, false).await
    }

    async fn create(
        &self,
        request: RecordingRequest,
        is_manual_recording: bool,
    ) -> Result<recordings::Model, Error> {
        let recording = self
            .inner
            .recordings
            .create(NewRecording {
                facility_id: request.facility_id,
                court_id: request.court_id,
                booking_id: request.booking_id,
                user_id: request.user_id,
                start_time: request.start_time,
                end_time: request.end_time,
                max_retries: self.settings().max_retries,
                is_manual_recording,
            })
            .await?;

        info!(
            "Created recording {} ({}) for court {}",
            recording.id, recording.external_id, recording.court_id
        );

        self.inner
            .events
            .publish(DomainEvent::RecordingCreated {
                recording_id: recording.id,
                external_id: recording.external_id,
                court_id: recording.court_id,
                is_manual_recording,
            })
            .await;
        self.enqueue(recording.id);

        Ok(recording)
    }

    pub async fn camera_availability(&self, court_id: Id) -> Result<CameraAvailability, Error> {
        Ok(self.inner.gateway.check_availability(court_id).await?)
    }
}
