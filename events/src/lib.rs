//! Event system infrastructure for the recording pipeline.
//!
//! This crate lets the pipeline announce lifecycle milestones without knowing
//! who listens (notification senders, audit logs, cache invalidation).
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing the recording lifecycle events
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates (entity, domain, etc.),
//! avoiding circular dependencies. Entity data is carried as serialized JSON values.

use async_trait::async_trait;
use log::*;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Numeric id type shared with the entity crate.
pub type Id = i64;

/// Domain events emitted by the recording pipeline.
///
/// Entity data is carried as `serde_json::Value` to avoid dependencies on
/// the entity crate.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A recording row was created, either by an operator or by a booking checkout.
    RecordingCreated {
        recording_id: Id,
        external_id: Uuid,
        court_id: Id,
        is_manual_recording: bool,
    },
    /// The consolidated file was archived and the recording is downloadable.
    RecordingCompleted {
        recording_id: Id,
        external_id: Uuid,
        /// User to notify, when the recording belongs to a booking with a user.
        user_id: Option<Id>,
        /// Complete serialized recording entity.
        recording: Value,
    },
    /// The recording moved to the terminal failed state.
    RecordingFailed {
        recording_id: Id,
        external_id: Uuid,
        user_id: Option<Id>,
        error_message: String,
        /// Whether an operator retry is still within the retry budget.
        retryable: bool,
    },
    /// An operator resumed a failed recording.
    RecordingRetried {
        recording_id: Id,
        retry_count: i32,
    },
}

impl DomainEvent {
    pub fn recording_id(&self) -> Id {
        match self {
            DomainEvent::RecordingCreated { recording_id, .. }
            | DomainEvent::RecordingCompleted { recording_id, .. }
            | DomainEvent::RecordingFailed { recording_id, .. }
            | DomainEvent::RecordingRetried { recording_id, .. } => *recording_id,
        }
    }
}

/// Trait for handling domain events.
/// Implementations can perform side effects like sending notifications,
/// updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers, in registration order.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes every event to the log. Registered by default so lifecycle
/// milestones show up in the service output even without other listeners.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::RecordingCreated {
                recording_id,
                court_id,
                is_manual_recording,
                ..
            } => info!(
                "Recording {recording_id} created for court {court_id} (manual: {is_manual_recording})"
            ),
            DomainEvent::RecordingCompleted {
                recording_id,
                user_id,
                ..
            } => info!("Recording {recording_id} completed, notifying user {user_id:?}"),
            DomainEvent::RecordingFailed {
                recording_id,
                error_message,
                retryable,
                ..
            } => warn!(
                "Recording {recording_id} failed (retryable: {retryable}): {error_message}"
            ),
            DomainEvent::RecordingRetried {
                recording_id,
                retry_count,
            } => info!("Recording {recording_id} retried by operator (attempt {retry_count})"),
        }
    }
}
