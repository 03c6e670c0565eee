//! Persistence seam for recording rows.

use crate::error::Error;
use async_trait::async_trait;
use entity::recording_status::RecordingStatus;
use entity::{recordings, Id};
use entity_api::{recording, IntoQueryFilterMap, QueryFilterMap};
use sea_orm::{DatabaseConnection, Value};
use std::sync::Arc;

pub use entity_api::recording::NewRecording;

/// Optional filters for listing recordings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingFilter {
    pub status: Option<RecordingStatus>,
    pub court_id: Option<Id>,
    pub facility_id: Option<Id>,
    pub is_manual_recording: Option<bool>,
}

impl RecordingFilter {
    pub fn matches(&self, recording: &recordings::Model) -> bool {
        self.status.map_or(true, |s| s == recording.status)
            && self.court_id.map_or(true, |id| id == recording.court_id)
            && self.facility_id.map_or(true, |id| id == recording.facility_id)
            && self
                .is_manual_recording
                .map_or(true, |m| m == recording.is_manual_recording)
    }
}

// `status` is applied separately since it is an enum column.
impl IntoQueryFilterMap for RecordingFilter {
    fn into_query_filter_map(self) -> QueryFilterMap {
        let mut query_filter_map = QueryFilterMap::new();
        if let Some(court_id) = self.court_id {
            query_filter_map.insert("court_id".to_string(), Some(Value::BigInt(Some(court_id))));
        }
        if let Some(facility_id) = self.facility_id {
            query_filter_map.insert(
                "facility_id".to_string(),
                Some(Value::BigInt(Some(facility_id))),
            );
        }
        if let Some(is_manual) = self.is_manual_recording {
            query_filter_map.insert(
                "is_manual_recording".to_string(),
                Some(Value::Bool(Some(is_manual))),
            );
        }
        query_filter_map
    }
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn create(&self, new_recording: NewRecording) -> Result<recordings::Model, Error>;

    /// Persists every mutable field of `recording`.
    async fn save(&self, recording: recordings::Model) -> Result<recordings::Model, Error>;

    async fn find(&self, id: Id) -> Result<recordings::Model, Error>;

    /// Recordings not yet COMPLETED or FAILED, oldest first.
    async fn find_unfinished(&self) -> Result<Vec<recordings::Model>, Error>;

    /// Recordings matching `filter`, newest first.
    async fn list(&self, filter: RecordingFilter) -> Result<Vec<recordings::Model>, Error>;
}

/// Postgres-backed store for recordings and their chunks.
#[derive(Clone)]
pub struct DbStore {
    db: Arc<DatabaseConnection>,
}

impl DbStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub(crate) fn conn(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl RecordingStore for DbStore {
    async fn create(&self, new_recording: NewRecording) -> Result<recordings::Model, Error> {
        Ok(recording::create(self.conn(), new_recording).await?)
    }

    async fn save(&self, model: recordings::Model) -> Result<recordings::Model, Error> {
        Ok(recording::update(self.conn(), model).await?)
    }

    async fn find(&self, id: Id) -> Result<recordings::Model, Error> {
        Ok(recording::find_by_id(self.conn(), id).await?)
    }

    async fn find_unfinished(&self) -> Result<Vec<recordings::Model>, Error> {
        Ok(recording::find_unfinished(self.conn()).await?)
    }

    async fn list(&self, filter: RecordingFilter) -> Result<Vec<recordings::Model>, Error> {
        let status = filter.status;
        Ok(recording::find_by(self.conn(), filter.into_query_filter_map(), status).await?)
    }
}
