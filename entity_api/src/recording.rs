//! CRUD operations for the recordings table.

use super::error::{EntityApiErrorKind, Error};
use crate::{query, QueryFilterMap};
use entity::recording_status::RecordingStatus;
use entity::recordings::{ActiveModel, Column, Entity, Model};
use entity::Id;
use log::*;
use sea_orm::{
    entity::prelude::*,
    ActiveValue::{Set, Unchanged},
    DatabaseConnection, Order, QueryOrder, TryIntoModel,
};

/// Fields supplied by the caller when a recording is first requested.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecording {
    pub facility_id: Id,
    pub court_id: Id,
    pub booking_id: Option<Id>,
    pub user_id: Option<Id>,
    pub start_time: DateTimeWithTimeZone,
    pub end_time: DateTimeWithTimeZone,
    pub max_retries: i32,
    pub is_manual_recording: bool,
}

/// Creates a new recording in the `pending` state.
pub async fn create(db: &DatabaseConnection, new_recording: NewRecording) -> Result<Model, Error> {
    debug!(
        "Creating new recording for court {} [{} - {})",
        new_recording.court_id, new_recording.start_time, new_recording.end_time
    );

    if new_recording.end_time <= new_recording.start_time {
        return Err(Error {
            source: None,
            error_kind: EntityApiErrorKind::ValidationError,
        });
    }

    let now = chrono::Utc::now();

    let active_model = ActiveModel {
        external_id: Set(Uuid::new_v4()),
        facility_id: Set(new_recording.facility_id),
        court_id: Set(new_recording.court_id),
        booking_id: Set(new_recording.booking_id),
        user_id: Set(new_recording.user_id),
        start_time: Set(new_recording.start_time),
        end_time: Set(new_recording.end_time),
        status: Set(RecordingStatus::Pending),
        failed_stage: Set(None),
        total_chunks: Set(0),
        fetched_chunks: Set(0),
        consolidated_chunks: Set(0),
        total_duration_seconds: Set(None),
        total_file_size_bytes: Set(None),
        retry_count: Set(0),
        max_retries: Set(new_recording.max_retries),
        error_message: Set(None),
        consolidated_storage_key: Set(None),
        consolidated_storage_bucket: Set(None),
        is_manual_recording: Set(new_recording.is_manual_recording),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        consolidation_started_at: Set(None),
        consolidation_completed_at: Set(None),
        archived_at: Set(None),
        last_retry_at: Set(None),
        notification_sent_at: Set(None),
        ..Default::default()
    };

    Ok(active_model.save(db).await?.try_into_model()?)
}

/// Persists every mutable field of `model` onto the existing row.
///
/// Identity columns (`id`, `external_id`, the court/booking references and the
/// window) never change after creation and are left untouched.
pub async fn update(db: &DatabaseConnection, model: Model) -> Result<Model, Error> {
    let existing = find_by_id(db, model.id).await?;

    debug!(
        "Updating recording {}: {} -> {}",
        existing.id, existing.status, model.status
    );

    let active_model = ActiveModel {
        id: Unchanged(existing.id),
        external_id: Unchanged(existing.external_id),
        facility_id: Unchanged(existing.facility_id),
        court_id: Unchanged(existing.court_id),
        booking_id: Unchanged(existing.booking_id),
        user_id: Unchanged(existing.user_id),
        start_time: Unchanged(existing.start_time),
        end_time: Unchanged(existing.end_time),
        status: Set(model.status),
        failed_stage: Set(model.failed_stage),
        total_chunks: Set(model.total_chunks),
        // Only mark_downloaded moves this counter.
        fetched_chunks: Unchanged(existing.fetched_chunks),
        consolidated_chunks: Set(model.consolidated_chunks),
        total_duration_seconds: Set(model.total_duration_seconds),
        total_file_size_bytes: Set(model.total_file_size_bytes),
        retry_count: Set(model.retry_count),
        max_retries: Set(model.max_retries),
        error_message: Set(model.error_message),
        consolidated_storage_key: Set(model.consolidated_storage_key),
        consolidated_storage_bucket: Set(model.consolidated_storage_bucket),
        is_manual_recording: Unchanged(existing.is_manual_recording),
        created_at: Unchanged(existing.created_at),
        updated_at: Set(chrono::Utc::now().into()),
        consolidation_started_at: Set(model.consolidation_started_at),
        consolidation_completed_at: Set(model.consolidation_completed_at),
        archived_at: Set(model.archived_at),
        last_retry_at: Set(model.last_retry_at),
        notification_sent_at: Set(model.notification_sent_at),
    };

    Ok(active_model.update(db).await?.try_into_model()?)
}

/// Finds a recording by its numeric id
pub async fn find_by_id(db: &DatabaseConnection, id: Id) -> Result<Model, Error> {
    Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(Error::not_found)
}

/// Finds every recording that has not reached a terminal status, oldest first.
pub async fn find_unfinished(db: &DatabaseConnection) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::Status.is_not_in([RecordingStatus::Completed, RecordingStatus::Failed]))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?)
}

/// Lists recordings matching `query_filter_map` and, when given, `status`, newest first.
///
/// `status` is kept out of the filter map because it is a postgres enum column
/// and must be compared as [`RecordingStatus`], not as a string value.
pub async fn find_by(
    db: &DatabaseConnection,
    query_filter_map: QueryFilterMap,
    status: Option<RecordingStatus>,
) -> Result<Vec<Model>, Error> {
    let mut select = query::filtered::<Entity, Column>(query_filter_map);
    if let Some(status) = status {
        select = select.filter(Column::Status.eq(status));
    }

    Ok(select.order_by(Column::CreatedAt, Order::Desc).all(db).await?)
}

#[cfg(test)]
// We need to gate seaORM's mock feature behind conditional compilation because
// the feature removes the Clone trait implementation from seaORM's DatabaseConnection.
// see https://github.com/SeaQL/sea-orm/issues/830
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};

    fn recording_model(status: RecordingStatus) -> Model {
        let now = chrono::Utc::now();
        Model {
            id: 7,
            external_id: Uuid::new_v4(),
            facility_id: 1,
            court_id: 3,
            booking_id: Some(42),
            user_id: None,
            start_time: now.into(),
            end_time: (now + chrono::Duration::minutes(45)).into(),
            status,
            failed_stage: None,
            total_chunks: 0,
            fetched_chunks: 0,
            consolidated_chunks: 0,
            total_duration_seconds: None,
            total_file_size_bytes: None,
            retry_count: 0,
            max_retries: 5,
            error_message: None,
            consolidated_storage_key: None,
            consolidated_storage_bucket: None,
            is_manual_recording: false,
            created_at: now.into(),
            updated_at: now.into(),
            consolidation_started_at: None,
            consolidation_completed_at: None,
            archived_at: None,
            last_retry_at: None,
            notification_sent_at: None,
        }
    }

    #[tokio::test]
    async fn create_returns_a_pending_recording() -> Result<(), Error> {
        let model = recording_model(RecordingStatus::Pending);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let recording = create(
            &db,
            NewRecording {
                facility_id: model.facility_id,
                court_id: model.court_id,
                booking_id: model.booking_id,
                user_id: None,
                start_time: model.start_time,
                end_time: model.end_time,
                max_retries: 5,
                is_manual_recording: false,
            },
        )
        .await?;

        assert_eq!(recording.status, RecordingStatus::Pending);
        assert_eq!(recording.total_chunks, 0);

        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_a_window_that_ends_before_it_starts() {
        let model = recording_model(RecordingStatus::Pending);
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let result = create(
            &db,
            NewRecording {
                facility_id: 1,
                court_id: 3,
                booking_id: None,
                user_id: None,
                start_time: model.end_time,
                end_time: model.start_time,
                max_retries: 5,
                is_manual_recording: true,
            },
        )
        .await;

        assert_eq!(
            result.unwrap_err().error_kind,
            EntityApiErrorKind::ValidationError
        );
    }

    #[tokio::test]
    async fn update_persists_the_new_status() -> Result<(), Error> {
        let existing = recording_model(RecordingStatus::Pending);
        let mut changed = existing.clone();
        changed.status = RecordingStatus::RequestingChunks;
        changed.total_chunks = 3;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![existing.clone()], vec![changed.clone()]])
            .into_connection();

        let updated = update(&db, changed).await?;

        assert_eq!(updated.status, RecordingStatus::RequestingChunks);
        assert_eq!(updated.total_chunks, 3);

        Ok(())
    }

    #[tokio::test]
    async fn find_by_id_returns_not_found_for_missing_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<Model>::new()])
            .into_connection();

        let result = find_by_id(&db, 99).await;

        assert_eq!(
            result.unwrap_err().error_kind,
            EntityApiErrorKind::RecordNotFound
        );
    }

    #[tokio::test]
    async fn find_unfinished_returns_non_terminal_rows() -> Result<(), Error> {
        let polling = recording_model(RecordingStatus::Polling);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![polling.clone()]])
            .into_connection();

        let unfinished = find_unfinished(&db).await?;

        assert_eq!(unfinished, vec![polling]);

        Ok(())
    }

    #[tokio::test]
    async fn find_by_filters_on_status_and_court() -> Result<(), Error> {
        let failed = recording_model(RecordingStatus::Failed);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![failed.clone()]])
            .into_connection();

        let mut query_filter_map = QueryFilterMap::new();
        query_filter_map.insert("court_id".to_string(), Some(Value::BigInt(Some(3))));

        let found = find_by(&db, query_filter_map, Some(RecordingStatus::Failed)).await?;

        assert_eq!(found, vec![failed]);

        Ok(())
    }
}
