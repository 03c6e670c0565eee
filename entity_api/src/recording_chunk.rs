//! Persistence for the per-segment rows of a recording.
//!
//! Every mutation touches a single chunk row. The one exception is
//! [`mark_downloaded`], which also bumps the owning recording's
//! `fetched_chunks` counter inside the same transaction so readers never see
//! the counter ahead of (or behind) the chunk rows.

use super::error::Error;
use entity::chunk_status::ChunkStatus;
use entity::recording_chunks::{ActiveModel, Column, Entity, Model};
use entity::{recordings, Id};
use log::*;
use sea_orm::{
    entity::prelude::*, sea_query::Expr, ActiveValue::Set, DatabaseConnection, QueryOrder,
    TransactionTrait,
};

/// One planned segment handed to [`create_plan`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChunk {
    pub chunk_number: i32,
    pub task_id: Option<String>,
    pub start_time: DateTimeWithTimeZone,
    pub end_time: DateTimeWithTimeZone,
}

/// Inserts the full chunk plan for a recording, every row in `requested`.
pub async fn create_plan(
    db: &DatabaseConnection,
    recording_id: Id,
    planned: Vec<PlannedChunk>,
) -> Result<Vec<Model>, Error> {
    debug!(
        "Creating plan of {} chunks for recording {recording_id}",
        planned.len()
    );

    let now = chrono::Utc::now();
    let txn = db.begin().await?;

    let mut created = Vec::with_capacity(planned.len());
    for chunk in planned {
        let active_model = ActiveModel {
            recording_id: Set(recording_id),
            chunk_number: Set(chunk.chunk_number),
            task_id: Set(chunk.task_id),
            status: Set(ChunkStatus::Requested),
            start_time: Set(chunk.start_time),
            end_time: Set(chunk.end_time),
            local_path: Set(None),
            file_size_bytes: Set(None),
            failure_reason: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        created.push(active_model.insert(&txn).await?);
    }

    txn.commit().await?;

    Ok(created)
}

/// Marks a chunk's export as finished on the gateway side.
pub async fn mark_ready(db: &DatabaseConnection, chunk_id: Id, task_id: &str) -> Result<Model, Error> {
    let chunk = find_by_id(db, chunk_id).await?;
    debug!(
        "Chunk {} of recording {} is ready",
        chunk.chunk_number, chunk.recording_id
    );

    let mut active_model: ActiveModel = chunk.into();
    active_model.status = Set(ChunkStatus::Ready);
    active_model.task_id = Set(Some(task_id.to_owned()));
    active_model.updated_at = Set(chrono::Utc::now().into());

    Ok(active_model.update(db).await?)
}

/// Records a successful fetch and increments the recording's `fetched_chunks`
/// atomically. Calling this for a chunk that is already downloaded changes
/// nothing.
pub async fn mark_downloaded(
    db: &DatabaseConnection,
    chunk_id: Id,
    local_path: &str,
    file_size_bytes: i64,
) -> Result<(Model, recordings::Model), Error> {
    let txn = db.begin().await?;

    let chunk = Entity::find_by_id(chunk_id)
        .one(&txn)
        .await?
        .ok_or_else(Error::not_found)?;
    let recording_id = chunk.recording_id;

    let chunk = if chunk.status == ChunkStatus::Downloaded {
        chunk
    } else {
        let now: DateTimeWithTimeZone = chrono::Utc::now().into();

        let mut active_model: ActiveModel = chunk.into();
        active_model.status = Set(ChunkStatus::Downloaded);
        active_model.local_path = Set(Some(local_path.to_owned()));
        active_model.file_size_bytes = Set(Some(file_size_bytes));
        active_model.failure_reason = Set(None);
        active_model.updated_at = Set(now);
        let chunk = active_model.update(&txn).await?;

        recordings::Entity::update_many()
            .col_expr(
                recordings::Column::FetchedChunks,
                Expr::col(recordings::Column::FetchedChunks).add(1),
            )
            .col_expr(recordings::Column::UpdatedAt, Expr::value(now))
            .filter(recordings::Column::Id.eq(recording_id))
            .exec(&txn)
            .await?;

        chunk
    };

    let recording = recordings::Entity::find_by_id(recording_id)
        .one(&txn)
        .await?
        .ok_or_else(Error::not_found)?;

    txn.commit().await?;

    Ok((chunk, recording))
}

/// Marks a chunk as unrecoverable, keeping `reason` for the operator.
pub async fn mark_failed(db: &DatabaseConnection, chunk_id: Id, reason: &str) -> Result<Model, Error> {
    let chunk = find_by_id(db, chunk_id).await?;
    warn!(
        "Chunk {} of recording {} failed: {reason}",
        chunk.chunk_number, chunk.recording_id
    );

    let mut active_model: ActiveModel = chunk.into();
    active_model.status = Set(ChunkStatus::Failed);
    active_model.failure_reason = Set(Some(reason.to_owned()));
    active_model.updated_at = Set(chrono::Utc::now().into());

    Ok(active_model.update(db).await?)
}

/// Gives a `requested` chunk a fresh export job.
pub async fn assign_task(db: &DatabaseConnection, chunk_id: Id, task_id: &str) -> Result<Model, Error> {
    let chunk = find_by_id(db, chunk_id).await?;
    debug!(
        "Chunk {} of recording {} exported again as {task_id}",
        chunk.chunk_number, chunk.recording_id
    );

    let mut active_model: ActiveModel = chunk.into();
    active_model.status = Set(ChunkStatus::Requested);
    active_model.task_id = Set(Some(task_id.to_owned()));
    active_model.updated_at = Set(chrono::Utc::now().into());

    Ok(active_model.update(db).await?)
}

/// Moves every failed chunk of a recording back to `status`, returning how many moved.
///
/// Chunks moved back to `requested` lose their task id: the export job that
/// failed cannot be polled again, so a new one has to be assigned.
pub async fn reset_failed(
    db: &DatabaseConnection,
    recording_id: Id,
    status: ChunkStatus,
) -> Result<u64, Error> {
    let mut update = Entity::update_many()
        .col_expr(Column::Status, Column::Status.save_as(Expr::val(status)))
        .col_expr(Column::FailureReason, Expr::value(Option::<String>::None))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(DateTimeWithTimeZone::from(chrono::Utc::now())),
        );
    if status == ChunkStatus::Requested {
        update = update.col_expr(Column::TaskId, Expr::value(Option::<String>::None));
    }

    let result = update
        .filter(Column::RecordingId.eq(recording_id))
        .filter(Column::Status.eq(ChunkStatus::Failed))
        .exec(db)
        .await?;

    debug!(
        "Reset {} failed chunks of recording {recording_id} to {status}",
        result.rows_affected
    );

    Ok(result.rows_affected)
}

pub async fn find_by_id(db: &DatabaseConnection, id: Id) -> Result<Model, Error> {
    Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(Error::not_found)
}

/// All chunks of a recording ordered by `chunk_number`.
pub async fn find_by_recording_id(
    db: &DatabaseConnection,
    recording_id: Id,
) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::RecordingId.eq(recording_id))
        .order_by_asc(Column::ChunkNumber)
        .all(db)
        .await?)
}
