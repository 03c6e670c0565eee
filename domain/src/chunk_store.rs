//! Per-chunk bookkeeping for a recording.
//!
//! Chunks are numbered once when the plan is created and never renumbered;
//! `chunk_number` order is the only ordering consolidation relies on.

use crate::error::Error;
use crate::recording_store::DbStore;
use async_trait::async_trait;
use entity::chunk_status::ChunkStatus;
use entity::{recording_chunks, recordings, Id};
use entity_api::recording_chunk;

pub use entity_api::recording_chunk::PlannedChunk;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Creates one `requested` row per planned segment.
    async fn create_plan(
        &self,
        recording_id: Id,
        planned: Vec<PlannedChunk>,
    ) -> Result<Vec<recording_chunks::Model>, Error>;

    async fn mark_ready(&self, chunk_id: Id, task_id: &str)
        -> Result<recording_chunks::Model, Error>;

    /// Marks the chunk downloaded and bumps the recording's `fetched_chunks` in
    /// one atomic write, returning both rows as stored afterwards.
    async fn mark_downloaded(
        &self,
        chunk_id: Id,
        local_path: &str,
        file_size_bytes: i64,
    ) -> Result<(recording_chunks::Model, recordings::Model), Error>;

    async fn mark_failed(&self, chunk_id: Id, reason: &str)
        -> Result<recording_chunks::Model, Error>;

    /// Replaces the export job of a `requested` chunk.
    async fn assign_task(&self, chunk_id: Id, task_id: &str)
        -> Result<recording_chunks::Model, Error>;

    /// Moves every failed chunk of the recording back to `status`. Chunks moved
    /// back to `requested` lose their task id.
    async fn reset_failed(&self, recording_id: Id, status: ChunkStatus) -> Result<u64, Error>;

    /// All chunks of the recording ordered by `chunk_number`.
    async fn list_by_recording(
        &self,
        recording_id: Id,
    ) -> Result<Vec<recording_chunks::Model>, Error>;
}

#[async_trait]
impl ChunkStore for DbStore {
    async fn create_plan(
        &self,
        recording_id: Id,
        planned: Vec<PlannedChunk>,
    ) -> Result<Vec<recording_chunks::Model>, Error> {
        Ok(recording_chunk::create_plan(self.conn(), recording_id, planned).await?)
    }

    async fn mark_ready(
        &self,
        chunk_id: Id,
        task_id: &str,
    ) -> Result<recording_chunks::Model, Error> {
        Ok(recording_chunk::mark_ready(self.conn(), chunk_id, task_id).await?)
    }

    async fn mark_downloaded(
        &self,
        chunk_id: Id,
        local_path: &str,
        file_size_bytes: i64,
    ) -> Result<(recording_chunks::Model, recordings::Model), Error> {
        Ok(
            recording_chunk::mark_downloaded(self.conn(), chunk_id, local_path, file_size_bytes)
                .await?,
        )
    }

    async fn mark_failed(
        &self,
        chunk_id: Id,
        reason: &str,
    ) -> Result<recording_chunks::Model, Error> {
        Ok(recording_chunk::mark_failed(self.conn(), chunk_id, reason).await?)
    }

    async fn assign_task(
        &self,
        chunk_id: Id,
        task_id: &str,
    ) -> Result<recording_chunks::Model, Error> {
        Ok(recording_chunk::assign_task(self.conn(), chunk_id, task_id).await?)
    }

    async fn reset_failed(&self, recording_id: Id, status: ChunkStatus) -> Result<u64, Error> {
        Ok(recording_chunk::reset_failed(self.conn(), recording_id, status).await?)
    }

    async fn list_by_recording(
        &self,
        recording_id: Id,
    ) -> Result<Vec<recording_chunks::Model>, Error> {
        Ok(recording_chunk::find_by_recording_id(self.conn(), recording_id).await?)
    }
}
