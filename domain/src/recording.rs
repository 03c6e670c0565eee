//! Read-side views of recordings for operators.

use crate::chunk_store::ChunkStore;
use crate::error::Error;
use crate::recording_store::{RecordingFilter, RecordingStore};
use entity::{recording_chunks, recordings, Id};
use serde::Serialize;
use utoipa::ToSchema;

/// Chunk and consolidation progress derived from the stored counters.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecordingProgress {
    pub fetched_chunks: i32,
    pub total_chunks: i32,
    /// 0 to 100.
    pub fetch_percent: f64,
    pub consolidated_chunks: i32,
    /// 0 to 100.
    pub consolidation_percent: f64,
}

impl RecordingProgress {
    pub fn of(recording: &recordings::Model) -> Self {
        Self {
            fetched_chunks: recording.fetched_chunks,
            total_chunks: recording.total_chunks,
            fetch_percent: percent(recording.fetched_chunks, recording.total_chunks),
            consolidated_chunks: recording.consolidated_chunks,
            consolidation_percent: percent(recording.consolidated_chunks, recording.total_chunks),
        }
    }
}

fn percent(done: i32, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (f64::from(done.clamp(0, total)) * 100.0 / f64::from(total) * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecordingSummary {
    #[serde(flatten)]
    pub recording: recordings::Model,
    pub progress: RecordingProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecordingDetail {
    #[serde(flatten)]
    pub recording: recordings::Model,
    pub progress: RecordingProgress,
    /// Ordered by `chunk_number`.
    pub chunks: Vec<recording_chunks::Model>,
}

/// Recordings matching `filter`, newest first, each with its progress.
pub async fn list(
    recordings: &dyn RecordingStore,
    filter: RecordingFilter,
) -> Result<Vec<RecordingSummary>, Error> {
    Ok(recordings
        .list(filter)
        .await?
        .into_iter()
        .map(|recording| RecordingSummary {
            progress: RecordingProgress::of(&recording),
            recording,
        })
        .collect())
}

/// One recording with its chunks.
///
/// The recording row is read before the chunks. Counters are only bumped in
/// the same write that marks a chunk downloaded, so the returned counters
/// never run ahead of the chunk rows.
pub async fn detail(
    recordings: &dyn RecordingStore,
    chunks: &dyn ChunkStore,
    id: Id,
) -> Result<RecordingDetail, Error> {
    let recording = recordings.find(id).await?;
    let chunks = chunks.list_by_recording(id).await?;

    Ok(RecordingDetail {
        progress: RecordingProgress::of(&recording),
        recording,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_empty_plans_and_rounds_to_one_decimal() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 3), 33.3);
        assert_eq!(percent(3, 3), 100.0);
        assert_eq!(percent(5, 3), 100.0);
    }
}
