//! Legal lifecycle moves for a recording.
//!
//! Every status change made by the pipeline goes through [`transition`], so the
//! table in [`can_transition`] is the single place that decides which
//! `(from, to)` pairs exist.

use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use entity::recording_status::RecordingStatus;
use entity::recordings;
use log::*;

/// Returns whether a recording may move from `from` to `to`.
pub fn can_transition(from: RecordingStatus, to: RecordingStatus) -> bool {
    use RecordingStatus::*;

    match (from, to) {
        (Pending, RequestingChunks)
        | (RequestingChunks, Polling)
        | (Polling, Downloading)
        | (Downloading, Consolidating)
        | (Consolidating, Uploading)
        | (Uploading, Completed) => true,
        // The consolidated file did not survive a restart and nothing is archived yet
        (Uploading, Consolidating) => true,
        // Operator retry resumes at the stage that failed
        (Failed, RequestingChunks | Polling | Downloading | Consolidating | Uploading) => true,
        (from, Failed) => !from.is_terminal(),
        _ => false,
    }
}

/// Moves `recording` to `to`, refusing any pair not allowed by [`can_transition`].
pub fn transition(recording: &mut recordings::Model, to: RecordingStatus) -> Result<(), Error> {
    let from = recording.status;
    if !can_transition(from, to) {
        warn!(
            "Refusing transition of recording {} from {from} to {to}",
            recording.id
        );
        return Err(Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::InvalidTransition { from, to }),
        });
    }

    info!("Recording {}: {from} -> {to}", recording.id);
    recording.status = to;
    Ok(())
}

/// The stage an operator retry resumes at, given where the recording failed.
pub fn resume_stage(failed_stage: Option<RecordingStatus>) -> RecordingStatus {
    match failed_stage {
        Some(
            stage @ (RecordingStatus::RequestingChunks
            | RecordingStatus::Polling
            | RecordingStatus::Downloading
            | RecordingStatus::Consolidating
            | RecordingStatus::Uploading),
        ) => stage,
        _ => RecordingStatus::RequestingChunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;
    use RecordingStatus::*;

    #[test]
    fn happy_path_is_strictly_sequential() {
        let path = [
            Pending,
            RequestingChunks,
            Polling,
            Downloading,
            Consolidating,
            Uploading,
            Completed,
        ];

        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!can_transition(Pending, Polling));
        assert!(!can_transition(Downloading, Uploading));
        assert!(!can_transition(Polling, RequestingChunks));
        assert!(!can_transition(Consolidating, Downloading));
    }

    #[test]
    fn upload_may_step_back_to_consolidation_only() {
        assert!(can_transition(Uploading, Consolidating));
        assert!(!can_transition(Uploading, Downloading));
        assert!(!can_transition(Completed, Consolidating));
    }

    #[test]
    fn every_non_terminal_status_can_fail() {
        for status in RecordingStatus::iter().filter(|s| !s.is_terminal()) {
            assert!(can_transition(status, Failed), "{status} -> failed");
        }
    }

    #[test]
    fn terminal_statuses_have_no_automatic_exits() {
        for to in RecordingStatus::iter() {
            assert!(!can_transition(Completed, to), "completed -> {to}");
        }
        assert!(!can_transition(Failed, Failed));
        assert!(!can_transition(Failed, Completed));
        assert!(!can_transition(Failed, Pending));
    }

    #[test]
    fn resume_stage_maps_pending_and_unknown_to_requesting_chunks() {
        assert_eq!(resume_stage(None), RequestingChunks);
        assert_eq!(resume_stage(Some(Pending)), RequestingChunks);
        assert_eq!(resume_stage(Some(Downloading)), Downloading);
        assert_eq!(resume_stage(Some(Uploading)), Uploading);
    }
}
