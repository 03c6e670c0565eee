use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Status of a recording through the consolidation pipeline.
///
/// `Completed` and `Failed` are terminal. Which transitions between the other
/// variants are legal is decided in one place by the domain state machine.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    EnumIter,
    Deserialize,
    Default,
    Serialize,
    DeriveActiveEnum,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "recording_status")]
pub enum RecordingStatus {
    /// Created, not yet picked up by a worker
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,
    /// Asking the camera gateway to export each chunk
    #[sea_orm(string_value = "requesting_chunks")]
    RequestingChunks,
    /// Waiting for the gateway to report every chunk export ready
    #[sea_orm(string_value = "polling")]
    Polling,
    /// Fetching ready chunks into local storage
    #[sea_orm(string_value = "downloading")]
    Downloading,
    /// Merging downloaded chunks into one file
    #[sea_orm(string_value = "consolidating")]
    Consolidating,
    /// Pushing the consolidated file to the archive
    #[sea_orm(string_value = "uploading")]
    Uploading,
    /// Archived and downloadable
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Failed at some stage, see `failed_stage` and `error_message`
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl RecordingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingStatus::Completed | RecordingStatus::Failed)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingStatus::Pending => write!(fmt, "pending"),
            RecordingStatus::RequestingChunks => write!(fmt, "requesting_chunks"),
            RecordingStatus::Polling => write!(fmt, "polling"),
            RecordingStatus::Downloading => write!(fmt, "downloading"),
            RecordingStatus::Consolidating => write!(fmt, "consolidating"),
            RecordingStatus::Uploading => write!(fmt, "uploading"),
            RecordingStatus::Completed => write!(fmt, "completed"),
            RecordingStatus::Failed => write!(fmt, "failed"),
        }
    }
}

impl std::str::FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RecordingStatus::Pending),
            "requesting_chunks" => Ok(RecordingStatus::RequestingChunks),
            "polling" => Ok(RecordingStatus::Polling),
            "downloading" => Ok(RecordingStatus::Downloading),
            "consolidating" => Ok(RecordingStatus::Consolidating),
            "uploading" => Ok(RecordingStatus::Uploading),
            "completed" => Ok(RecordingStatus::Completed),
            "failed" => Ok(RecordingStatus::Failed),
            other => Err(format!("unknown recording status: {other}")),
        }
    }
}
