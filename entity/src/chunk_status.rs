use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Status of one exported camera segment.
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
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "chunk_status")]
pub enum ChunkStatus {
    /// Export asked for, gateway job running
    #[sea_orm(string_value = "requested")]
    #[default]
    Requested,
    /// Export finished, file can be fetched
    #[sea_orm(string_value = "ready")]
    Ready,
    /// Fetched into local storage
    #[sea_orm(string_value = "downloaded")]
    Downloaded,
    /// Gateway reported an unrecoverable export or fetch error
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkStatus::Requested => write!(fmt, "requested"),
            ChunkStatus::Ready => write!(fmt, "ready"),
            ChunkStatus::Downloaded => write!(fmt, "downloaded"),
            ChunkStatus::Failed => write!(fmt, "failed"),
        }
    }
}
