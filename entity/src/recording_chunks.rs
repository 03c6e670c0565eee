//! SeaORM Entity for the recording_chunks table.
//! One row per exported camera segment, ordered by `chunk_number`.

use crate::chunk_status::ChunkStatus;
use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize, ToSchema)]
#[schema(as = entity::recording_chunks::Model)]
#[sea_orm(schema_name = "court_recorder", table_name = "recording_chunks")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    pub recording_id: Id,

    /// 1-based position within the recording, never renumbered
    pub chunk_number: i32,

    /// Export job handle assigned by the camera gateway
    pub task_id: Option<String>,

    pub status: ChunkStatus,

    #[schema(value_type = String, format = DateTime)]
    pub start_time: DateTimeWithTimeZone,

    #[schema(value_type = String, format = DateTime)]
    pub end_time: DateTimeWithTimeZone,

    pub local_path: Option<String>,

    pub file_size_bytes: Option<i64>,

    pub failure_reason: Option<String>,

    #[serde(skip_deserializing)]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,

    #[serde(skip_deserializing)]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recordings::Entity",
        from = "Column::RecordingId",
        to = "super::recordings::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Recordings,
}

impl Related<super::recordings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recordings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
