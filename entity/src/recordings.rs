//! SeaORM Entity for the recordings table.
//! One row per court capture session and its consolidation lifecycle.

use crate::recording_status::RecordingStatus;
use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize, ToSchema)]
#[schema(as = entity::recordings::Model)]
#[sea_orm(schema_name = "court_recorder", table_name = "recordings")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    /// Globally unique identifier used for cross-system references and archive keys
    #[sea_orm(unique)]
    pub external_id: Uuid,

    pub facility_id: Id,

    pub court_id: Id,

    pub booking_id: Option<Id>,

    pub user_id: Option<Id>,

    /// Inclusive start of the captured window
    #[schema(value_type = String, format = DateTime)]
    pub start_time: DateTimeWithTimeZone,

    /// Exclusive end of the captured window
    #[schema(value_type = String, format = DateTime)]
    pub end_time: DateTimeWithTimeZone,

    pub status: RecordingStatus,

    /// Stage the recording was in when it last moved to `failed`
    pub failed_stage: Option<RecordingStatus>,

    pub total_chunks: i32,

    /// Chunks fetched from the camera into local storage
    pub fetched_chunks: i32,

    /// Zero until consolidation completes, then equal to `total_chunks`
    pub consolidated_chunks: i32,

    pub total_duration_seconds: Option<i64>,

    pub total_file_size_bytes: Option<i64>,

    pub retry_count: i32,

    pub max_retries: i32,

    pub error_message: Option<String>,

    /// Set if and only if `status` is `completed`
    pub consolidated_storage_key: Option<String>,

    pub consolidated_storage_bucket: Option<String>,

    pub is_manual_recording: bool,

    #[serde(skip_deserializing)]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,

    #[serde(skip_deserializing)]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTimeWithTimeZone,

    #[schema(value_type = Option<String>, format = DateTime)]
    pub consolidation_started_at: Option<DateTimeWithTimeZone>,

    #[schema(value_type = Option<String>, format = DateTime)]
    pub consolidation_completed_at: Option<DateTimeWithTimeZone>,

    /// When the consolidated file was acknowledged by the archive
    #[schema(value_type = Option<String>, format = DateTime)]
    pub archived_at: Option<DateTimeWithTimeZone>,

    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_retry_at: Option<DateTimeWithTimeZone>,

    #[schema(value_type = Option<String>, format = DateTime)]
    pub notification_sent_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recording_chunks::Entity")]
    RecordingChunks,
}

impl Related<super::recording_chunks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecordingChunks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
