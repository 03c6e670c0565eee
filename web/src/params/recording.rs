use chrono::{DateTime, FixedOffset};
use domain::orchestrator::RecordingRequest;
use domain::recording_status::RecordingStatus;
use domain::recording_store::RecordingFilter;
use domain::Id;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct IndexParams {
    pub(crate) status: Option<RecordingStatus>,
    pub(crate) court_id: Option<Id>,
    pub(crate) facility_id: Option<Id>,
    pub(crate) is_manual_recording: Option<bool>,
}

impl From<IndexParams> for RecordingFilter {
    fn from(params: IndexParams) -> Self {
        RecordingFilter {
            status: params.status,
            court_id: params.court_id,
            facility_id: params.facility_id,
            is_manual_recording: params.is_manual_recording,
        }
    }
}

/// Body of `POST /recordings/manual`.
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct ManualParams {
    pub(crate) facility_id: Id,
    pub(crate) court_id: Id,
    #[schema(value_type = String, format = DateTime)]
    pub(crate) start_time: DateTime<FixedOffset>,
    #[schema(value_type = String, format = DateTime)]
    pub(crate) end_time: DateTime<FixedOffset>,
    pub(crate) user_id: Option<Id>,
}

impl From<ManualParams> for RecordingRequest {
    fn from(params: ManualParams) -> Self {
        RecordingRequest {
            facility_id: params.facility_id,
            court_id: params.court_id,
            start_time: params.start_time,
            end_time: params.end_time,
            user_id: params.user_id,
            booking_id: None,
        }
    }
}

/// Body of `POST /recordings`, sent by the booking system at checkout.
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct BookingParams {
    pub(crate) booking_id: Option<Id>,
    pub(crate) facility_id: Id,
    pub(crate) court_id: Id,
    #[schema(value_type = String, format = DateTime)]
    pub(crate) start_time: DateTime<FixedOffset>,
    #[schema(value_type = String, format = DateTime)]
    pub(crate) end_time: DateTime<FixedOffset>,
    pub(crate) user_id: Option<Id>,
}

impl From<BookingParams> for RecordingRequest {
    fn from(params: BookingParams) -> Self {
        RecordingRequest {
            facility_id: params.facility_id,
            court_id: params.court_id,
            start_time: params.start_time,
            end_time: params.end_time,
            user_id: params.user_id,
            booking_id: params.booking_id,
        }
    }
}
