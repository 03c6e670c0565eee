use crate::controller::ApiResponse;
use crate::extractors::compare_api_version::CompareApiVersion;
use crate::params::recording::{BookingParams, IndexParams, ManualParams};
use crate::{AppState, Error};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use domain::recording as RecordingApi;
use domain::recording::{RecordingDetail, RecordingSummary};
use domain::{recordings, Id};
use log::*;
use service::config::ApiVersion;

/// GET all recordings matching the optional filters, newest first
#[utoipa::path(
    get,
    path = "/recordings",
    params(
        ApiVersion,
        IndexParams,
    ),
    responses(
        (status = 200, description = "Successfully retrieved recordings", body = [RecordingSummary]),
        (status = 400, description = "Bad Request"),
    )
)]
pub async fn index(
    CompareApiVersion(_v): CompareApiVersion,
    State(app_state): State<AppState>,
    Query(params): Query<IndexParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET all recordings");
    debug!("Filter Params: {params:?}");

    let recordings =
        RecordingApi::list(app_state.orchestrator.recording_store(), params.into()).await?;

    debug!("Found {} recordings", recordings.len());

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), recordings)))
}

/// GET a particular recording with its chunks
#[utoipa::path(
    get,
    path = "/recordings/{id}",
    params(
        ApiVersion,
        ("id" = Id, Path, description = "Recording id to retrieve")
    ),
    responses(
        (status = 200, description = "Successfully retrieved the recording", body = RecordingDetail),
        (status = 404, description = "Recording not found"),
    )
)]
pub async fn read(
    CompareApiVersion(_v): CompareApiVersion,
    State(app_state): State<AppState>,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET recording by id: {id}");

    let detail = RecordingApi::detail(
        app_state.orchestrator.recording_store(),
        app_state.orchestrator.chunk_store(),
        id,
    )
    .await?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), detail)))
}

/// POST a recording for a completed booking
#[utoipa::path(
    post,
    path = "/recordings",
    params(ApiVersion),
    request_body = BookingParams,
    responses(
        (status = 201, description = "Recording created and queued", body = recordings::Model),
        (status = 422, description = "Invalid recording window"),
    )
)]
pub async fn create(
    CompareApiVersion(_v): CompareApiVersion,
    State(app_state): State<AppState>,
    Json(params): Json<BookingParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST recording from booking: {params:?}");

    let recording = app_state
        .orchestrator
        .create_from_booking(params.into())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), recording)),
    ))
}

/// POST an operator-initiated recording. The court's camera must be available.
#[utoipa::path(
    post,
    path = "/recordings/manual",
    params(ApiVersion),
    request_body = ManualParams,
    responses(
        (status = 201, description = "Recording created and queued", body = recordings::Model),
        (status = 422, description = "Invalid window or no camera available for the court"),
        (status = 502, description = "Camera gateway unreachable"),
    )
)]
pub async fn create_manual(
    CompareApiVersion(_v): CompareApiVersion,
    State(app_state): State<AppState>,
    Json(params): Json<ManualParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST manual recording: {params:?}");

    let recording = app_state.orchestrator.create_manual(params.into()).await?;

    info!(
        "Manual recording {} created for court {}",
        recording.id, recording.court_id
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), recording)),
    ))
}

/// POST an operator retry of a failed recording
#[utoipa::path(
    post,
    path = "/recordings/{id}/retry",
    params(
        ApiVersion,
        ("id" = Id, Path, description = "Failed recording to retry")
    ),
    responses(
        (status = 200, description = "Recording reopened and queued", body = recordings::Model),
        (status = 404, description = "Recording not found"),
        (status = 409, description = "Recording is not failed or has no retries left"),
    )
)]
pub async fn retry(
    CompareApiVersion(_v): CompareApiVersion,
    State(app_state): State<AppState>,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST retry of recording {id}");

    let recording = app_state.orchestrator.retry(id).await?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), recording)))
}
