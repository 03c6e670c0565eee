use crate::controller::ApiResponse;
use crate::extractors::compare_api_version::CompareApiVersion;
use crate::{AppState, Error};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use domain::gateway::CameraAvailability;
use domain::Id;
use log::*;
use service::config::ApiVersion;

/// GET whether the camera covering a court can export footage
#[utoipa::path(
    get,
    path = "/cameras/{court_id}/availability",
    params(
        ApiVersion,
        ("court_id" = Id, Path, description = "Court to check"),
    ),
    responses(
        (status = 200, description = "Camera availability for the court", body = CameraAvailability),
        (status = 502, description = "Camera gateway unreachable"),
    )
)]
pub async fn availability(
    CompareApiVersion(_v): CompareApiVersion,
    State(app_state): State<AppState>,
    Path(court_id): Path<Id>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET camera availability for court {court_id}");

    let availability = app_state.orchestrator.camera_availability(court_id).await?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), availability)))
}
