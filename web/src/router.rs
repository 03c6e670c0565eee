use crate::{controller::health_check_controller, params, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::controller::{camera_controller, recording_controller};

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Court Recorder API"
        ),
        paths(
            health_check_controller::health_check,
            recording_controller::index,
            recording_controller::read,
            recording_controller::create,
            recording_controller::create_manual,
            recording_controller::retry,
            camera_controller::availability,
        ),
        components(
            schemas(
                domain::recordings::Model,
                domain::recording_chunks::Model,
                domain::recording_status::RecordingStatus,
                domain::chunk_status::ChunkStatus,
                domain::recording::RecordingProgress,
                domain::recording::RecordingSummary,
                domain::recording::RecordingDetail,
                domain::gateway::CameraAvailability,
                params::recording::ManualParams,
                params::recording::BookingParams,
            )
        ),
        tags(
            (name = "court_recorder", description = "Court recording consolidation API")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(recording_routes(app_state.clone()))
        .merge(camera_routes(app_state))
        .merge(RapiDoc::with_openapi("/api-docs/openapi2.json", ApiDoc::openapi()).path("/rapidoc"))
        .layer(TraceLayer::new_for_http())
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn recording_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/recordings", get(recording_controller::index))
        .route("/recordings", post(recording_controller::create))
        .route("/recordings/manual", post(recording_controller::create_manual))
        .route("/recordings/:id", get(recording_controller::read))
        .route("/recordings/:id/retry", post(recording_controller::retry))
        .with_state(app_state)
}

fn camera_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/cameras/:court_id/availability",
            get(camera_controller::availability),
        )
        .with_state(app_state)
}
