use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use domain::orchestrator::Orchestrator;
use log::*;
use service::config::{ApiVersion, Config};
use tower_http::cors::CorsLayer;

mod controller;
mod error;
pub(crate) mod extractors;
pub(crate) mod params;
mod router;

pub use error::{Error, Result};

/// State shared by every handler: infrastructure from `service` plus the
/// pipeline that owns recordings.
#[derive(Clone)]
pub struct AppState {
    pub service_state: service::AppState,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(service_state: service::AppState, orchestrator: Orchestrator) -> Self {
        Self {
            service_state,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.service_state.config
    }
}

pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let config = app_state.config().clone();
    let host = config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let server_url = format!("{host}:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&server_url).await?;

    info!("Server starting... listening for connections on http://{server_url}");

    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();
    info!("CORS allowed origins: {:?}", config.allowed_origins);

    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
        .allow_headers([
            AUTHORIZATION,
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static(ApiVersion::field_name()),
        ])
        .allow_origin(allowed_origins);

    let router = router::define_routes(app_state).layer(cors_layer);

    axum::serve(listener, router).await
}
