use domain::archive::OpendalArchive;
use domain::gateway::nvr_http::{NvrGatewaySettings, NvrHttpGateway};
use domain::orchestrator::{Collaborators, Orchestrator, PipelineSettings};
use domain::recording_store::DbStore;
use events::{EventPublisher, LoggingEventHandler};
use log::*;
use service::{config::Config, logging::Logger, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();

    Logger::init_logger(&config as &Config);

    info!(
        "Starting court_recorder in {} mode",
        config.runtime_env()
    );

    let db = match service::init_database(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    let gateway = match NvrHttpGateway::new(NvrGatewaySettings::from_config(&config)) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to build camera gateway client: {e}");
            std::process::exit(1);
        }
    };

    let archive = match OpendalArchive::from_config(&config) {
        Ok(archive) => archive,
        Err(e) => {
            error!("Failed to configure the recording archive: {e}");
            std::process::exit(1);
        }
    };

    let store = Arc::new(DbStore::new(Arc::clone(&db)));
    let events = EventPublisher::new().with_handler(Arc::new(LoggingEventHandler));

    let orchestrator = Orchestrator::new(
        Collaborators {
            recordings: store.clone(),
            chunks: store,
            gateway: Arc::new(gateway),
            archive: Arc::new(archive),
            events,
        },
        PipelineSettings::from_config(&config),
    );

    if orchestrator.spawn_workers().is_none() {
        error!("Recording workers were already started");
        std::process::exit(1);
    }
    match orchestrator.resume_unfinished().await {
        Ok(count) => info!("Resumed {count} unfinished recordings"),
        Err(e) => warn!("Failed to load unfinished recordings, the periodic scan will retry: {e}"),
    }
    orchestrator.spawn_scanner();

    let app_state = web::AppState::new(AppState::new(config, &db), orchestrator);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
