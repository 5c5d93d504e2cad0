/// MyWebLog logbook bridge: polls the club logbook and serves sensor readings
mod clients;
mod config;
mod coordinator;
mod domain;
mod errors;
mod flow;
mod handlers;
mod repo;
mod routes;
mod sensors;
mod services;
mod utils;

use crate::clients::MyWebLogClient;
use crate::config::AppConfig;
use crate::flow::{ConfigFlow, FlowManager};
use crate::handlers::AppState;
use crate::repo::EntryStore;
use crate::routes::build_router;
use crate::services::{CredentialValidator, Supervisor};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("myweblog_bridge=info")),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env();
    info!("Configuration loaded successfully");
    if config.client.app_secret.is_empty() {
        info!("MYWEBLOG_APP_SECRET is not set, app token exchange will be sent without a secret");
    }

    // Configuration entry
    let store = Arc::new(EntryStore::open(&config.entry_path).await?);
    info!("Entry store at {}", store.path().display());

    // Remote client and services
    let connector = Arc::new(MyWebLogClient::new(&config.client)?);
    let validator = CredentialValidator::new(connector.clone(), config.client.app_secret.clone());
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        connector,
        config.intervals,
        config.setup_retry,
    );
    let flows = Arc::new(FlowManager::new(ConfigFlow::new(
        validator,
        store,
        supervisor.reload_handle(),
    )));

    // Start background supervision
    let supervision = supervisor.start();
    info!(
        "Polling objects every {}s, bookings every {}s",
        config.intervals.objects.as_secs(),
        config.intervals.bookings.as_secs()
    );

    // Build router
    let app = build_router(AppState {
        supervisor: Arc::clone(&supervisor),
        flows,
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("myweblog_bridge listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervision.abort();
    supervisor.teardown().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {:?}", e);
        std::future::pending::<()>().await;
    }
}
