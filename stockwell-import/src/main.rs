//! stockwell-import - Intelligent Import Service
//!
//! Session-based ingestion of heterogeneous inventory files into the
//! structured inventory store, with bounded human clarification rounds and
//! an explicit approval gate before anything is written.
//!
//! Integrates with the Stockwell UI via HTTP REST + SSE.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stockwell_common::events::{EventBus, ImportEvent};

use stockwell_import::config::{resolve_reasoning_api_key, ServiceEndpoints};
use stockwell_import::db::SessionStore;
use stockwell_import::services::{
    HttpInventoryClient, HttpObjectStoreClient, HttpPatternMemoryClient, HttpReasoningClient,
    ImportOrchestrator, OrchestratorConfig,
};
use stockwell_import::AppState;

const LISTEN_ADDR: &str = "127.0.0.1:9510";

/// Interval between TTL sweeps of expired sessions
const CLEANUP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting stockwell-import (Intelligent Import) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve root folder and open the database
    let toml_config = stockwell_common::config::load_toml_config();
    let root_folder = stockwell_common::config::resolve_root_folder(&toml_config);
    let db_path = stockwell_common::config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Database: {}", db_path.display());

    let db_pool = stockwell_import::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // External service configuration
    let endpoints = ServiceEndpoints::resolve(&toml_config);
    let api_key = resolve_reasoning_api_key(&db_pool, &toml_config)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let reasoning = Arc::new(HttpReasoningClient::new(
        endpoints.reasoning_base_url.clone(),
        api_key,
    )?);
    let objects = Arc::new(HttpObjectStoreClient::new(
        endpoints.object_store_base_url.clone(),
    )?);
    let inventory = Arc::new(HttpInventoryClient::new(
        endpoints.inventory_base_url.clone(),
    )?);
    let memory = Arc::new(HttpPatternMemoryClient::new(
        endpoints.pattern_memory_base_url.clone(),
    )?);
    info!(
        reasoning = %endpoints.reasoning_base_url,
        object_store = %endpoints.object_store_base_url,
        inventory = %endpoints.inventory_base_url,
        pattern_memory = %endpoints.pattern_memory_base_url,
        "External services configured"
    );

    let event_bus = EventBus::new(100);
    let store = SessionStore::new(db_pool.clone());

    // Sessions orphaned by a previous run cannot resume mid-flight
    let stale = store.fail_stale_on_startup().await?;
    if stale > 0 {
        info!(count = stale, "Stale sessions marked failed at startup");
    }

    let orchestrator = Arc::new(ImportOrchestrator::new(
        store.clone(),
        reasoning,
        objects,
        inventory,
        memory,
        event_bus.clone(),
        OrchestratorConfig::default(),
    ));

    // Periodic TTL sweep of expired sessions
    let sweep_store = store.clone();
    let sweep_bus = event_bus.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match sweep_store.cleanup_expired().await {
                Ok(removed) if removed > 0 => {
                    sweep_bus.emit(ImportEvent::SessionsExpired {
                        removed,
                        timestamp: chrono::Utc::now(),
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "TTL sweep failed"),
            }
        }
    });

    let state = AppState::new(db_pool, event_bus, orchestrator);
    let app = stockwell_import::build_router(state);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR).await?;
    info!("Listening on http://{}", LISTEN_ADDR);
    info!("Health check: http://{}/health", LISTEN_ADDR);

    axum::serve(listener, app).await?;

    Ok(())
}
