//! stockwell-import - Intelligent Import Service
//!
//! Session-based workflow for ingesting heterogeneous inventory files
//! (spreadsheets, delimited text, scanned documents) into the structured
//! inventory store. Analysis and row extraction are delegated to the
//! content-understanding service; ambiguity is resolved through bounded
//! human clarification rounds; nothing is written without explicit approval.
//!
//! Integrates with the Stockwell UI via HTTP REST + SSE.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use stockwell_common::events::EventBus;

use crate::services::ImportOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Workflow orchestrator
    pub orchestrator: Arc<ImportOrchestrator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, orchestrator: Arc<ImportOrchestrator>) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::import_routes())
        .merge(api::settings_routes())
        .route("/events", get(api::import_event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
