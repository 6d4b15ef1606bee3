//! folio-curator library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use folio_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::EnrichmentOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Enrichment orchestrator; absent when no assistant API key is
    /// configured (enrichment endpoints answer 503)
    pub orchestrator: Option<Arc<EnrichmentOrchestrator>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        orchestrator: Option<Arc<EnrichmentOrchestrator>>,
    ) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::enrichment_routes())
        .merge(api::migration_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
