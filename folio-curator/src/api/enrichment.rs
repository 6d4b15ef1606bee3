//! Enrichment trigger and status endpoints

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Response to an enrichment trigger
#[derive(Debug, Serialize)]
pub struct RunResponse {
    /// Whether this request started a sweep (false when one was already
    /// in flight)
    pub sweep_started: bool,
}

/// Enrichment status snapshot
#[derive(Debug, Serialize)]
pub struct EnrichmentStatus {
    /// Total books in the library
    pub total: i64,
    /// Books already enriched
    pub enriched: i64,
    /// Books still awaiting enrichment
    pub pending: i64,
    /// Whether a sweep is currently running
    pub sweep_active: bool,
}

/// POST /enrichment/run
///
/// Trigger an enrichment sweep. Returns 202 immediately; the sweep runs in
/// the background and reports progress over the event stream. Concurrent
/// triggers collapse into the sweep already in flight.
pub async fn run_enrichment(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<RunResponse>)> {
    let orchestrator = state.orchestrator.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("assistant API key is not configured".to_string())
    })?;

    let sweep_started = std::sync::Arc::clone(orchestrator).run_if_needed();

    Ok((StatusCode::ACCEPTED, Json(RunResponse { sweep_started })))
}

/// GET /enrichment/status
pub async fn enrichment_status(
    State(state): State<AppState>,
) -> ApiResult<Json<EnrichmentStatus>> {
    let (total, enriched): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(enriched_at) FROM books",
    )
    .fetch_one(&state.db)
    .await
    .map_err(folio_common::Error::Database)?;

    let sweep_active = state
        .orchestrator
        .as_ref()
        .map(|o| o.sweep_active())
        .unwrap_or(false);

    Ok(Json(EnrichmentStatus {
        total,
        enriched,
        pending: total - enriched,
        sweep_active,
    }))
}

/// Build enrichment routes
pub fn enrichment_routes() -> Router<AppState> {
    Router::new()
        .route("/enrichment/run", post(run_enrichment))
        .route("/enrichment/status", get(enrichment_status))
}
