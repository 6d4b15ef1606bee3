//! Migration status and emergency-reset endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use folio_common::db::flags::FlagStore;
use folio_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use folio_common::db::safety::{MigrationGuard, MAX_RECOVERY_ATTEMPTS};
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

/// Migration status snapshot
#[derive(Debug, Serialize)]
pub struct MigrationStatus {
    /// Schema version currently stored
    pub schema_version: i32,
    /// Schema version this build targets
    pub target_version: i32,
    /// Whether a prior run is marked in-progress but not completed
    pub interrupted: bool,
    /// Recovery attempts consumed so far
    pub recovery_attempts: i64,
    /// Recovery attempts permitted before an emergency reset is required
    pub max_recovery_attempts: i64,
    /// Pre-migration snapshot, if one is stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSummary>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub timestamp: DateTime<Utc>,
    pub books: i64,
    pub notes: i64,
    pub quotes: i64,
}

/// GET /migration/status
pub async fn migration_status(State(state): State<AppState>) -> ApiResult<Json<MigrationStatus>> {
    let guard = MigrationGuard::new(FlagStore::new(state.db.clone()));

    let schema_version = get_schema_version(&state.db).await?;
    let interrupted = guard.is_interrupted().await?;
    let recovery_attempts = guard.recovery_attempts().await?;
    let snapshot = guard.snapshot().await?.map(|s| SnapshotSummary {
        timestamp: s.timestamp,
        books: s.book_count,
        notes: s.note_count,
        quotes: s.quote_count,
    });

    Ok(Json(MigrationStatus {
        schema_version,
        target_version: CURRENT_SCHEMA_VERSION,
        interrupted,
        recovery_attempts,
        max_recovery_attempts: MAX_RECOVERY_ATTEMPTS,
        snapshot,
    }))
}

/// POST /migration/emergency-reset
///
/// Clear migration bookkeeping and the retry counter so the next start
/// attempts the migration afresh. Library records are never touched. This
/// is the manual escape hatch once the automatic retry budget is exhausted.
pub async fn emergency_reset(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let guard = MigrationGuard::new(FlagStore::new(state.db.clone()));
    guard.perform_emergency_reset().await?;

    tracing::warn!("Migration emergency reset requested via API");

    Ok(Json(serde_json::json!({
        "status": "reset",
        "message": "Migration state cleared; restart the service to re-run migrations"
    })))
}

/// Build migration routes
pub fn migration_routes() -> Router<AppState> {
    Router::new()
        .route("/migration/status", get(migration_status))
        .route("/migration/emergency-reset", post(emergency_reset))
}
