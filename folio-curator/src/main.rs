//! folio-curator - Library Maintenance Service
//!
//! Background curator for a personal book library: runs guarded schema
//! migrations at startup, then enriches unenriched books with
//! assistant-derived literary metadata and exposes a small HTTP surface
//! (trigger, status, SSE progress stream) on port 5730.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use folio_common::db::flags::FlagStore;
use folio_common::db::migrations::run_guarded_migrations;
use folio_common::db::safety::MigrationVerdict;
use folio_common::events::EventBus;
use folio_curator::services::{
    AssistantClient, EnrichmentOrchestrator, EnrichmentWorker,
};
use folio_curator::AppState;

const LISTEN_ADDR: &str = "127.0.0.1:5730";
const API_KEY_ENV: &str = "FOLIO_ASSISTANT_API_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting folio-curator (Library Maintenance) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve the library folder and open the database
    let library_folder = folio_common::config::resolve_library_folder("FOLIO_LIBRARY_FOLDER");
    let db_path = folio_common::config::prepare_library_folder(&library_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize library folder: {}", e))?;
    info!("Database: {}", db_path.display());

    let db_pool = folio_common::db::init::init_database(&db_path).await?;
    info!("Database connection established");

    let flags = FlagStore::new(db_pool.clone());

    // Event bus for SSE broadcasting; capacity is a settings-table tunable
    let capacity = flags.get_i64_or("event_bus_capacity", 100).await?.max(1) as usize;
    let event_bus = EventBus::new(capacity);

    // Step 2: Run schema migrations inside the safety net
    match run_guarded_migrations(&db_pool, &flags, &event_bus).await? {
        Some(MigrationVerdict::Success) => info!("Schema migrations validated"),
        Some(MigrationVerdict::DataLoss {
            expected_books,
            found_books,
            ..
        }) => {
            anyhow::bail!(
                "migration validation detected missing records \
                 (books: expected {}, found {}); refusing to start",
                expected_books,
                found_books
            );
        }
        Some(MigrationVerdict::NoBackupAvailable) => {
            warn!("Migration ran without a pre-migration snapshot; counts unverified");
        }
        Some(MigrationVerdict::ValidationError { cause }) => {
            warn!(cause = %cause, "Migration count validation failed to run; counts unverified");
        }
        None => info!("Database schema is current"),
    }

    // Step 3: Construct the enrichment pipeline, if an API key is present
    let orchestrator = match std::env::var(API_KEY_ENV) {
        Ok(api_key) if !api_key.trim().is_empty() => {
            let base_url = flags
                .get("assistant_base_url")
                .await?
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            let model = flags
                .get("assistant_model")
                .await?
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            let timeout_secs = flags.get_i64_or("assistant_timeout_seconds", 30).await?.max(1) as u64;

            let client = AssistantClient::new(base_url, api_key, model, timeout_secs)
                .map_err(|e| anyhow::anyhow!("Failed to build assistant client: {}", e))?;
            let worker =
                EnrichmentWorker::new(db_pool.clone(), Arc::new(client), event_bus.clone());
            let orchestrator = Arc::new(
                EnrichmentOrchestrator::from_settings(
                    db_pool.clone(),
                    worker,
                    event_bus.clone(),
                )
                .await?,
            );
            info!("Enrichment enabled");
            Some(orchestrator)
        }
        _ => {
            warn!(
                "{} not set - enrichment disabled, serving status endpoints only",
                API_KEY_ENV
            );
            None
        }
    };

    // Step 4: Kick off an initial sweep for anything left pending
    if let Some(orchestrator) = &orchestrator {
        if Arc::clone(orchestrator).run_if_needed() {
            info!("Initial enrichment sweep triggered");
        }
    }

    // Step 5: Serve the API
    let state = AppState::new(db_pool, event_bus, orchestrator);
    let app = folio_curator::build_router(state);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR).await?;
    info!("Listening on http://{}", LISTEN_ADDR);
    info!("Health check: http://{}/health", LISTEN_ADDR);

    axum::serve(listener, app).await?;

    Ok(())
}
