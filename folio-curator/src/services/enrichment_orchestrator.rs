//! Enrichment orchestrator
//!
//! Decides when an enrichment sweep runs and paces it. At most one sweep is
//! active per process; a sweep walks every unenriched record in discovery
//! order, handing each to the worker with a throttle delay between
//! consecutive records so the assistant service is never hammered.

use folio_common::db::flags::FlagStore;
use folio_common::db::models::fetch_unenriched_books;
use folio_common::events::{EventBus, FolioEvent};
use folio_common::Result;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::enrichment_worker::EnrichmentWorker;

/// Settings key for the inter-record delay, in seconds
pub const THROTTLE_SETTING_KEY: &str = "enrichment_throttle_seconds";

const DEFAULT_THROTTLE_SECONDS: i64 = 5;

/// Enrichment orchestrator
///
/// One instance per process. Sweeps run on a spawned task; callers get an
/// immediate answer to "did this trigger a sweep" and observe progress via
/// the event bus.
pub struct EnrichmentOrchestrator {
    db: SqlitePool,
    worker: EnrichmentWorker,
    event_bus: EventBus,
    throttle: Duration,
    sweep_active: AtomicBool,
}

impl EnrichmentOrchestrator {
    pub fn new(
        db: SqlitePool,
        worker: EnrichmentWorker,
        event_bus: EventBus,
        throttle: Duration,
    ) -> Self {
        Self {
            db,
            worker,
            event_bus,
            throttle,
            sweep_active: AtomicBool::new(false),
        }
    }

    /// Construct with the throttle read from the settings table
    pub async fn from_settings(
        db: SqlitePool,
        worker: EnrichmentWorker,
        event_bus: EventBus,
    ) -> Result<Self> {
        let flags = FlagStore::new(db.clone());
        let secs = flags
            .get_i64_or(THROTTLE_SETTING_KEY, DEFAULT_THROTTLE_SECONDS)
            .await?;
        let throttle = Duration::from_secs(secs.max(0) as u64);
        Ok(Self::new(db, worker, event_bus, throttle))
    }

    /// Whether a sweep is currently running
    pub fn sweep_active(&self) -> bool {
        self.sweep_active.load(Ordering::SeqCst)
    }

    /// Trigger a sweep unless one is already running
    ///
    /// Returns true when this call started a sweep. The sweep itself runs
    /// on a spawned task; overlapping triggers collapse into the sweep
    /// already in flight.
    pub fn run_if_needed(self: Arc<Self>) -> bool {
        if self.sweep_active.swap(true, Ordering::SeqCst) {
            tracing::debug!("Enrichment sweep already active - trigger ignored");
            return false;
        }

        let orchestrator = self;
        tokio::spawn(async move {
            orchestrator.run_sweep().await;
            orchestrator.sweep_active.store(false, Ordering::SeqCst);
        });

        true
    }

    /// Walk every unenriched record once, in discovery order
    ///
    /// Records that fail stay unenriched; the sweep continues past them.
    /// The throttle delay runs between consecutive records, not after the
    /// last one.
    async fn run_sweep(&self) {
        let books = match fetch_unenriched_books(&self.db).await {
            Ok(books) => books,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query unenriched records; sweep aborted");
                return;
            }
        };

        if books.is_empty() {
            tracing::debug!("No unenriched records - nothing to sweep");
            return;
        }

        let total = books.len();
        tracing::info!(pending = total, throttle_secs = self.throttle.as_secs(), "Enrichment sweep started");
        self.event_bus.emit(FolioEvent::SweepStarted {
            pending: total,
            timestamp: chrono::Utc::now(),
        });

        let mut enriched = 0usize;
        let mut failed = 0usize;

        for (index, book) in books.iter().enumerate() {
            if self.worker.enrich(book).await {
                enriched += 1;
            } else {
                failed += 1;
            }

            if index + 1 < total {
                tokio::time::sleep(self.throttle).await;
            }
        }

        tracing::info!(enriched, failed, "Enrichment sweep completed");
        self.event_bus.emit(FolioEvent::SweepCompleted {
            enriched,
            failed,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use folio_common::db::init::init_schema;
    use folio_common::db::models::{fetch_unenriched_books, insert_book};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::AtomicUsize;

    use crate::services::assistant_client::{AnswerSource, AssistantError};

    const ANSWER: &str = r#"{
        "synopsis": "s", "themes": ["t"], "characters": ["c"],
        "setting": "se", "tone": ["to"], "style": "st",
        "seriesName": null, "seriesOrder": null, "totalBooksInSeries": null
    }"#;

    struct CountingAssistant {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnswerSource for CountingAssistant {
        async fn ask(&self, _prompt: &str) -> std::result::Result<String, AssistantError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ANSWER.to_string())
        }
    }

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    async fn make_orchestrator(
        pool: &SqlitePool,
        throttle: Duration,
    ) -> (Arc<EnrichmentOrchestrator>, Arc<CountingAssistant>) {
        let assistant = Arc::new(CountingAssistant {
            calls: AtomicUsize::new(0),
        });
        let bus = EventBus::new(64);
        let worker = EnrichmentWorker::new(pool.clone(), assistant.clone(), bus.clone());
        let orchestrator = Arc::new(EnrichmentOrchestrator::new(
            pool.clone(),
            worker,
            bus,
            throttle,
        ));
        (orchestrator, assistant)
    }

    #[tokio::test]
    async fn test_sweep_enriches_every_pending_record() {
        let pool = setup_pool().await;
        insert_book(&pool, "A", "a").await.unwrap();
        insert_book(&pool, "B", "b").await.unwrap();
        insert_book(&pool, "C", "c").await.unwrap();

        let (orchestrator, assistant) = make_orchestrator(&pool, Duration::ZERO).await;
        assert!(orchestrator.clone().run_if_needed());

        while orchestrator.sweep_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(assistant.calls.load(Ordering::SeqCst), 3);
        assert!(fetch_unenriched_books(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_trigger_during_sweep_is_ignored() {
        let pool = setup_pool().await;
        insert_book(&pool, "A", "a").await.unwrap();
        insert_book(&pool, "B", "b").await.unwrap();

        // Throttle long enough that the sweep is still running when the
        // second trigger lands
        let (orchestrator, _) = make_orchestrator(&pool, Duration::from_millis(200)).await;

        assert!(orchestrator.clone().run_if_needed());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(orchestrator.sweep_active());
        assert!(!orchestrator.clone().run_if_needed());

        while orchestrator.sweep_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Once the sweep finishes the trigger works again (no pending
        // records, so the sweep is an immediate no-op)
        assert!(orchestrator.clone().run_if_needed());
    }

    #[tokio::test]
    async fn test_empty_library_sweep_is_a_noop() {
        let pool = setup_pool().await;
        let (orchestrator, assistant) = make_orchestrator(&pool, Duration::ZERO).await;

        let mut bus_rx = orchestrator.event_bus.subscribe();
        assert!(orchestrator.clone().run_if_needed());
        while orchestrator.sweep_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(assistant.calls.load(Ordering::SeqCst), 0);
        // No SweepStarted event for an empty sweep
        assert!(bus_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_throttle_delay_runs_between_records_not_after_last() {
        let pool = setup_pool().await;
        insert_book(&pool, "A", "a").await.unwrap();
        insert_book(&pool, "B", "b").await.unwrap();
        insert_book(&pool, "C", "c").await.unwrap();

        let throttle = Duration::from_millis(100);
        let (orchestrator, _) = make_orchestrator(&pool, throttle).await;

        let start = std::time::Instant::now();
        assert!(orchestrator.clone().run_if_needed());
        while orchestrator.sweep_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let elapsed = start.elapsed();

        // Three records, two inter-record delays
        assert!(
            elapsed >= Duration::from_millis(200),
            "sweep finished too fast: {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_millis(290),
            "sweep took a third delay: {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_from_settings_reads_throttle() {
        let pool = setup_pool().await;
        let flags = FlagStore::new(pool.clone());
        flags.set_i64(THROTTLE_SETTING_KEY, 0).await.unwrap();

        let assistant = Arc::new(CountingAssistant {
            calls: AtomicUsize::new(0),
        });
        let bus = EventBus::new(16);
        let worker = EnrichmentWorker::new(pool.clone(), assistant, bus.clone());
        let orchestrator = EnrichmentOrchestrator::from_settings(pool, worker, bus)
            .await
            .unwrap();
        assert_eq!(orchestrator.throttle, Duration::ZERO);
    }
}
