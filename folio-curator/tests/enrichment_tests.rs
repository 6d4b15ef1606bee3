//! Integration tests for the enrichment pipeline
//!
//! Drives the orchestrator and worker against an in-memory database with a
//! scripted answer source standing in for the assistant service.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use folio_common::db::init::init_schema;
use folio_common::db::models::{fetch_all_books, fetch_unenriched_books, insert_book};
use folio_common::events::{EventBus, FolioEvent};
use folio_curator::services::{
    AnswerSource, AssistantError, EnrichmentOrchestrator, EnrichmentWorker,
};
use sqlx::SqlitePool;

const GOOD_ANSWER: &str = r#"Certainly! Here is the analysis:
{
    "synopsis": "A quiet meditation on exile.",
    "themes": ["exile", "belonging"],
    "characters": ["The narrator"],
    "setting": "A nameless coastal town",
    "tone": ["melancholic"],
    "style": "Spare and precise",
    "seriesName": null,
    "seriesOrder": null,
    "totalBooksInSeries": null
}"#;

/// Scripted answer source: fails the first `failures` calls, then answers
struct ScriptedAssistant {
    failures: usize,
    calls: AtomicUsize,
}

impl ScriptedAssistant {
    fn reliable() -> Self {
        Self {
            failures: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerSource for ScriptedAssistant {
    async fn ask(&self, _prompt: &str) -> Result<String, AssistantError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(AssistantError::Network("connection reset".to_string()))
        } else {
            Ok(GOOD_ANSWER.to_string())
        }
    }
}

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

fn build_pipeline(
    pool: &SqlitePool,
    assistant: Arc<ScriptedAssistant>,
    throttle: Duration,
) -> (Arc<EnrichmentOrchestrator>, EventBus) {
    let bus = EventBus::new(128);
    let worker = EnrichmentWorker::new(pool.clone(), assistant, bus.clone());
    let orchestrator = Arc::new(EnrichmentOrchestrator::new(
        pool.clone(),
        worker,
        bus.clone(),
        throttle,
    ));
    (orchestrator, bus)
}

async fn wait_for_sweep(orchestrator: &Arc<EnrichmentOrchestrator>) {
    while orchestrator.sweep_active() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_sweep_enriches_library_and_emits_events() {
    let pool = setup_pool().await;
    insert_book(&pool, "First", "Author A").await.unwrap();
    insert_book(&pool, "Second", "Author B").await.unwrap();

    let assistant = Arc::new(ScriptedAssistant::reliable());
    let (orchestrator, bus) = build_pipeline(&pool, assistant.clone(), Duration::ZERO);
    let mut rx = bus.subscribe();

    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;

    assert_eq!(assistant.call_count(), 2);
    assert!(fetch_unenriched_books(&pool).await.unwrap().is_empty());

    // SweepStarted, two BookEnriched, SweepCompleted, in publish order
    match rx.recv().await.unwrap() {
        FolioEvent::SweepStarted { pending, .. } => assert_eq!(pending, 2),
        other => panic!("expected SweepStarted, got {:?}", other),
    }
    assert!(matches!(
        rx.recv().await.unwrap(),
        FolioEvent::BookEnriched { .. }
    ));
    assert!(matches!(
        rx.recv().await.unwrap(),
        FolioEvent::BookEnriched { .. }
    ));
    match rx.recv().await.unwrap() {
        FolioEvent::SweepCompleted { enriched, failed, .. } => {
            assert_eq!(enriched, 2);
            assert_eq!(failed, 0);
        }
        other => panic!("expected SweepCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_sweep_skips_enriched_records() {
    let pool = setup_pool().await;
    insert_book(&pool, "Only", "Author").await.unwrap();

    let assistant = Arc::new(ScriptedAssistant::reliable());
    let (orchestrator, _bus) = build_pipeline(&pool, assistant.clone(), Duration::ZERO);

    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;
    assert_eq!(assistant.call_count(), 1);

    // A fresh sweep finds nothing pending and never calls the assistant
    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;
    assert_eq!(assistant.call_count(), 1);
}

#[tokio::test]
async fn test_failed_record_is_retried_on_next_sweep() {
    let pool = setup_pool().await;
    insert_book(&pool, "Flaky", "Author").await.unwrap();

    // First call fails, second succeeds
    let assistant = Arc::new(ScriptedAssistant::failing_first(1));
    let (orchestrator, bus) = build_pipeline(&pool, assistant.clone(), Duration::ZERO);
    let mut rx = bus.subscribe();

    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;

    // Record survived the failure untouched
    let books = fetch_all_books(&pool).await.unwrap();
    assert_eq!(books.len(), 1);
    assert!(!books[0].is_enriched());

    // Skip SweepStarted, then the failure carries its classification
    rx.recv().await.unwrap();
    match rx.recv().await.unwrap() {
        FolioEvent::EnrichmentFailed { reason, .. } => assert_eq!(reason, "network"),
        other => panic!("expected EnrichmentFailed, got {:?}", other),
    }

    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;

    assert_eq!(assistant.call_count(), 2);
    assert!(fetch_unenriched_books(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failures_do_not_stop_the_sweep() {
    let pool = setup_pool().await;
    insert_book(&pool, "Fails", "Author").await.unwrap();
    insert_book(&pool, "Succeeds", "Author").await.unwrap();

    let assistant = Arc::new(ScriptedAssistant::failing_first(1));
    let (orchestrator, bus) = build_pipeline(&pool, assistant.clone(), Duration::ZERO);
    let mut rx = bus.subscribe();

    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;

    assert_eq!(assistant.call_count(), 2);
    assert_eq!(fetch_unenriched_books(&pool).await.unwrap().len(), 1);

    // Drain to SweepCompleted and check the tallies
    loop {
        match rx.recv().await.unwrap() {
            FolioEvent::SweepCompleted { enriched, failed, .. } => {
                assert_eq!(enriched, 1);
                assert_eq!(failed, 1);
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_concurrent_triggers_run_one_sweep() {
    let pool = setup_pool().await;
    insert_book(&pool, "A", "a").await.unwrap();
    insert_book(&pool, "B", "b").await.unwrap();

    let assistant = Arc::new(ScriptedAssistant::reliable());
    let (orchestrator, _bus) = build_pipeline(&pool, assistant.clone(), Duration::from_millis(100));

    let mut started = 0;
    for _ in 0..5 {
        if orchestrator.clone().run_if_needed() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    wait_for_sweep(&orchestrator).await;

    // Each record asked exactly once despite five triggers
    assert_eq!(assistant.call_count(), 2);
}

#[tokio::test]
async fn test_throttle_paces_consecutive_records() {
    let pool = setup_pool().await;
    insert_book(&pool, "A", "a").await.unwrap();
    insert_book(&pool, "B", "b").await.unwrap();
    insert_book(&pool, "C", "c").await.unwrap();
    insert_book(&pool, "D", "d").await.unwrap();

    let assistant = Arc::new(ScriptedAssistant::reliable());
    let (orchestrator, _bus) = build_pipeline(&pool, assistant, Duration::from_millis(50));

    let start = std::time::Instant::now();
    assert!(orchestrator.clone().run_if_needed());
    wait_for_sweep(&orchestrator).await;
    let elapsed = start.elapsed();

    // Four records, three inter-record delays; no delay after the last
    assert!(
        elapsed >= Duration::from_millis(150),
        "sweep finished too fast: {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_millis(290),
        "sweep appears to delay after the final record: {:?}",
        elapsed
    );
}
