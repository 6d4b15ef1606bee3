//! Event types for the Folio event system
//!
//! Provides shared event definitions and the EventBus used by the curator
//! service to fan out enrichment and migration progress to observers
//! (SSE clients, loggers). Delivery order equals publish order per receiver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::safety::MigrationVerdict;

/// Folio event types
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission. All events use this central enum for type safety and
/// exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FolioEvent {
    /// An enrichment sweep started
    ///
    /// Triggers:
    /// - SSE: Show background-activity indicator
    SweepStarted {
        /// Number of unenriched books found at sweep start
        pending: usize,
        /// When the sweep started
        timestamp: DateTime<Utc>,
    },

    /// A book was enriched with assistant-derived metadata
    ///
    /// Triggers:
    /// - SSE: Refresh the book's detail view
    BookEnriched {
        /// Book UUID that was enriched
        book_id: Uuid,
        /// When enrichment completed
        timestamp: DateTime<Utc>,
    },

    /// Enrichment of a single book failed; it stays unenriched and will be
    /// retried on a later sweep
    EnrichmentFailed {
        /// Book UUID that failed
        book_id: Uuid,
        /// Failure classification ("network" or "other")
        reason: String,
        /// When the failure was observed
        timestamp: DateTime<Utc>,
    },

    /// An enrichment sweep finished (all pending books attempted)
    SweepCompleted {
        /// Books successfully enriched during the sweep
        enriched: usize,
        /// Books that failed and remain pending
        failed: usize,
        /// When the sweep finished
        timestamp: DateTime<Utc>,
    },

    /// A schema migration run started
    MigrationStarted {
        /// Schema version before the run
        from_version: i32,
        /// Target schema version
        to_version: i32,
        /// When the run started
        timestamp: DateTime<Utc>,
    },

    /// Post-migration validation produced a verdict
    MigrationValidated {
        /// Classified outcome of the count comparison
        verdict: MigrationVerdict,
        /// When validation ran
        timestamp: DateTime<Utc>,
    },
}

impl FolioEvent {
    /// Event type name for SSE `event:` fields
    pub fn event_type(&self) -> &'static str {
        match self {
            FolioEvent::SweepStarted { .. } => "SweepStarted",
            FolioEvent::BookEnriched { .. } => "BookEnriched",
            FolioEvent::EnrichmentFailed { .. } => "EnrichmentFailed",
            FolioEvent::SweepCompleted { .. } => "SweepCompleted",
            FolioEvent::MigrationStarted { .. } => "MigrationStarted",
            FolioEvent::MigrationValidated { .. } => "MigrationValidated",
        }
    }
}

/// Broadcast bus for Folio events
///
/// Thin wrapper over `tokio::sync::broadcast`. Emitting never blocks; when
/// no subscriber is listening the event is dropped silently (background
/// maintenance must not depend on observers).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FolioEvent>,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// `capacity` is the number of events buffered per lagging subscriber
    /// before old events are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<FolioEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the number of subscribers the event reached (zero when
    /// nobody is listening, which is not an error).
    pub fn emit(&self, event: FolioEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
