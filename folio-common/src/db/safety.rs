//! Migration safety net
//!
//! Schema migrations rewrite stored record shapes and risk silent record
//! loss when a transformation step is skipped or a run is interrupted by a
//! crash. The guard snapshots record counts before a migration, bounds
//! retry attempts for interrupted runs, and validates post-migration counts
//! against the snapshot. It understands nothing about the migration's
//! internal transformation logic; the count comparison is the whole check.
//!
//! All guard state lives in the durable flag store so it survives process
//! restarts.

use crate::db::flags::FlagStore;
use crate::db::models::fetch_counts;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

/// Maximum automatic recovery attempts for an interrupted migration
pub const MAX_RECOVERY_ATTEMPTS: i64 = 3;

const FLAG_IN_PROGRESS: &str = "migration_in_progress";
const FLAG_COMPLETED: &str = "migration_completed";
const FLAG_RECOVERY_ATTEMPTS: &str = "migration_recovery_attempts";
const FLAG_SNAPSHOT: &str = "migration_snapshot";

/// Record counts captured immediately before a migration begins
///
/// Written to the flag store, read exactly once during post-migration
/// validation, then superseded by the next migration's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub book_count: i64,
    pub note_count: i64,
    pub quote_count: i64,
}

/// Classified outcome of post-migration validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum MigrationVerdict {
    /// Every current count is >= its snapshot count
    Success,
    /// No snapshot was stored before the migration ran
    NoBackupAvailable,
    /// At least one current count fell below its snapshot count
    DataLoss {
        expected_books: i64,
        found_books: i64,
        expected_notes: i64,
        found_notes: i64,
        expected_quotes: i64,
        found_quotes: i64,
    },
    /// The validation query itself failed; NOT evidence of data loss
    ValidationError { cause: String },
}

/// Safety wrapper around schema migration execution
///
/// State machine over the durable flags:
/// Idle -> InProgress -> {Completed | InterruptedRetryable | RetryExhausted}
pub struct MigrationGuard {
    flags: FlagStore,
}

impl MigrationGuard {
    pub fn new(flags: FlagStore) -> Self {
        Self { flags }
    }

    /// Snapshot current record counts into the flag store
    ///
    /// Overwrites any prior snapshot. Must run before the migration mutates
    /// anything.
    pub async fn create_pre_migration_backup(
        &self,
        pool: &SqlitePool,
    ) -> Result<MigrationSnapshot> {
        let counts = fetch_counts(pool).await?;
        let snapshot = MigrationSnapshot {
            timestamp: Utc::now(),
            book_count: counts.books,
            note_count: counts.notes,
            quote_count: counts.quotes,
        };

        self.flags
            .set(FLAG_SNAPSHOT, &serde_json::to_string(&snapshot)?)
            .await?;

        info!(
            books = snapshot.book_count,
            notes = snapshot.note_count,
            quotes = snapshot.quote_count,
            "Pre-migration snapshot recorded"
        );

        Ok(snapshot)
    }

    /// Whether a prior migration run was interrupted
    ///
    /// True when a run was marked in-progress but never marked completed.
    pub async fn is_interrupted(&self) -> Result<bool> {
        Ok(self.flags.get_bool(FLAG_IN_PROGRESS).await?
            && !self.flags.get_bool(FLAG_COMPLETED).await?)
    }

    /// Decide whether an interrupted migration may be retried
    ///
    /// Consumes one unit of the durable retry budget whenever it observes an
    /// interrupted run with budget remaining, so call this at most once per
    /// process start. Returns false once the budget is exhausted; only
    /// `perform_emergency_reset` restores it.
    pub async fn should_attempt_recovery(&self) -> Result<bool> {
        if !self.is_interrupted().await? {
            return Ok(false);
        }

        let attempts = self.flags.get_i64_or(FLAG_RECOVERY_ATTEMPTS, 0).await?;
        if attempts >= MAX_RECOVERY_ATTEMPTS {
            error!(
                attempts,
                "Interrupted migration found but retry budget exhausted; emergency reset required"
            );
            return Ok(false);
        }

        self.flags.set_i64(FLAG_RECOVERY_ATTEMPTS, attempts + 1).await?;
        warn!(
            attempt = attempts + 1,
            max = MAX_RECOVERY_ATTEMPTS,
            "Interrupted migration detected, retry permitted"
        );

        Ok(true)
    }

    /// Clear the in-progress/completed flags, preparing a clean retry
    pub async fn reset_migration_state(&self) -> Result<()> {
        self.flags.remove(FLAG_IN_PROGRESS).await?;
        self.flags.remove(FLAG_COMPLETED).await?;
        Ok(())
    }

    /// Reset migration state and the retry counter
    ///
    /// Clears migration bookkeeping only; user data is never touched.
    pub async fn perform_emergency_reset(&self) -> Result<()> {
        self.reset_migration_state().await?;
        self.flags.remove(FLAG_RECOVERY_ATTEMPTS).await?;
        warn!("Migration state emergency reset performed");
        Ok(())
    }

    /// Mark a migration run as started
    pub async fn mark_started(&self) -> Result<()> {
        self.flags.set_bool(FLAG_IN_PROGRESS, true).await?;
        self.flags.set_bool(FLAG_COMPLETED, false).await?;
        Ok(())
    }

    /// Mark the current migration run as completed
    pub async fn mark_completed(&self) -> Result<()> {
        self.flags.set_bool(FLAG_COMPLETED, true).await?;
        self.flags.set_bool(FLAG_IN_PROGRESS, false).await?;
        Ok(())
    }

    /// Current retry counter value (for status reporting)
    pub async fn recovery_attempts(&self) -> Result<i64> {
        self.flags.get_i64_or(FLAG_RECOVERY_ATTEMPTS, 0).await
    }

    /// Stored snapshot, if any (for status reporting)
    pub async fn snapshot(&self) -> Result<Option<MigrationSnapshot>> {
        match self.flags.get(FLAG_SNAPSHOT).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Compare post-migration record counts against the stored snapshot
    ///
    /// Never propagates an error: query failures are classified as
    /// `ValidationError` so a broken check is not reported as data loss.
    pub async fn validate_migration_results(&self, new_pool: &SqlitePool) -> MigrationVerdict {
        let snapshot = match self.flags.get(FLAG_SNAPSHOT).await {
            Ok(Some(json)) => match serde_json::from_str::<MigrationSnapshot>(&json) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    return MigrationVerdict::ValidationError {
                        cause: format!("snapshot unreadable: {}", e),
                    }
                }
            },
            Ok(None) => return MigrationVerdict::NoBackupAvailable,
            Err(e) => {
                return MigrationVerdict::ValidationError {
                    cause: format!("snapshot load failed: {}", e),
                }
            }
        };

        let counts = match fetch_counts(new_pool).await {
            Ok(counts) => counts,
            Err(e) => {
                return MigrationVerdict::ValidationError {
                    cause: format!("count query failed: {}", e),
                }
            }
        };

        if counts.books >= snapshot.book_count
            && counts.notes >= snapshot.note_count
            && counts.quotes >= snapshot.quote_count
        {
            info!(
                books = counts.books,
                notes = counts.notes,
                quotes = counts.quotes,
                "Migration validation passed"
            );
            MigrationVerdict::Success
        } else {
            error!(
                expected_books = snapshot.book_count,
                found_books = counts.books,
                expected_notes = snapshot.note_count,
                found_notes = counts.notes,
                expected_quotes = snapshot.quote_count,
                found_quotes = counts.quotes,
                "Migration validation detected missing records"
            );
            MigrationVerdict::DataLoss {
                expected_books: snapshot.book_count,
                found_books: counts.books,
                expected_notes: snapshot.note_count,
                found_notes: counts.notes,
                expected_quotes: snapshot.quote_count,
                found_quotes: counts.quotes,
            }
        }
    }
}
