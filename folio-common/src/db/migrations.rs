//! Database schema migrations
//!
//! Implements versioned schema migrations so existing library databases
//! upgrade in place without manual deletion or data loss.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - They must remain stable for users upgrading from older versions
//! 2. **Always add new migrations** - Create a new migration function for each schema change
//! 3. **Test migrations** - Verify they work on databases with old schema
//! 4. **Use ALTER TABLE** - Prefer ALTER TABLE over DROP/CREATE to preserve data
//!
//! Migrations that change record shapes carry data-loss risk; callers should
//! go through [`run_guarded_migrations`], which wraps the runner in the
//! migration safety net (pre-migration snapshot, bounded recovery of
//! interrupted runs, post-migration count validation).

use crate::db::flags::FlagStore;
use crate::db::safety::{MigrationGuard, MigrationVerdict};
use crate::events::{EventBus, FolioEvent};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = sqlx::query_scalar(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(version.unwrap_or(0))
}

/// Set schema version in database
async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
///
/// Idempotent: safe to run multiple times and against freshly created
/// databases (each migration checks for existing columns before altering).
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Run pending migrations inside the migration safety net
///
/// Flow: detect an interrupted prior run and consume one recovery-budget
/// unit if a retry is permitted; snapshot record counts; mark the run
/// in-progress; run the migrations; mark completed; validate counts against
/// the snapshot. Returns the validation verdict, or `None` when the schema
/// was already current and nothing needed guarding.
///
/// Call once per process start (the recovery check is side-effecting).
pub async fn run_guarded_migrations(
    pool: &SqlitePool,
    flags: &FlagStore,
    event_bus: &EventBus,
) -> Result<Option<MigrationVerdict>> {
    let guard = MigrationGuard::new(flags.clone());

    if guard.is_interrupted().await? {
        if guard.should_attempt_recovery().await? {
            guard.reset_migration_state().await?;
        } else {
            return Err(Error::Internal(
                "interrupted migration found and retry budget exhausted; \
                 an emergency reset is required before migrating again"
                    .to_string(),
            ));
        }
    }

    let from_version = get_schema_version(pool).await?;
    if from_version >= CURRENT_SCHEMA_VERSION {
        run_migrations(pool).await?;
        return Ok(None);
    }

    guard.create_pre_migration_backup(pool).await?;
    guard.mark_started().await?;
    event_bus.emit(FolioEvent::MigrationStarted {
        from_version,
        to_version: CURRENT_SCHEMA_VERSION,
        timestamp: Utc::now(),
    });

    run_migrations(pool).await?;
    guard.mark_completed().await?;

    let verdict = guard.validate_migration_results(pool).await;
    event_bus.emit(FolioEvent::MigrationValidated {
        verdict: verdict.clone(),
        timestamp: Utc::now(),
    });

    Ok(Some(verdict))
}

/// Check whether a single column exists on a table
async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = '{}'",
        table, column
    ))
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Add a column if it is missing, tolerating concurrent initialization
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    column_type: &str,
) -> Result<bool> {
    if has_column(pool, table, column).await? {
        return Ok(false);
    }

    match sqlx::query(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table, column, column_type
    ))
    .execute(pool)
    .await
    {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            // Another connection beat us to it
            info!("  {} column added by concurrent connection - skipping", column);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Migration v1: Add series columns to the books table
///
/// **Background:** The books table was initially created without series
/// membership fields. Enrichment now reports series name, position and
/// total volume count, so existing databases gain the three columns.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add series columns to books");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='books'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        // Table doesn't exist yet - will be created with correct schema
        info!("  Books table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let mut added = 0;
    for (column, column_type) in [
        ("series_name", "TEXT"),
        ("series_order", "INTEGER"),
        ("series_total", "INTEGER"),
    ] {
        if add_column_if_missing(pool, "books", column, column_type).await? {
            added += 1;
        }
    }

    if added > 0 {
        info!("  Added {} series columns to books table", added);
    } else {
        info!("  Series columns already exist - skipping");
    }

    Ok(())
}

/// Migration v2: Add page column to the quotes table
///
/// **Background:** Quotes were initially stored without their page number.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Add page column to quotes");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='quotes'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        info!("  Quotes table doesn't exist yet - skipping migration");
        return Ok(());
    }

    if add_column_if_missing(pool, "quotes", "page", "INTEGER").await? {
        info!("  Added page column to quotes table");
    } else {
        info!("  page column already exists - skipping");
    }

    Ok(())
}
