//! Database models and record queries

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// A library record as stored in the books table
///
/// Enrichment columns are NULL until the enrichment worker has processed
/// the record; `enriched_at` marks completion. The sequence-valued columns
/// (themes, characters, tone) hold JSON arrays of strings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookRecord {
    pub guid: String,
    pub title: String,
    pub author: String,
    pub synopsis: Option<String>,
    pub themes: Option<String>,
    pub characters: Option<String>,
    pub setting: Option<String>,
    pub tone: Option<String>,
    pub style: Option<String>,
    pub series_name: Option<String>,
    pub series_order: Option<i64>,
    pub series_total: Option<i64>,
    pub enriched_at: Option<DateTime<Utc>>,
}

impl BookRecord {
    /// Whether this record has completed enrichment
    pub fn is_enriched(&self) -> bool {
        self.enriched_at.is_some()
    }

    /// Record identity as a Uuid (nil when the stored guid is malformed)
    pub fn id(&self) -> Uuid {
        Uuid::parse_str(&self.guid).unwrap_or_else(|_| Uuid::nil())
    }
}

/// Record counts used by the migration safety net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCounts {
    pub books: i64,
    pub notes: i64,
    pub quotes: i64,
}

const BOOK_COLUMNS: &str = "guid, title, author, synopsis, themes, characters, \
     setting, tone, style, series_name, series_order, series_total, enriched_at";

/// Fetch all library records in insertion order
pub async fn fetch_all_books(pool: &SqlitePool) -> Result<Vec<BookRecord>> {
    let rows = sqlx::query_as::<_, BookRecord>(&format!(
        "SELECT {} FROM books ORDER BY created_at, guid",
        BOOK_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Fetch records that have not been enriched yet, in insertion order
///
/// This is the enrichment orchestrator's discovery query; records inserted
/// after a sweep begins are picked up by the next sweep.
pub async fn fetch_unenriched_books(pool: &SqlitePool) -> Result<Vec<BookRecord>> {
    let rows = sqlx::query_as::<_, BookRecord>(&format!(
        "SELECT {} FROM books WHERE enriched_at IS NULL ORDER BY created_at, guid",
        BOOK_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Fetch a single record by guid
pub async fn fetch_book(pool: &SqlitePool, id: Uuid) -> Result<Option<BookRecord>> {
    let row = sqlx::query_as::<_, BookRecord>(&format!(
        "SELECT {} FROM books WHERE guid = ?",
        BOOK_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Insert a bare (unenriched) library record
pub async fn insert_book(pool: &SqlitePool, title: &str, author: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query("INSERT INTO books (guid, title, author) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(title)
        .bind(author)
        .execute(pool)
        .await?;

    Ok(id)
}

/// Query current record counts across books, notes and quotes
pub async fn fetch_counts(pool: &SqlitePool) -> Result<LibraryCounts> {
    let books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
        .fetch_one(pool)
        .await?;
    let notes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
        .fetch_one(pool)
        .await?;
    let quotes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotes")
        .fetch_one(pool)
        .await?;

    Ok(LibraryCounts {
        books,
        notes,
        quotes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_insert_and_fetch_book() {
        let pool = setup_test_db().await;

        let id = insert_book(&pool, "The Left Hand of Darkness", "Ursula K. Le Guin")
            .await
            .unwrap();

        let book = fetch_book(&pool, id).await.unwrap().unwrap();
        assert_eq!(book.title, "The Left Hand of Darkness");
        assert_eq!(book.author, "Ursula K. Le Guin");
        assert!(!book.is_enriched());
        assert_eq!(book.id(), id);
    }

    #[tokio::test]
    async fn test_unenriched_discovery_order() {
        let pool = setup_test_db().await;

        let first = insert_book(&pool, "Dune", "Frank Herbert").await.unwrap();
        let second = insert_book(&pool, "Hyperion", "Dan Simmons").await.unwrap();

        let pending = fetch_unenriched_books(&pool).await.unwrap();
        assert_eq!(pending.len(), 2);
        // created_at has second resolution; guid breaks ties deterministically
        let ids: Vec<Uuid> = pending.iter().map(|b| b.id()).collect();
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
    }

    #[tokio::test]
    async fn test_enriched_books_excluded_from_discovery() {
        let pool = setup_test_db().await;

        let id = insert_book(&pool, "Piranesi", "Susanna Clarke").await.unwrap();
        sqlx::query("UPDATE books SET enriched_at = CURRENT_TIMESTAMP WHERE guid = ?")
            .bind(id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let pending = fetch_unenriched_books(&pool).await.unwrap();
        assert!(pending.is_empty());

        let all = fetch_all_books(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_enriched());
    }

    #[tokio::test]
    async fn test_fetch_counts() {
        let pool = setup_test_db().await;

        let book = insert_book(&pool, "Beloved", "Toni Morrison").await.unwrap();
        sqlx::query("INSERT INTO notes (guid, book_id, content) VALUES (?, ?, 'note')")
            .bind(Uuid::new_v4().to_string())
            .bind(book.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let counts = fetch_counts(&pool).await.unwrap();
        assert_eq!(
            counts,
            LibraryCounts {
                books: 1,
                notes: 1,
                quotes: 0
            }
        );
    }
}
