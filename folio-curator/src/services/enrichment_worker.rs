//! Enrichment worker
//!
//! Processes one library record end to end: builds the prompt, asks the
//! assistant, parses the answer, and writes the result back onto the
//! record. Failure is absorbed here and never propagated: a failed record
//! simply stays unenriched and is picked up again by a later sweep.

use chrono::Utc;
use folio_common::db::models::BookRecord;
use folio_common::events::{EventBus, FolioEvent};
use sqlx::SqlitePool;
use std::sync::Arc;

use super::assistant_client::AnswerSource;
use super::response_parser::{parse_enrichment, EnrichmentResult};

/// Build the enrichment prompt for one book
///
/// The nine-field JSON schema here is the wire contract the assistant is
/// asked, but not guaranteed, to honor; the resilient parser covers the gap.
pub fn build_enrichment_prompt(title: &str, author: &str) -> String {
    format!(
        r#"Analyze the book "{title}" by {author} and respond with ONLY a JSON object, no surrounding commentary, in exactly this shape:

{{
  "synopsis": "...",
  "themes": ["...", "..."],
  "characters": ["...", "..."],
  "setting": "...",
  "tone": ["...", "..."],
  "style": "...",
  "seriesName": null,
  "seriesOrder": null,
  "totalBooksInSeries": null
}}

Guidelines:
- Write in a sophisticated literary register, as for a well-read adult.
- "synopsis": 3-5 sentences, strictly spoiler-free. Never reveal twists, endings, or late-book events.
- If the book is fiction: "characters" lists the principal characters, "setting" describes time and place.
- If the book is non-fiction: "characters" lists the key figures or subjects, "setting" describes the historical or intellectual context.
- "themes": the book's central themes, most important first.
- "tone": adjectives capturing the book's emotional register.
- "style": one sentence on the prose style.
- If the book belongs to a series, set "seriesName" to the series title, "seriesOrder" to this book's position as an integer, and "totalBooksInSeries" to the number of published volumes as an integer. If it does not belong to a series, set all three to null. Never invent a series."#
    )
}

/// Enrichment worker
///
/// Holds the record store pool and the answer source; one instance serves
/// all sweeps.
pub struct EnrichmentWorker {
    db: SqlitePool,
    assistant: Arc<dyn AnswerSource>,
    event_bus: EventBus,
}

impl EnrichmentWorker {
    pub fn new(db: SqlitePool, assistant: Arc<dyn AnswerSource>, event_bus: EventBus) -> Self {
        Self {
            db,
            assistant,
            event_bus,
        }
    }

    /// Enrich one record in place
    ///
    /// Idempotent: an already-enriched record returns immediately without
    /// an assistant call. All failures are absorbed (classified logging
    /// only) and leave the record unenriched so a later sweep retries it.
    /// Returns whether this call enriched the record.
    pub async fn enrich(&self, book: &BookRecord) -> bool {
        if book.is_enriched() {
            tracing::debug!(book_id = %book.guid, "Record already enriched - skipping");
            return false;
        }

        let prompt = build_enrichment_prompt(&book.title, &book.author);

        let answer = match self.assistant.ask(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(
                    book_id = %book.guid,
                    title = %book.title,
                    kind = e.classification(),
                    error = %e,
                    "Enrichment call failed; record will be retried on a later sweep"
                );
                self.event_bus.emit(FolioEvent::EnrichmentFailed {
                    book_id: book.id(),
                    reason: e.classification().to_string(),
                    timestamp: Utc::now(),
                });
                return false;
            }
        };

        // The parser never fails; a mangled answer degrades to placeholders
        let result = parse_enrichment(&answer);

        if let Err(e) = self.persist(book, &result).await {
            tracing::warn!(
                book_id = %book.guid,
                error = %e,
                "Failed to persist enrichment; record left unenriched"
            );
            self.event_bus.emit(FolioEvent::EnrichmentFailed {
                book_id: book.id(),
                reason: "other".to_string(),
                timestamp: Utc::now(),
            });
            return false;
        }

        tracing::info!(
            book_id = %book.guid,
            title = %book.title,
            themes = result.themes.len(),
            series = result.series_name.as_deref().unwrap_or("none"),
            "Record enriched"
        );
        self.event_bus.emit(FolioEvent::BookEnriched {
            book_id: book.id(),
            timestamp: Utc::now(),
        });

        true
    }

    /// Copy every result field onto the record and stamp completion
    ///
    /// A single UPDATE so the field group lands atomically; the pool is the
    /// only writer for record mutations.
    async fn persist(
        &self,
        book: &BookRecord,
        result: &EnrichmentResult,
    ) -> folio_common::Result<()> {
        sqlx::query(
            r#"
            UPDATE books
            SET synopsis = ?,
                themes = ?,
                characters = ?,
                setting = ?,
                tone = ?,
                style = ?,
                series_name = ?,
                series_order = ?,
                series_total = ?,
                enriched_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE guid = ?
            "#,
        )
        .bind(&result.synopsis)
        .bind(serde_json::to_string(&result.themes)?)
        .bind(serde_json::to_string(&result.characters)?)
        .bind(&result.setting)
        .bind(serde_json::to_string(&result.tone)?)
        .bind(&result.style)
        .bind(&result.series_name)
        .bind(result.series_order)
        .bind(result.series_total)
        .bind(Utc::now())
        .bind(&book.guid)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
