//! Resilient parsing of assistant answers
//!
//! The assistant is asked for a fixed JSON shape but its answer is
//! untrusted free text: usually valid JSON wrapped in prose, sometimes
//! truncated or mangled. Parsing is two-tier: a strict typed decode of the
//! brace-delimited candidate, then field-by-field tolerant extraction over
//! the raw text. `parse_enrichment` never fails; absent fields get fixed
//! placeholders so enrichment degrades instead of aborting.

use regex::Regex;
use serde::{Deserialize, Serialize};

const DEFAULT_SYNOPSIS: &str = "No synopsis available.";
const DEFAULT_SETTING: &str = "Unknown";
const DEFAULT_STYLE: &str = "Unknown";
const DEFAULT_THEME: &str = "General";
const DEFAULT_TONE: &str = "Neutral";
const DEFAULT_CHARACTER: &str = "Unknown";

/// Literary metadata extracted from one assistant answer
///
/// Field names mirror the JSON schema the prompt requests. The three series
/// fields are optional; all others are always populated (by the answer or
/// by a placeholder). Constructed fresh per enrichment attempt and
/// immediately projected onto a book record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub synopsis: String,
    pub themes: Vec<String>,
    pub characters: Vec<String>,
    pub setting: String,
    pub tone: Vec<String>,
    pub style: String,
    pub series_name: Option<String>,
    pub series_order: Option<i64>,
    #[serde(rename = "totalBooksInSeries")]
    pub series_total: Option<i64>,
}

impl EnrichmentResult {
    /// Series order and total only make sense under a series name
    fn normalize_series(&mut self) {
        if self.series_name.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.series_name = None;
            self.series_order = None;
            self.series_total = None;
        }
    }
}

/// Parse an assistant answer into an `EnrichmentResult`
///
/// Never fails; returns a best-effort result with placeholders for
/// anything that could not be recovered.
pub fn parse_enrichment(raw: &str) -> EnrichmentResult {
    let candidate = slice_json_candidate(raw);

    if let Ok(mut result) = serde_json::from_str::<EnrichmentResult>(candidate) {
        result.normalize_series();
        return result;
    }

    tracing::debug!("Strict decode failed, falling back to tolerant extraction");

    let mut result = EnrichmentResult {
        synopsis: extract_string(raw, "synopsis")
            .unwrap_or_else(|| DEFAULT_SYNOPSIS.to_string()),
        themes: extract_list(raw, "themes")
            .unwrap_or_else(|| vec![DEFAULT_THEME.to_string()]),
        characters: extract_list(raw, "characters")
            .unwrap_or_else(|| vec![DEFAULT_CHARACTER.to_string()]),
        setting: extract_string(raw, "setting")
            .unwrap_or_else(|| DEFAULT_SETTING.to_string()),
        tone: extract_list(raw, "tone")
            .unwrap_or_else(|| vec![DEFAULT_TONE.to_string()]),
        style: extract_string(raw, "style").unwrap_or_else(|| DEFAULT_STYLE.to_string()),
        series_name: extract_string(raw, "seriesName"),
        series_order: extract_integer(raw, "seriesOrder"),
        series_total: extract_integer(raw, "totalBooksInSeries"),
    };
    result.normalize_series();
    result
}

/// Slice between the first `{` and the last `}` inclusive, when both exist
fn slice_json_candidate(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    }
}

/// First `"field": "value"` match in the raw text
fn extract_string(raw: &str, field: &str) -> Option<String> {
    let re = Regex::new(&format!(r#""{}"\s*:\s*"([^"]*)""#, field)).ok()?;
    re.captures(raw).map(|caps| caps[1].to_string())
}

/// First `"field": [ ... ]` match, split on commas, trimmed, quotes
/// stripped, empties discarded; `None` when nothing usable remains
fn extract_list(raw: &str, field: &str) -> Option<Vec<String>> {
    let re = Regex::new(&format!(r#""{}"\s*:\s*\[([^\]]*)\]"#, field)).ok()?;
    let inner = re.captures(raw)?.get(1)?.as_str();

    let items: Vec<String> = inner
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// First integer-valued `"field": 3` (or `"field": "3"`) match; absent when
/// the value is not a valid integer
fn extract_integer(raw: &str, field: &str) -> Option<i64> {
    let re = Regex::new(&format!(r#""{}"\s*:\s*"?(-?\d+)"?"#, field)).ok()?;
    re.captures(raw)?.get(1)?.as_str().parse().ok()
}
