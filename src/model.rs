use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::status::BookStatus;

/// Durable per-book record, keyed by ASIN. The record store is the source
/// of truth; the directory page is a mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub asin: String,
    pub title: String,
    pub author: String,
    pub series_key: Option<String>,
    pub status: BookStatus,
    /// Directory page mirroring this book, once resolved.
    pub page_id: Option<String>,
    pub series_order: Option<u32>,
    pub purchased_at: Option<NaiveDate>,
    pub owned: bool,
    /// False means "never cascade this book"; sticky-true once linked.
    pub series_match: bool,
    /// Logical write-ordering token (epoch millis), not wall-clock truth.
    pub updated_at: i64,
}

/// Durable per-series aggregate record, keyed by the derived series key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_key: String,
    pub series_name: String,
    pub page_id: Option<String>,
    pub final_status: Option<BookStatus>,
    pub updated_at: i64,
}

/// One normalized inbound observation of a book (import row or webhook),
/// ready for reconciliation.
#[derive(Debug, Clone, Default)]
pub struct BookObservation {
    pub asin: String,
    pub title: String,
    pub author: String,
    pub series_key: Option<String>,
    /// Directory page of the series, when the series has been upserted.
    pub series_page_id: Option<String>,
    pub status_hint: Option<BookStatus>,
    pub series_order: Option<u32>,
    pub purchased_at: Option<NaiveDate>,
    pub owned_hint: Option<bool>,
    pub series_match: Option<bool>,
    pub source: Option<String>,
}

/// One row of an import batch (JSON Lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    pub title: String,
    pub author: String,
    pub asin: String,
    #[serde(default)]
    pub purchased_at: Option<NaiveDate>,
    #[serde(default)]
    pub status_default: Option<BookStatus>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub series_name_hint: Option<String>,
    #[serde(default)]
    pub series_sequence_hint: Option<u32>,
}

/// Result of one book upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub asin: String,
    pub page_id: String,
    pub status: BookStatus,
    pub series_page_id: Option<String>,
    pub series_match: bool,
}

/// Trigger for one cascade run.
#[derive(Debug, Clone, Default)]
pub struct CascadeInput {
    pub asin: Option<String>,
    pub series_key: Option<String>,
    pub status: BookStatus,
    pub series_match: Option<bool>,
}

/// Result of one cascade run. Returned even on the no-op paths
/// (standalone book, unresolved series), which are not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeOutcome {
    pub updated_books: usize,
    pub series_status: BookStatus,
}

static LAST_TICK: AtomicI64 = AtomicI64::new(0);

/// Current logical write timestamp: wall-clock millis, bumped past the
/// previous tick so the clock is strictly increasing within this process.
/// Cross-process ties and out-of-order deliveries are resolved by the
/// stores' conditional put, not by this clock.
pub fn logical_now() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let prev = LAST_TICK
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(last.max(now - 1) + 1)
        })
        .expect("logical clock update cannot fail");
    prev.max(now - 1) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_clock_is_strictly_increasing() {
        let a = logical_now();
        let b = logical_now();
        let c = logical_now();
        assert!(a < b && b < c);
    }
}
