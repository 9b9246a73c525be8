use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::cascade::CascadeEngine;
use crate::directory::DirectoryGateway;
use crate::error::{EngineError, EngineResult};
use crate::metadata::MetadataResolver;
use crate::model::{
    BookObservation, CascadeInput, CascadeOutcome, ImportRow, UpsertOutcome, logical_now,
};
use crate::pages;
use crate::status::{self, BookStatus};
use crate::store::{BookStore, SeriesStore};
use crate::upsert::Reconciler;
use crate::webhook;

/// Result of one inbound status event.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEventOutcome {
    pub asin: String,
    /// Whether the book's stored status actually changed.
    pub applied: bool,
    /// Absent only when the book is unknown and the event was skipped.
    pub cascade: Option<CascadeOutcome>,
}

/// Totals for one import batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
}

/// End-to-end orchestration: imports run
/// resolve → upsert-series → upsert-book → cascade, and status events run
/// normalize → apply → cascade.
pub struct Workflow {
    books: Arc<dyn BookStore>,
    directory: Arc<dyn DirectoryGateway>,
    resolver: Arc<dyn MetadataResolver>,
    reconciler: Reconciler,
    cascade: CascadeEngine,
}

impl Workflow {
    pub fn new(
        books: Arc<dyn BookStore>,
        series: Arc<dyn SeriesStore>,
        directory: Arc<dyn DirectoryGateway>,
        resolver: Arc<dyn MetadataResolver>,
        books_database_id: impl Into<String>,
        series_database_id: impl Into<String>,
    ) -> Self {
        let reconciler = Reconciler::new(
            Arc::clone(&books),
            Arc::clone(&series),
            Arc::clone(&directory),
            books_database_id,
            series_database_id,
        );
        let cascade = CascadeEngine::new(Arc::clone(&books), series, Arc::clone(&directory));
        Self {
            books,
            directory,
            resolver,
            reconciler,
            cascade,
        }
    }

    /// Import one row end to end.
    pub async fn import_row(&self, row: &ImportRow) -> EngineResult<UpsertOutcome> {
        let meta = self
            .resolver
            .resolve(row)
            .await
            .context("resolve series metadata")?;
        let series_page_id = self.reconciler.upsert_series(&meta).await?;

        let observation = BookObservation {
            asin: row.asin.clone(),
            title: row.title.clone(),
            author: row.author.clone(),
            series_key: Some(meta.series_key.clone()),
            series_page_id,
            status_hint: row.status_default,
            series_order: meta.series_order,
            purchased_at: row.purchased_at,
            owned_hint: None,
            series_match: Some(meta.series_match),
            source: row.source.clone(),
        };
        let outcome = self.reconciler.upsert_book(&observation).await?;

        self.cascade
            .run(&CascadeInput {
                asin: Some(outcome.asin.clone()),
                series_key: Some(meta.series_key),
                status: outcome.status,
                series_match: Some(outcome.series_match),
            })
            .await?;

        Ok(outcome)
    }

    /// Import a batch. A failing row is logged and skipped; the batch
    /// carries on.
    pub async fn import_batch(&self, rows: &[ImportRow]) -> ImportSummary {
        let mut summary = ImportSummary {
            imported: 0,
            failed: 0,
        };
        for row in rows {
            match self.import_row(row).await {
                Ok(outcome) => {
                    summary.imported += 1;
                    tracing::info!(asin = %outcome.asin, status = %outcome.status, "imported");
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(asin = %row.asin, error = %err, "import row failed");
                }
            }
        }
        summary
    }

    /// Apply an inbound status webhook.
    ///
    /// Unknown books are tolerated (skip, no error). The status moves
    /// through the lattice, so a stale event cannot regress a book. The
    /// cascade runs even when the status was already at target, so a
    /// missed earlier event cannot leave the series aggregate stale.
    pub async fn handle_status_event(
        &self,
        payload: &serde_json::Value,
        default_status: BookStatus,
    ) -> EngineResult<StatusEventOutcome> {
        let event = webhook::normalize(payload);
        let Some(asin) = event.asin else {
            return Err(EngineError::InvalidInput(
                "status event payload has no item id".to_string(),
            ));
        };

        let incoming = event
            .status
            .as_deref()
            .and_then(BookStatus::parse)
            .unwrap_or(default_status);
        tracing::info!(asin = %asin, status = %incoming, "status event received");

        let Some(book) = self
            .books
            .get(&asin)
            .await
            .context("load book for status event")?
        else {
            tracing::warn!(asin = %asin, "status event for unknown book; skipping");
            return Ok(StatusEventOutcome {
                asin,
                applied: false,
                cascade: None,
            });
        };

        let resolved = status::merge(Some(book.status), Some(incoming));
        let applied = resolved != book.status;
        if applied {
            // directory first: the record store must not run ahead of the page
            if let Some(page_id) = &book.page_id {
                self.directory
                    .update_page(page_id, pages::book_status_patch(resolved), false)
                    .await?;
            }
            let mut updated = book.clone();
            updated.status = resolved;
            updated.updated_at = logical_now();
            self.books.put(&updated).await?;
        }

        let cascade = self
            .cascade
            .run(&CascadeInput {
                asin: Some(asin.clone()),
                series_key: book.series_key.clone(),
                status: resolved,
                series_match: Some(book.series_match),
            })
            .await?;

        Ok(StatusEventOutcome {
            asin,
            applied,
            cascade: Some(cascade),
        })
    }

    /// Run a cascade directly, outside the import/webhook flows.
    pub async fn run_cascade(&self, input: &CascadeInput) -> EngineResult<CascadeOutcome> {
        self.cascade.run(input).await
    }
}

/// Read a JSON Lines import file. Blank lines are skipped; a malformed
/// line is an error naming its line number.
pub async fn load_import_rows(path: impl AsRef<Path>) -> anyhow::Result<Vec<ImportRow>> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read import file: {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: ImportRow = serde_json::from_str(line)
            .with_context(|| format!("parse import row at line {}", index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}
