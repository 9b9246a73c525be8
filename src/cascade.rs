use std::sync::Arc;

use anyhow::Context as _;

use crate::directory::DirectoryGateway;
use crate::error::EngineResult;
use crate::model::{CascadeInput, CascadeOutcome, SeriesRecord, logical_now};
use crate::pages;
use crate::status::{self, BookStatus};
use crate::store::{BookStore, SeriesStore};

/// Propagates one book's status change into its series.
///
/// A discard fans out to every unfinished sibling; any other status only
/// recomputes the series aggregate. The series record is written last,
/// and only after the directory reflects the new aggregate: the stored
/// aggregate must never run ahead of the external page. Per-sibling page
/// failures during a discard fanout are logged and skipped; only the
/// series-aggregate patch is fatal.
pub struct CascadeEngine {
    books: Arc<dyn BookStore>,
    series: Arc<dyn SeriesStore>,
    directory: Arc<dyn DirectoryGateway>,
}

impl CascadeEngine {
    pub fn new(
        books: Arc<dyn BookStore>,
        series: Arc<dyn SeriesStore>,
        directory: Arc<dyn DirectoryGateway>,
    ) -> Self {
        Self {
            books,
            series,
            directory,
        }
    }

    pub async fn run(&self, input: &CascadeInput) -> EngineResult<CascadeOutcome> {
        if input.series_match == Some(false) {
            tracing::info!(asin = ?input.asin, "standalone book; cascade skipped");
            return Ok(CascadeOutcome {
                updated_books: 0,
                series_status: input.status,
            });
        }

        let target = match input.asin.as_deref() {
            Some(asin) => self
                .books
                .get(asin)
                .await
                .context("load cascade target book")?,
            None => None,
        };

        let Some(series_key) = input
            .series_key
            .clone()
            .or_else(|| target.as_ref().and_then(|b| b.series_key.clone()))
        else {
            tracing::info!(asin = ?input.asin, "cascade skipped: no series key derived");
            let fallback = target.as_ref().map(|b| b.status).unwrap_or(input.status);
            return Ok(CascadeOutcome {
                updated_books: 0,
                series_status: fallback,
            });
        };

        let members = self
            .books
            .list_by_series(&series_key)
            .await
            .context("list series members")?;
        if members.is_empty() {
            tracing::info!(series_key = %series_key, "cascade skipped: series has no recorded books");
            return Ok(CascadeOutcome {
                updated_books: 0,
                series_status: BookStatus::NotStarted,
            });
        }

        let stored = self
            .series
            .get(&series_key)
            .await
            .context("load series record")?;

        let mut updated_books = 0usize;
        let aggregate = if input.status == BookStatus::Discarded {
            for book in &members {
                if !book.series_match
                    || matches!(book.status, BookStatus::Finished | BookStatus::Discarded)
                {
                    continue;
                }

                let mut discarded = book.clone();
                discarded.status = BookStatus::Discarded;
                discarded.updated_at = logical_now();
                self.books.put(&discarded).await?;

                if let Some(page_id) = &book.page_id {
                    // one unreachable sibling page must not block the rest
                    if let Err(err) = self
                        .directory
                        .update_page(page_id, pages::book_status_patch(BookStatus::Discarded), false)
                        .await
                    {
                        tracing::warn!(
                            asin = %book.asin,
                            page_id = %page_id,
                            error = %err,
                            "failed to patch sibling page during discard fanout"
                        );
                    }
                }
                updated_books += 1;
            }
            BookStatus::Discarded
        } else {
            let statuses: Vec<BookStatus> = members
                .iter()
                .filter(|b| b.series_match)
                .map(|b| {
                    if input.asin.as_deref() == Some(b.asin.as_str()) {
                        input.status
                    } else {
                        b.status
                    }
                })
                .collect();
            status::series_aggregate(&statuses)
        };

        let previous = stored.as_ref().and_then(|s| s.final_status);
        if let Some(page_id) = stored.as_ref().and_then(|s| s.page_id.clone())
            && previous != Some(aggregate)
        {
            // fatal on failure: abort before the series record is written
            self.directory
                .update_page(&page_id, pages::series_status_patch(aggregate), false)
                .await?;
        }

        let record = SeriesRecord {
            series_key: series_key.clone(),
            series_name: stored
                .as_ref()
                .map(|s| s.series_name.clone())
                .or_else(|| target.as_ref().map(|b| b.title.clone()))
                .unwrap_or_else(|| "Unknown Series".to_string()),
            page_id: stored.as_ref().and_then(|s| s.page_id.clone()),
            final_status: Some(aggregate),
            updated_at: logical_now(),
        };
        self.series.put(&record).await?;

        tracing::info!(
            series_key = %series_key,
            status = %aggregate,
            updated_books,
            "cascade complete"
        );
        Ok(CascadeOutcome {
            updated_books,
            series_status: aggregate,
        })
    }
}
