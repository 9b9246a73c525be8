use std::sync::Arc;

use anyhow::Context as _;

use crate::directory::DirectoryGateway;
use crate::error::{EngineError, EngineResult};
use crate::metadata::SeriesMetadata;
use crate::model::{BookObservation, BookRecord, SeriesRecord, UpsertOutcome, logical_now};
use crate::pages::{self, BookPageProps};
use crate::status;
use crate::store::{BookStore, SeriesStore, StoreError};

/// Write-through reconciler for inbound book and series observations.
///
/// Writes go to the directory first and the record store second, so a
/// record is never persisted without a confirmed external page. Store
/// conflicts from concurrent duplicate observations are absorbed by
/// re-reading and adopting the stored result.
pub struct Reconciler {
    books: Arc<dyn BookStore>,
    series: Arc<dyn SeriesStore>,
    directory: Arc<dyn DirectoryGateway>,
    books_database_id: String,
    series_database_id: String,
}

impl Reconciler {
    pub fn new(
        books: Arc<dyn BookStore>,
        series: Arc<dyn SeriesStore>,
        directory: Arc<dyn DirectoryGateway>,
        books_database_id: impl Into<String>,
        series_database_id: impl Into<String>,
    ) -> Self {
        Self {
            books,
            series,
            directory,
            books_database_id: books_database_id.into(),
            series_database_id: series_database_id.into(),
        }
    }

    /// Merge an observation into the authoritative book record and mirror
    /// it to the directory.
    pub async fn upsert_book(&self, obs: &BookObservation) -> EngineResult<UpsertOutcome> {
        let asin = obs.asin.trim();
        if asin.is_empty() {
            return Err(EngineError::InvalidInput(
                "book observation requires an item id".to_string(),
            ));
        }

        tracing::info!(asin, series_key = ?obs.series_key, "upsert book");

        let existing = self.books.get(asin).await.context("load book record")?;
        let status = status::merge(existing.as_ref().map(|b| b.status), obs.status_hint);
        // sticky-true: once a book is linked to a series it stays linked
        let series_match = obs.series_match.unwrap_or(false)
            || existing.as_ref().is_some_and(|b| b.series_match);
        let owned = obs
            .owned_hint
            .or(existing.as_ref().map(|b| b.owned))
            .unwrap_or(true);

        let mut page = existing
            .as_ref()
            .and_then(|b| b.page_id.clone())
            .map(|id| (id, false));
        if page.is_none() {
            let found = self
                .directory
                .query_by_field(&self.books_database_id, pages::BOOK_KEY_FIELD, asin)
                .await?;
            page = found.into_iter().next().map(|p| (p.id, p.archived));
        }

        let props = pages::book_properties(&BookPageProps {
            title: &obs.title,
            asin,
            status,
            series_page_id: if series_match {
                obs.series_page_id.as_deref()
            } else {
                None
            },
            series_order: obs.series_order,
            purchased_at: obs.purchased_at,
            source: obs.source.as_deref(),
            owned,
        });

        let page_id = match page {
            Some((id, archived)) => {
                if archived {
                    tracing::info!(asin, page_id = %id, "unarchiving resurrected book page");
                }
                // the patch always clears the archived flag; a resurrected
                // book must not stay archived
                self.directory.update_page(&id, props, false).await?;
                id
            }
            None => self.directory.create_page(&self.books_database_id, props).await?.id,
        };

        let record = BookRecord {
            asin: asin.to_string(),
            title: obs.title.clone(),
            author: obs.author.clone(),
            series_key: obs.series_key.clone(),
            status,
            page_id: Some(page_id.clone()),
            series_order: obs.series_order,
            purchased_at: obs.purchased_at,
            owned,
            series_match,
            updated_at: logical_now(),
        };

        match self.books.put(&record).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                // lost the write race against a concurrent duplicate; adopt
                // the stored result when it already resolved a page
                let latest = self
                    .books
                    .get(asin)
                    .await
                    .context("reload book record after conflict")?;
                if let Some(latest) = latest
                    && let Some(latest_page_id) = latest.page_id.clone()
                {
                    tracing::info!(asin, "book upsert lost a write race; adopting stored record");
                    return Ok(UpsertOutcome {
                        asin: latest.asin,
                        page_id: latest_page_id,
                        status: latest.status,
                        series_page_id: if latest.series_match {
                            obs.series_page_id.clone()
                        } else {
                            None
                        },
                        series_match: latest.series_match,
                    });
                }
                return Err(StoreError::Conflict {
                    key: asin.to_string(),
                }
                .into());
            }
            Err(err) => return Err(err.into()),
        }

        Ok(UpsertOutcome {
            asin: record.asin,
            page_id,
            status,
            series_page_id: if series_match {
                obs.series_page_id.clone()
            } else {
                None
            },
            series_match,
        })
    }

    /// Ensure the series page and record exist. Returns the series page
    /// id, or `None` for standalone books.
    pub async fn upsert_series(&self, meta: &SeriesMetadata) -> EngineResult<Option<String>> {
        if !meta.series_match {
            tracing::info!(series_key = %meta.series_key, "standalone book; skipping series upsert");
            return Ok(None);
        }

        let existing = self
            .series
            .get(&meta.series_key)
            .await
            .context("load series record")?;
        if let Some(page_id) = existing.as_ref().and_then(|s| s.page_id.clone()) {
            return Ok(Some(page_id));
        }

        let found = self
            .directory
            .query_by_field(
                &self.series_database_id,
                pages::SERIES_KEY_FIELD,
                &meta.series_key,
            )
            .await?;
        let page_id = match found.into_iter().next() {
            Some(page) => page.id,
            None => {
                let props = pages::series_properties(&meta.series_name, &meta.series_key);
                self.directory
                    .create_page(&self.series_database_id, props)
                    .await?
                    .id
            }
        };

        let record = SeriesRecord {
            series_key: meta.series_key.clone(),
            series_name: meta.series_name.clone(),
            page_id: Some(page_id.clone()),
            final_status: existing.and_then(|s| s.final_status),
            updated_at: logical_now(),
        };

        match self.series.put(&record).await {
            Ok(()) => Ok(Some(page_id)),
            Err(StoreError::Conflict { .. }) => {
                let latest = self
                    .series
                    .get(&meta.series_key)
                    .await
                    .context("reload series record after conflict")?;
                if let Some(latest_page_id) = latest.and_then(|s| s.page_id) {
                    return Ok(Some(latest_page_id));
                }
                Err(StoreError::Conflict {
                    key: meta.series_key.clone(),
                }
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
