use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ImportRow;

/// Best-effort series identification for one imported row.
/// `series_match == false` means "treat as standalone".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub series_name: String,
    pub series_order: Option<u32>,
    pub series_key: String,
    pub series_match: bool,
}

/// Derived series identity: normalized author and series name joined by a
/// separator. Case-insensitive, whitespace-trimmed.
pub fn build_series_key(author: Option<&str>, series_name: Option<&str>) -> String {
    let author = normalize_part(author, "unknown-author");
    let series = normalize_part(series_name, "unknown-series");
    format!("{author}|{series}")
}

fn normalize_part(part: Option<&str>, fallback: &str) -> String {
    match part.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_lowercase(),
        _ => fallback.to_string(),
    }
}

/// Resolves which series, if any, an imported book belongs to.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, row: &ImportRow) -> anyhow::Result<SeriesMetadata>;
}

/// Resolver that trusts the row's explicit hints. A row without a series
/// name hint is treated as standalone, keyed off its own title so the key
/// is still stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct HintResolver;

#[async_trait]
impl MetadataResolver for HintResolver {
    async fn resolve(&self, row: &ImportRow) -> anyhow::Result<SeriesMetadata> {
        let hint = row
            .series_name_hint
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let (series_name, series_order, series_match) = match hint {
            Some(name) => (name.to_string(), row.series_sequence_hint, true),
            None => (row.title.clone(), None, false),
        };

        Ok(SeriesMetadata {
            series_key: build_series_key(Some(&row.author), Some(&series_name)),
            series_name,
            series_order,
            series_match,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, author: &str, hint: Option<&str>, sequence: Option<u32>) -> ImportRow {
        ImportRow {
            title: title.to_string(),
            author: author.to_string(),
            asin: "B000TEST".to_string(),
            purchased_at: None,
            status_default: None,
            source: None,
            series_name_hint: hint.map(str::to_string),
            series_sequence_hint: sequence,
        }
    }

    #[test]
    fn series_key_normalizes_author_and_name() {
        assert_eq!(
            build_series_key(Some(" N. K. Jemisin "), Some("Broken Earth")),
            "n. k. jemisin|broken earth"
        );
    }

    #[test]
    fn series_key_falls_back_for_missing_parts() {
        assert_eq!(build_series_key(None, None), "unknown-author|unknown-series");
        assert_eq!(build_series_key(Some("  "), Some("Saga")), "unknown-author|saga");
    }

    #[tokio::test]
    async fn hinted_row_resolves_to_a_matched_series() -> anyhow::Result<()> {
        let meta = HintResolver
            .resolve(&row("The Obelisk Gate", "N. K. Jemisin", Some("Broken Earth"), Some(2)))
            .await?;

        assert_eq!(
            meta,
            SeriesMetadata {
                series_name: "Broken Earth".to_string(),
                series_order: Some(2),
                series_key: "n. k. jemisin|broken earth".to_string(),
                series_match: true,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn unhinted_row_is_standalone_keyed_off_its_title() -> anyhow::Result<()> {
        let meta = HintResolver
            .resolve(&row("The City We Became", "N. K. Jemisin", None, None))
            .await?;

        assert!(!meta.series_match);
        assert_eq!(meta.series_name, "The City We Became");
        assert_eq!(meta.series_key, "n. k. jemisin|the city we became");
        assert_eq!(meta.series_order, None);
        Ok(())
    }

    #[tokio::test]
    async fn blank_hint_counts_as_absent() -> anyhow::Result<()> {
        let meta = HintResolver
            .resolve(&row("Solo", "Someone", Some("   "), Some(1)))
            .await?;
        assert!(!meta.series_match);
        assert_eq!(meta.series_order, None);
        Ok(())
    }
}
