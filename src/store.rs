use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use async_trait::async_trait;
use sha2::{Digest as _, Sha256};
use tokio::fs;

use crate::model::{BookRecord, SeriesRecord};

/// Store failures. `Conflict` means a record with an equal-or-newer
/// logical timestamp is already stored; callers must re-read and
/// re-derive before retrying, never blind-overwrite.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("newer record already stored for {key}")]
    Conflict { key: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait BookStore: Send + Sync {
    async fn get(&self, asin: &str) -> anyhow::Result<Option<BookRecord>>;

    /// Conditional write: succeeds only if no record is stored for the
    /// key, or the stored record's `updated_at` is strictly older.
    async fn put(&self, record: &BookRecord) -> Result<(), StoreError>;

    /// Snapshot scan of all books carrying `series_key`. Unordered, with
    /// no isolation guarantee against concurrent writes.
    async fn list_by_series(&self, series_key: &str) -> anyhow::Result<Vec<BookRecord>>;
}

#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn get(&self, series_key: &str) -> anyhow::Result<Option<SeriesRecord>>;

    /// Conditional write with the same timestamp rule as [`BookStore::put`].
    async fn put(&self, record: &SeriesRecord) -> Result<(), StoreError>;
}

/// Book store backed by one JSON document per record.
#[derive(Debug, Clone)]
pub struct LocalFsBookStore {
    base_dir: PathBuf,
}

impl LocalFsBookStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    fn book_path(&self, asin: &str) -> PathBuf {
        self.books_dir().join(key_file_name(asin))
    }
}

#[async_trait]
impl BookStore for LocalFsBookStore {
    async fn get(&self, asin: &str) -> anyhow::Result<Option<BookRecord>> {
        let path = self.book_path(asin);
        read_json(&path)
            .await
            .with_context(|| format!("read book record: {}", path.display()))
    }

    async fn put(&self, record: &BookRecord) -> Result<(), StoreError> {
        let path = self.book_path(&record.asin);
        let stored: Option<BookRecord> = read_json(&path)
            .await
            .with_context(|| format!("read book record: {}", path.display()))?;
        if let Some(stored) = stored
            && stored.updated_at >= record.updated_at
        {
            return Err(StoreError::Conflict {
                key: record.asin.clone(),
            });
        }

        write_json_atomic(&path, record)
            .await
            .with_context(|| format!("write book record: {}", path.display()))?;
        Ok(())
    }

    async fn list_by_series(&self, series_key: &str) -> anyhow::Result<Vec<BookRecord>> {
        let dir = self.books_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read books dir: {}", dir.display()));
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read books dir: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: Option<BookRecord> = read_json(&path)
                .await
                .with_context(|| format!("read book record: {}", path.display()))?;
            if let Some(record) = record
                && record.series_key.as_deref() == Some(series_key)
            {
                records.push(record);
            }
        }

        Ok(records)
    }
}

/// Series store backed by one JSON document per record.
#[derive(Debug, Clone)]
pub struct LocalFsSeriesStore {
    base_dir: PathBuf,
}

impl LocalFsSeriesStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn series_path(&self, series_key: &str) -> PathBuf {
        self.base_dir.join("series").join(key_file_name(series_key))
    }
}

#[async_trait]
impl SeriesStore for LocalFsSeriesStore {
    async fn get(&self, series_key: &str) -> anyhow::Result<Option<SeriesRecord>> {
        let path = self.series_path(series_key);
        read_json(&path)
            .await
            .with_context(|| format!("read series record: {}", path.display()))
    }

    async fn put(&self, record: &SeriesRecord) -> Result<(), StoreError> {
        let path = self.series_path(&record.series_key);
        let stored: Option<SeriesRecord> = read_json(&path)
            .await
            .with_context(|| format!("read series record: {}", path.display()))?;
        if let Some(stored) = stored
            && stored.updated_at >= record.updated_at
        {
            return Err(StoreError::Conflict {
                key: record.series_key.clone(),
            });
        }

        write_json_atomic(&path, record)
            .await
            .with_context(|| format!("write series record: {}", path.display()))?;
        Ok(())
    }
}

/// In-memory book store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBookStore {
    records: Mutex<HashMap<String, BookRecord>>,
}

#[async_trait]
impl BookStore for MemoryBookStore {
    async fn get(&self, asin: &str) -> anyhow::Result<Option<BookRecord>> {
        Ok(self.records.lock().expect("book store poisoned").get(asin).cloned())
    }

    async fn put(&self, record: &BookRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("book store poisoned");
        if let Some(stored) = records.get(&record.asin)
            && stored.updated_at >= record.updated_at
        {
            return Err(StoreError::Conflict {
                key: record.asin.clone(),
            });
        }
        records.insert(record.asin.clone(), record.clone());
        Ok(())
    }

    async fn list_by_series(&self, series_key: &str) -> anyhow::Result<Vec<BookRecord>> {
        Ok(self
            .records
            .lock()
            .expect("book store poisoned")
            .values()
            .filter(|record| record.series_key.as_deref() == Some(series_key))
            .cloned()
            .collect())
    }
}

/// In-memory series store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySeriesStore {
    records: Mutex<HashMap<String, SeriesRecord>>,
}

#[async_trait]
impl SeriesStore for MemorySeriesStore {
    async fn get(&self, series_key: &str) -> anyhow::Result<Option<SeriesRecord>> {
        Ok(self
            .records
            .lock()
            .expect("series store poisoned")
            .get(series_key)
            .cloned())
    }

    async fn put(&self, record: &SeriesRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("series store poisoned");
        if let Some(stored) = records.get(&record.series_key)
            && stored.updated_at >= record.updated_at
        {
            return Err(StoreError::Conflict {
                key: record.series_key.clone(),
            });
        }
        records.insert(record.series_key.clone(), record.clone());
        Ok(())
    }
}

/// File name for a record key. Keys may contain separators and arbitrary
/// text (series keys do); the digest suffix keeps distinct keys from
/// colliding after sanitization.
fn key_file_name(key: &str) -> String {
    let mut safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    safe.truncate(64);

    let digest = Sha256::digest(key.as_bytes());
    format!("{safe}-{}.json", hex::encode(&digest[..4]))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create record dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
