use std::path::PathBuf;

use anyhow::Context as _;

pub const DEFAULT_DIRECTORY_BASE_URL: &str = "https://api.notion.com";

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory API base URL; overridable so tests and local setups can
    /// point at a stub.
    pub directory_base_url: String,
    pub directory_token: String,
    pub books_database_id: String,
    pub series_database_id: String,
    /// Root of the local record stores.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            directory_base_url: optional_var("SHELFSYNC_DIRECTORY_URL")?
                .unwrap_or_else(|| DEFAULT_DIRECTORY_BASE_URL.to_string()),
            directory_token: required_var("SHELFSYNC_DIRECTORY_TOKEN")?,
            books_database_id: required_var("SHELFSYNC_BOOKS_DB_ID")?,
            series_database_id: required_var("SHELFSYNC_SERIES_DB_ID")?,
            data_dir: optional_var("SHELFSYNC_DATA_DIR")?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
        })
    }
}

fn required_var(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name).with_context(|| format!("{name} is required"))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("{name} is empty");
    }
    Ok(value)
}

fn optional_var(name: &str) -> anyhow::Result<Option<String>> {
    match std::env::var(name) {
        Ok(value) => {
            let value = value.trim().to_string();
            Ok(if value.is_empty() { None } else { Some(value) })
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {name}")),
    }
}
