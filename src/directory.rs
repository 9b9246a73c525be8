use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// Reference to a page in the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageRef {
    pub id: String,
    #[serde(default)]
    pub archived: bool,
}

/// Directory gateway failures. `RateLimited` and `Conflict` are the
/// retryable classes and are only surfaced once their retry budgets are
/// exhausted; everything else is fatal on first sight.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory rate limit not cleared after {attempts} attempts")]
    RateLimited { attempts: usize },

    #[error("directory page update conflicted after {attempts} attempts: {message}")]
    Conflict { attempts: usize, message: String },

    #[error("directory request failed ({status}): {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("directory response is malformed: {0}")]
    Malformed(String),

    #[error("directory transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// External document store holding the human-facing mirror of the record
/// stores. Pages live in databases and are found by property equality.
#[async_trait]
pub trait DirectoryGateway: Send + Sync {
    async fn query_by_field(
        &self,
        database_id: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<PageRef>, DirectoryError>;

    async fn create_page(
        &self,
        database_id: &str,
        properties: Value,
    ) -> Result<PageRef, DirectoryError>;

    async fn update_page(
        &self,
        page_id: &str,
        properties: Value,
        archived: bool,
    ) -> Result<PageRef, DirectoryError>;
}

const RATE_LIMIT_ATTEMPTS: usize = 5;
const CONFLICT_ATTEMPTS: usize = 3;
const API_VERSION: &str = "2022-06-28";

/// Notion-shaped HTTP implementation of [`DirectoryGateway`].
///
/// The client is constructed by the caller and injected, so one client is
/// shared per process and tests can point the base URL at a stub server.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDirectory {
    pub fn new(client: reqwest::Client, base_url: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> Result<Value, DirectoryError> {
        let url = format!("{}{path}", self.base_url);

        for attempt in 0..RATE_LIMIT_ATTEMPTS {
            let response = self
                .client
                .request(method.clone(), url.as_str())
                .bearer_auth(&self.token)
                .header("Notion-Version", API_VERSION)
                .json(body)
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt + 1 == RATE_LIMIT_ATTEMPTS {
                    break;
                }
                let delay = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(parse_retry_after)
                    .unwrap_or_else(|| Duration::from_millis(500 * (attempt as u64 + 1)));
                tracing::debug!(
                    path,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "directory rate limited; backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let raw = response.text().await?;
            if !status.is_success() {
                let (code, message) = parse_error_body(&raw);
                return Err(DirectoryError::Status {
                    status: status.as_u16(),
                    code,
                    message: message
                        .unwrap_or_else(|| format!("directory request failed with status {status}")),
                });
            }

            return serde_json::from_str(&raw)
                .map_err(|err| DirectoryError::Malformed(format!("response body: {err}")));
        }

        Err(DirectoryError::RateLimited {
            attempts: RATE_LIMIT_ATTEMPTS,
        })
    }
}

#[async_trait]
impl DirectoryGateway for HttpDirectory {
    async fn query_by_field(
        &self,
        database_id: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<PageRef>, DirectoryError> {
        let body = serde_json::json!({
            "filter": {
                "property": field,
                "rich_text": { "equals": value }
            },
            "page_size": 1,
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/databases/{database_id}/query"),
                &body,
            )
            .await?;

        let Some(results) = response.get("results").and_then(|v| v.as_array()) else {
            return Err(DirectoryError::Malformed(
                "query response has no results array".to_string(),
            ));
        };

        results
            .iter()
            .map(|item| {
                serde_json::from_value(item.clone())
                    .map_err(|err| DirectoryError::Malformed(format!("query result: {err}")))
            })
            .collect()
    }

    async fn create_page(
        &self,
        database_id: &str,
        properties: Value,
    ) -> Result<PageRef, DirectoryError> {
        let body = serde_json::json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });

        let response = self.request(reqwest::Method::POST, "/v1/pages", &body).await?;
        page_ref_from(&response)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: Value,
        archived: bool,
    ) -> Result<PageRef, DirectoryError> {
        let body = serde_json::json!({
            "properties": properties,
            "archived": archived,
        });
        let path = format!("/v1/pages/{page_id}");

        let mut last_conflict = None;
        for attempt in 1..=CONFLICT_ATTEMPTS {
            match self.request(reqwest::Method::PATCH, &path, &body).await {
                Ok(response) => return page_ref_from(&response),
                Err(err) if is_conflict(&err) => {
                    tracing::debug!(page_id, attempt, "directory page update conflicted; retrying");
                    last_conflict = Some(err);
                    if attempt < CONFLICT_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(150 * attempt as u64)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(DirectoryError::Conflict {
            attempts: CONFLICT_ATTEMPTS,
            message: last_conflict
                .map(|err| err.to_string())
                .unwrap_or_default(),
        })
    }
}

fn is_conflict(err: &DirectoryError) -> bool {
    match err {
        DirectoryError::Status { status, code, .. } => {
            *status == 409 || code.as_deref() == Some("conflict_error")
        }
        _ => false,
    }
}

fn parse_retry_after(header: &str) -> Option<Duration> {
    let seconds: f64 = header.trim().parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

fn parse_error_body(raw: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return (None, None);
    };
    let code = value.get("code").and_then(|v| v.as_str()).map(str::to_owned);
    let message = value
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    (code, message)
}

fn page_ref_from(value: &Value) -> Result<PageRef, DirectoryError> {
    serde_json::from_value(value.clone())
        .map_err(|err| DirectoryError::Malformed(format!("page response: {err}")))
}
