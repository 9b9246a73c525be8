use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Failure injection for the stub directory server.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStubConfig {
    /// Respond 429 (with `Retry-After: 0`) to this many requests first.
    pub rate_limit_first: usize,
    /// Respond 409 to this many PATCH requests first.
    pub conflict_patches_first: usize,
    /// Respond 500 to PATCH requests whose body mentions this marker.
    pub fail_patch_containing: Option<String>,
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct StubPage {
    pub database_id: String,
    pub properties: Value,
    pub archived: bool,
}

#[derive(Debug, Default)]
struct StubState {
    pages: HashMap<String, StubPage>,
    next_page: usize,
    requests: Vec<(String, String)>,
    rate_limited: usize,
    conflicted: usize,
}

/// Minimal in-memory directory API: create, query-by-property, patch.
pub struct DirectoryStub {
    pub base_url: String,
    state: Arc<Mutex<StubState>>,
    config: Arc<Mutex<DirectoryStubConfig>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl DirectoryStub {
    pub fn spawn(config: DirectoryStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start directory stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let state = Arc::new(Mutex::new(StubState::default()));
        let config = Arc::new(Mutex::new(config));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);
        let thread_config = Arc::clone(&config);

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let method = request.method().to_string();
                let path = request.url().to_string();
                let mut raw_body = String::new();
                let _ = std::io::Read::read_to_string(request.as_reader(), &mut raw_body);
                let body: Value = serde_json::from_str(&raw_body).unwrap_or(Value::Null);

                let config = thread_config.lock().unwrap().clone();
                let (status, response_body) =
                    handle_request(&thread_state, &config, &method, &path, &body, &raw_body);

                let mut response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(status);
                let content_type =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build content-type header");
                response = response.with_header(content_type);
                if status == 429 {
                    let retry_after =
                        tiny_http::Header::from_bytes(&b"Retry-After"[..], &b"0"[..])
                            .expect("build retry-after header");
                    response = response.with_header(retry_after);
                }
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            state,
            config,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Swap the failure-injection config mid-test.
    pub fn set_config(&self, config: DirectoryStubConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn pages(&self) -> HashMap<String, StubPage> {
        self.state.lock().unwrap().pages.clone()
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().unwrap().pages.len()
    }

    /// Find a page by the text of one of its rich-text properties.
    pub fn page_by_property(&self, field: &str, value: &str) -> Option<(String, StubPage)> {
        self.state
            .lock()
            .unwrap()
            .pages
            .iter()
            .find(|(_, page)| property_text(&page.properties, field).as_deref() == Some(value))
            .map(|(id, page)| (id.clone(), page.clone()))
    }
}

impl Drop for DirectoryStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(
    state: &Arc<Mutex<StubState>>,
    config: &DirectoryStubConfig,
    method: &str,
    path: &str,
    body: &Value,
    raw_body: &str,
) -> (u16, Value) {
    let mut state = state.lock().unwrap();
    state.requests.push((method.to_string(), path.to_string()));

    if state.rate_limited < config.rate_limit_first {
        state.rate_limited += 1;
        return (
            429,
            json!({ "code": "rate_limited", "message": "stub rate limit" }),
        );
    }

    if method == "POST" && path == "/v1/pages" {
        let database_id = body
            .pointer("/parent/database_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let properties = body.get("properties").cloned().unwrap_or(Value::Null);

        state.next_page += 1;
        let id = format!("stub-page-{}", state.next_page);
        state.pages.insert(
            id.clone(),
            StubPage {
                database_id,
                properties,
                archived: false,
            },
        );
        return (200, json!({ "id": id, "archived": false }));
    }

    if method == "POST"
        && let Some(database_id) = path
            .strip_prefix("/v1/databases/")
            .and_then(|rest| rest.strip_suffix("/query"))
    {
        let field = body.pointer("/filter/property").and_then(Value::as_str);
        let value = body
            .pointer("/filter/rich_text/equals")
            .and_then(Value::as_str);
        let (Some(field), Some(value)) = (field, value) else {
            return (
                400,
                json!({ "code": "validation_error", "message": "unsupported filter" }),
            );
        };

        let results: Vec<Value> = state
            .pages
            .iter()
            .filter(|(_, page)| {
                page.database_id == database_id
                    && property_text(&page.properties, field).as_deref() == Some(value)
            })
            .map(|(id, page)| json!({ "id": id, "archived": page.archived }))
            .collect();
        return (200, json!({ "results": results }));
    }

    if method == "PATCH"
        && let Some(page_id) = path.strip_prefix("/v1/pages/")
    {
        if state.conflicted < config.conflict_patches_first {
            state.conflicted += 1;
            return (
                409,
                json!({ "code": "conflict_error", "message": "stub conflict" }),
            );
        }
        if let Some(marker) = &config.fail_patch_containing
            && raw_body.contains(marker.as_str())
        {
            return (
                500,
                json!({ "code": "internal_server_error", "message": "stub patch failure" }),
            );
        }

        let page_id = page_id.to_string();
        let Some(page) = state.pages.get_mut(&page_id) else {
            return (
                404,
                json!({ "code": "object_not_found", "message": "no such page" }),
            );
        };

        if let (Value::Object(current), Some(Value::Object(patch))) =
            (&mut page.properties, body.get("properties"))
        {
            for (key, value) in patch {
                current.insert(key.clone(), value.clone());
            }
        }
        if let Some(archived) = body.get("archived").and_then(Value::as_bool) {
            page.archived = archived;
        }
        return (200, json!({ "id": page_id, "archived": page.archived }));
    }

    (404, json!({ "code": "not_found", "message": "unhandled route" }))
}

fn property_text(properties: &Value, field: &str) -> Option<String> {
    properties
        .get(field)?
        .pointer("/rich_text/0/text/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}
