use std::collections::VecDeque;

use serde_json::{Map, Value};

const MAX_DEPTH: usize = 16;
const MAX_NODES: usize = 4096;
const MAX_PROPERTY_DEPTH: usize = 8;

/// Fields extracted from an inbound webhook payload. Both are optional:
/// extraction is best-effort and never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEvent {
    pub asin: Option<String>,
    pub status: Option<String>,
}

/// Extract `(asin, status)` from a heterogeneous inbound payload.
///
/// Shapes are tried in priority order: flat top-level fields, then a JSON
/// `body` string field, then a bounded breadth-first scan of nested
/// containers and their `properties` documents. The payload tree is
/// acyclic, so the depth and node bounds exist to cap pathological
/// nesting, not to break cycles.
pub fn normalize(payload: &Value) -> InboundEvent {
    let mut event = InboundEvent {
        asin: direct_field(payload, "asin"),
        status: direct_field(payload, "status"),
    };
    if event.asin.is_some() && event.status.is_some() {
        return event;
    }

    if let Some(body) = payload.get("body").and_then(Value::as_str)
        && let Ok(parsed) = serde_json::from_str::<Value>(body)
    {
        let nested = scan(&parsed);
        event.asin = event.asin.or(nested.asin);
        event.status = event.status.or(nested.status);
        if event.asin.is_some() && event.status.is_some() {
            return event;
        }
    }

    let scanned = scan(payload);
    event.asin = event.asin.or(scanned.asin);
    event.status = event.status.or(scanned.status);
    event
}

/// Like [`normalize`], but from a raw request body. Unparseable bodies
/// yield an empty event rather than an error.
pub fn normalize_raw(raw: &str) -> InboundEvent {
    serde_json::from_str::<Value>(raw)
        .map(|payload| normalize(&payload))
        .unwrap_or_default()
}

fn direct_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).and_then(nonempty)
}

fn scan(root: &Value) -> InboundEvent {
    let mut asin = None;
    let mut status = None;
    let mut containers: Vec<&Map<String, Value>> = Vec::new();

    let mut queue: VecDeque<(&Value, usize)> = VecDeque::new();
    queue.push_back((root, 0));
    let mut visited = 0usize;

    while let Some((value, depth)) = queue.pop_front() {
        visited += 1;
        if visited > MAX_NODES {
            break;
        }

        match value {
            Value::Array(items) => {
                if depth < MAX_DEPTH {
                    for item in items {
                        queue.push_back((item, depth + 1));
                    }
                }
            }
            Value::Object(map) => {
                if asin.is_none() {
                    asin = map.get("asin").and_then(Value::as_str).and_then(nonempty);
                }
                if status.is_none() {
                    status = map.get("status").and_then(Value::as_str).and_then(nonempty);
                }
                if asin.is_some() && status.is_some() {
                    return InboundEvent { asin, status };
                }

                if let Some(Value::Object(props)) = map.get("properties") {
                    containers.push(props);
                }
                if depth < MAX_DEPTH {
                    for child in map.values() {
                        queue.push_back((child, depth + 1));
                    }
                }
            }
            _ => {}
        }
    }

    // direct fields nowhere in the tree; fall back to property documents
    for props in containers {
        if asin.is_none() {
            asin = property_lookup(props, "asin");
        }
        if status.is_none() {
            status = property_lookup(props, "status");
        }
        if asin.is_some() && status.is_some() {
            break;
        }
    }

    InboundEvent { asin, status }
}

/// Find a property whose normalized key equals or ends with `target`
/// ("Book ASIN" matches "asin") and extract its text value.
fn property_lookup(props: &Map<String, Value>, target: &str) -> Option<String> {
    for (key, value) in props {
        let normalized = normalize_key(key);
        if normalized == target || normalized.ends_with(target) {
            if let Some(text) = property_value_text(value, 0) {
                return Some(text);
            }
        }
    }
    None
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Dig the display text out of a directory property value, whatever its
/// variant: rich text fragments, select/status names, formulas, scalars.
fn property_value_text(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_PROPERTY_DEPTH {
        return None;
    }

    match value {
        Value::String(text) => nonempty(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => items
            .iter()
            .find_map(|item| property_value_text(item, depth + 1)),
        Value::Object(map) => {
            for key in ["plain_text", "name", "content"] {
                if let Some(text) = map.get(key).and_then(Value::as_str) {
                    return nonempty(text);
                }
            }
            for key in ["status", "select", "formula", "text", "rich_text", "title", "multi_select"] {
                if let Some(inner) = map.get(key)
                    && let Some(text) = property_value_text(inner, depth + 1)
                {
                    return Some(text);
                }
            }
            for key in ["string", "number", "boolean", "checkbox", "value"] {
                match map.get(key) {
                    Some(Value::String(text)) => return nonempty(text),
                    Some(Value::Number(number)) => return Some(number.to_string()),
                    Some(Value::Bool(flag)) => return Some(flag.to_string()),
                    _ => {}
                }
            }
            None
        }
        Value::Null => None,
    }
}

fn nonempty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn flat_fields_win() {
        let event = normalize(&json!({ "asin": "B001", "status": "Finished" }));
        assert_eq!(event.asin.as_deref(), Some("B001"));
        assert_eq!(event.status.as_deref(), Some("Finished"));
    }

    #[test]
    fn flat_fields_take_precedence_over_nested_ones() {
        let event = normalize(&json!({
            "asin": "B001",
            "status": "Finished",
            "body": r#"{"asin":"B999","status":"Discarded"}"#,
        }));
        assert_eq!(event.asin.as_deref(), Some("B001"));
        assert_eq!(event.status.as_deref(), Some("Finished"));
    }

    #[test]
    fn body_string_is_parsed_and_scanned() {
        let event = normalize(&json!({
            "body": r#"{"data":{"asin":"B002","status":"In progress"}}"#,
        }));
        assert_eq!(event.asin.as_deref(), Some("B002"));
        assert_eq!(event.status.as_deref(), Some("In progress"));
    }

    #[test]
    fn unparseable_body_yields_absent_fields() {
        let event = normalize(&json!({ "body": "not json at all" }));
        assert_eq!(event, InboundEvent::default());

        assert_eq!(normalize_raw("also { not json"), InboundEvent::default());
    }

    #[test]
    fn directory_properties_are_searched_by_normalized_key() {
        let event = normalize(&json!({
            "data": {
                "properties": {
                    "Book ASIN": {
                        "type": "rich_text",
                        "rich_text": [{ "text": { "content": "B003" }, "plain_text": "B003" }],
                    },
                    "Status": {
                        "type": "status",
                        "status": { "name": "Finished" },
                    },
                },
            },
        }));
        assert_eq!(event.asin.as_deref(), Some("B003"));
        assert_eq!(event.status.as_deref(), Some("Finished"));
    }

    #[test]
    fn direct_fields_anywhere_beat_property_documents() {
        let event = normalize(&json!({
            "envelope": { "payload": { "asin": "B004" } },
            "data": {
                "properties": {
                    "ASIN": { "rich_text": [{ "plain_text": "B999" }] },
                    "Status": { "status": { "name": "Discarded" } },
                },
            },
        }));
        assert_eq!(event.asin.as_deref(), Some("B004"));
        assert_eq!(event.status.as_deref(), Some("Discarded"));
    }

    #[test]
    fn numeric_property_values_become_strings() {
        let props = json!({
            "properties": { "ASIN": { "type": "number", "number": 42 } },
        });
        let event = normalize(&props);
        assert_eq!(event.asin.as_deref(), Some("42"));
    }

    #[test]
    fn formula_and_select_shapes_are_unwrapped() {
        let event = normalize(&json!({
            "properties": {
                "ASIN": { "formula": { "string": "B005" } },
                "Reading Status": { "select": { "name": "In progress" } },
            },
        }));
        assert_eq!(event.asin.as_deref(), Some("B005"));
        assert_eq!(event.status.as_deref(), Some("In progress"));
    }

    #[test]
    fn blank_strings_count_as_absent() {
        let event = normalize(&json!({ "asin": "   ", "status": "" }));
        assert_eq!(event, InboundEvent::default());
    }

    #[test]
    fn nesting_beyond_the_depth_bound_is_ignored() {
        let mut payload = json!({ "asin": "B006" });
        for _ in 0..(MAX_DEPTH + 4) {
            payload = json!({ "wrap": payload });
        }
        let event = normalize(&payload);
        assert_eq!(event.asin, None);
    }

    #[test]
    fn arrays_are_traversed() {
        let event = normalize(&json!({
            "events": [
                { "kind": "noise" },
                { "asin": "B007", "status": "Finished" },
            ],
        }));
        assert_eq!(event.asin.as_deref(), Some("B007"));
        assert_eq!(event.status.as_deref(), Some("Finished"));
    }
}
