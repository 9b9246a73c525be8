use chrono::NaiveDate;
use serde_json::{Map, Value, json};

use crate::status::BookStatus;

/// Property the book database is queried by.
pub const BOOK_KEY_FIELD: &str = "ASIN";
/// Property the series database is queried by.
pub const SERIES_KEY_FIELD: &str = "Series Key";

/// Property values for a book page.
#[derive(Debug, Clone)]
pub struct BookPageProps<'a> {
    pub title: &'a str,
    pub asin: &'a str,
    pub status: BookStatus,
    /// Series relation; only set for books that cascade.
    pub series_page_id: Option<&'a str>,
    pub series_order: Option<u32>,
    pub purchased_at: Option<NaiveDate>,
    pub source: Option<&'a str>,
    pub owned: bool,
}

/// Full property document for creating or patching a book page.
pub fn book_properties(props: &BookPageProps<'_>) -> Value {
    let mut map = Map::new();
    map.insert("Name".to_string(), title_property(props.title));
    map.insert("ASIN".to_string(), rich_text_property(props.asin));
    map.insert("Status".to_string(), status_property(props.status));
    if let Some(series_page_id) = props.series_page_id {
        map.insert("Series".to_string(), relation_property(series_page_id));
    }
    map.insert("Series Order".to_string(), number_property(props.series_order));
    map.insert("Purchased At".to_string(), date_property(props.purchased_at));
    if let Some(source) = props.source {
        map.insert("Source".to_string(), select_property(source));
    }
    map.insert("Owned".to_string(), checkbox_property(props.owned));
    Value::Object(map)
}

/// Minimal patch touching only a book's status.
pub fn book_status_patch(status: BookStatus) -> Value {
    json!({ "Status": status_property(status) })
}

/// Property document for creating a series page.
pub fn series_properties(series_name: &str, series_key: &str) -> Value {
    json!({
        "Name": title_property(series_name),
        "Series Key": rich_text_property(series_key),
    })
}

/// Minimal patch touching only a series' aggregate status.
pub fn series_status_patch(status: BookStatus) -> Value {
    json!({ "Final Status": status_property(status) })
}

fn title_property(content: &str) -> Value {
    json!({ "title": [{ "text": { "content": content } }] })
}

fn rich_text_property(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

fn status_property(status: BookStatus) -> Value {
    json!({ "status": { "name": status.label() } })
}

fn relation_property(page_id: &str) -> Value {
    json!({ "relation": [{ "id": page_id }] })
}

fn number_property(value: Option<u32>) -> Value {
    json!({ "number": value })
}

fn date_property(start: Option<NaiveDate>) -> Value {
    match start {
        Some(start) => json!({ "date": { "start": start.to_string() } }),
        None => json!({ "date": null }),
    }
}

fn select_property(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

fn checkbox_property(value: bool) -> Value {
    json!({ "checkbox": value })
}
