//! Flattens one analytics event into the row layout of the columnar table.
//!
//! Multi-valued fields contribute their first value, scalars are stringified and
//! missing values become empty strings or zero, so every row carries every column.

use serde_json::{Map, Value};
use thiserror::Error;

/// Attribute keys promoted to their own columns.
const PROMOTED_ATTRIBUTES: &[&str] = &["session", "blogId", "networkId", "url", "date"];

const DEMOGRAPHIC_COLUMNS: &[(&str, &str)] = &[
    ("demographic_app_version", "AppVersion"),
    ("demographic_locale", "Locale"),
    ("demographic_make", "Make"),
    ("demographic_model", "Model"),
    ("demographic_model_version", "ModelVersion"),
    ("demographic_platform", "Platform"),
    ("demographic_platform_version", "PlatformVersion"),
    ("demographic_browser", "Browser"),
    ("demographic_browser_version", "BrowserVersion"),
    ("demographic_device_type", "DeviceType"),
];

const LOCATION_TEXT_COLUMNS: &[(&str, &str)] = &[
    ("location_city", "City"),
    ("location_country", "Country"),
    ("location_region", "Region"),
    ("location_postal_code", "PostalCode"),
];

const LOCATION_NUMBER_COLUMNS: &[(&str, &str)] = &[
    ("location_latitude", "Latitude"),
    ("location_longitude", "Longitude"),
];

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object")]
    NotAnObject,
}

pub fn transcode_line(line: &str) -> Result<Value, TranscodeError> {
    let event: Value = serde_json::from_str(line)?;
    if !event.is_object() {
        return Err(TranscodeError::NotAnObject);
    }
    Ok(flat_row(&event))
}

pub fn flat_row(event: &Value) -> Value {
    let attributes = event.get("attributes");
    let endpoint = event.get("endpoint");
    let demographic = endpoint.and_then(|e| e.get("Demographic"));
    let location = endpoint.and_then(|e| e.get("Location"));
    let user = endpoint.and_then(|e| e.get("User"));

    let event_timestamp = integer(event.get("event_timestamp"));
    let arrival_timestamp = match event.get("arrival_timestamp") {
        Some(value) if !value.is_null() => integer(Some(value)),
        _ => event_timestamp,
    };

    let mut row = Map::new();
    row.insert("event_type".into(), text(event.get("event_type")).into());
    row.insert("event_timestamp".into(), event_timestamp.into());
    row.insert("arrival_timestamp".into(), arrival_timestamp.into());
    row.insert("date".into(), text(field(attributes, "date")).into());
    row.insert("session_id".into(), text(field(attributes, "session")).into());
    row.insert("endpoint_id".into(), text(field(endpoint, "Id")).into());
    row.insert("blog_id".into(), text(field(attributes, "blogId")).into());
    row.insert("network_id".into(), text(field(attributes, "networkId")).into());
    row.insert("url".into(), text(field(attributes, "url")).into());
    row.insert(
        "attributes".into(),
        Value::Object(text_map(attributes, PROMOTED_ATTRIBUTES)),
    );
    row.insert(
        "metrics".into(),
        Value::Object(number_map(event.get("metrics"))),
    );
    row.insert(
        "endpoint_attributes".into(),
        Value::Object(text_map(field(endpoint, "Attributes"), &[])),
    );

    for (column, key) in DEMOGRAPHIC_COLUMNS {
        row.insert((*column).into(), text(field(demographic, key)).into());
    }
    for (column, key) in LOCATION_TEXT_COLUMNS {
        row.insert((*column).into(), text(field(location, key)).into());
    }
    for (column, key) in LOCATION_NUMBER_COLUMNS {
        row.insert((*column).into(), number(field(location, key)).into());
    }

    row.insert("user_id".into(), text(field(user, "UserId")).into());
    row.insert(
        "user_attributes".into(),
        Value::Object(text_map(field(user, "UserAttributes"), &[])),
    );

    Value::Object(row)
}

fn field<'a>(parent: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    parent.and_then(|value| value.get(key))
}

fn first(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first().and_then(first),
        Value::Null => None,
        other => Some(other),
    }
}

fn text(value: Option<&Value>) -> String {
    match value.and_then(first) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn number(value: Option<&Value>) -> f64 {
    match value.and_then(first) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn integer(value: Option<&Value>) -> i64 {
    match value.and_then(first) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

fn text_map(value: Option<&Value>, skip: &[&str]) -> Map<String, Value> {
    let Some(Value::Object(entries)) = value else {
        return Map::new();
    };
    entries
        .iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), Value::String(text(Some(value)))))
        .collect()
}

fn number_map(value: Option<&Value>) -> Map<String, Value> {
    let Some(Value::Object(entries)) = value else {
        return Map::new();
    };
    entries
        .iter()
        .map(|(key, value)| (key.clone(), Value::from(number(Some(value)))))
        .collect()
}
