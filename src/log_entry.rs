use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw backend record: field name to value, in backend order.
pub type Record = Map<String, Value>;

pub const MESSAGE_FIELD: &str = "message";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A single log entry returned by a query set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Query set the entry came from
    pub section: String,
    /// Query string that matched it
    pub query: String,
    /// Record restricted to the configured output fields, in configured order
    pub fields: Map<String, Value>,
    /// Full message text as returned by the backend
    pub message: String,
}

impl LogEntry {
    pub fn new(section: String, query: String, fields: Map<String, Value>, message: String) -> Self {
        Self {
            section,
            query,
            fields,
            message,
        }
    }
}

/// Message text of a record; non-string values are rendered as JSON.
pub fn message_text(record: &Record) -> String {
    match record.get(MESSAGE_FIELD) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Keeps exactly `output_fields` that are present, in `output_fields` order.
pub fn project(record: &Record, output_fields: &[String], tz: &FixedOffset) -> Map<String, Value> {
    let mut fields = Map::new();
    for name in output_fields {
        let Some(value) = record.get(name) else {
            continue;
        };
        let value = if name == TIMESTAMP_FIELD {
            parse_timestamp(value)
                .map(|dt| Value::String(format_timestamp(&dt, tz)))
                .unwrap_or_else(|| value.clone())
        } else {
            value.clone()
        };
        fields.insert(name.clone(), value);
    }
    fields
}

/// Graylog timestamps arrive as ISO 8601 strings or unix seconds/milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(from_epoch)),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(ts: f64) -> Option<DateTime<Utc>> {
    let millis = if ts > 1e12 { ts } else { ts * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

pub fn format_timestamp(dt: &DateTime<Utc>, tz: &FixedOffset) -> String {
    dt.with_timezone(tz).format("%Y-%m-%d %H:%M:%S %z").to_string()
}
