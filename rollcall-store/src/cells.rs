//! Cell value encodings shared by the record modules.
//!
//! The backing service stores everything as text. Booleans come back as
//! `TRUE`/`FALSE` (or `1`/`0` from older rows); list-valued cells hold a JSON
//! array of strings.

use serde_json::Value;

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn format_bool(value: bool) -> String {
    if value { "TRUE" } else { "FALSE" }.to_string()
}

/// JSON string array; blank or malformed cells read as empty.
pub fn parse_list(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub fn format_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Comma-separated list cell ("Ann, Bo").
pub fn parse_csv(raw: &str) -> Vec<String> {
    rollcall_core::split_positions(raw)
}

/// Epoch milliseconds from a numeric cell or an RFC 3339 / `MM/DD/YYYY` date.
pub fn parse_epoch_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse().ok();
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    chrono::NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
