//! Best-effort, size-bounded JSON snapshots for traces and debug pauses.

use serde::Serialize;
use serde_json::json;

/// Serialize `value`, replacing it by a marker when it fails to serialize
/// or its JSON form exceeds `max_bytes`.
pub fn bounded<T: Serialize + ?Sized>(value: &T, max_bytes: usize) -> serde_json::Value {
    match serde_json::to_string(value) {
        Ok(text) if text.len() > max_bytes => json!({
            "$truncated": true,
            "bytes": text.len(),
            "preview": preview(&text, 128),
        }),
        Ok(text) => serde_json::from_str(&text).unwrap_or(serde_json::Value::Null),
        Err(e) => json!({ "$unserializable": e.to_string() }),
    }
}

/// Leading `max` characters of `s`, cut on a char boundary.
fn preview(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
