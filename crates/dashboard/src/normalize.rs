//! Reconciles the backend's response envelopes into one record list.
//!
//! Endpoints evolved independently: some return a bare array, some wrap it
//! under an endpoint-specific key, some under a generic one. Consumers only
//! ever see the list.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Wrapper keys checked before falling back to a scan, in priority order.
pub const KNOWN_LIST_FIELDS: [&str; 4] = ["historical_data", "token_events", "results", "watchlist"];

/// Extracts the record list from `payload`.
///
/// - a bare array is returned as-is;
/// - an object with a known wrapper key holding an array yields that array;
/// - otherwise the first array-valued field in document order is used;
/// - anything else yields an empty list.
pub fn normalize(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in KNOWN_LIST_FIELDS {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = map.remove(key) {
                        return items;
                    }
                }
            }
            // `serde_json` is built with `preserve_order`, so this is document order.
            map.into_iter()
                .find_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// [`normalize`] followed by typed decoding. Elements that do not decode as
/// `R` are skipped.
pub fn normalize_as<R: DeserializeOwned>(payload: Value) -> Vec<R> {
    let items = normalize(payload);
    let total = items.len();
    let records: Vec<R> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if records.len() < total {
        debug!(
            skipped = total - records.len(),
            total, "dropped records that did not match the expected shape"
        );
    }
    records
}
