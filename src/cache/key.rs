//! Canonical cache key derivation.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Derives a fixed-length key from lookup parameters.
///
/// Object keys are sorted and `null` members dropped before hashing, so two
/// logically identical lookups produce the same key whatever their field order.
#[must_use]
pub fn cache_key<T: Serialize + ?Sized>(params: &T) -> String {
    let canonical = canonicalize(serde_json::to_value(params).unwrap_or(Value::Null));
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
