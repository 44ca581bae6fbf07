//! Deterministic cache keys derived from the effective query.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix of every key written by the engine.
pub const KEY_PREFIX: &str = "georise:gis";

/// Recursively sorts object keys so that equal values serialize to equal
/// text regardless of insertion order.
#[must_use]
pub fn canonical_json(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonical_json(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical_json).collect()),
        other => other,
    }
}

/// Hashes the canonical JSON of `fingerprint` into
/// `georise:gis:{namespace}:{sha256 hex}`.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if `fingerprint` cannot be serialized.
pub fn derive<T: Serialize>(namespace: &str, fingerprint: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(serde_json::to_value(fingerprint)?);
    let digest = Sha256::digest(serde_json::to_vec(&canonical)?);
    Ok(format!("{KEY_PREFIX}:{namespace}:{}", hex::encode(digest)))
}
