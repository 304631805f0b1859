//! Canonical JSON serialization used for cache fingerprints and request
//! signing, so two semantically-identical payloads never diverge on key
//! order (spec §4.6 Cache, §4.7 RequestSigner).

use serde_json::Value as Json;
use sha2::{Digest, Sha256};

pub fn canonicalize(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_json(value: &Json) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// Stable fingerprint of `(fn_name, input)` for Cache keying (spec §3
/// CacheEntry: `hash(fnName ∥ serialize(input))`).
pub fn fingerprint(fn_name: &str, input: &Json) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fn_name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(canonical_json(input).as_bytes());
    hex::encode(hasher.finalize())
}
