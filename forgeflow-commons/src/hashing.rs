//! Content hashing for artifact/tool versioning (`definition_hash`).

use sha2::{Digest, Sha256};

/// SHA-256 of a normalized serialization, hex-encoded. Normalization here
/// means: caller passes already-canonicalized content (e.g. a
/// `serde_json::Value` run through `to_string` after recursive key
/// sorting) so that semantically-identical artifacts/tools hash
/// identically regardless of field ordering.
pub fn definition_hash(normalized_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Recursively sort object keys in a JSON value so that two values that
/// differ only in key insertion order hash identically.
pub fn canonicalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize_json(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize_json).collect())
        }
        other => other.clone(),
    }
}

/// Hash a JSON value after canonicalizing key order.
pub fn definition_hash_of(value: &serde_json::Value) -> String {
    let canonical = canonicalize_json(value);
    definition_hash(&canonical.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_across_key_order() {
        let a = json!({"name": "x", "kind": "tool"});
        let b = json!({"kind": "tool", "name": "x"});
        assert_eq!(definition_hash_of(&a), definition_hash_of(&b));
    }

    #[test]
    fn hash_changes_with_content() {
        let a = json!({"name": "x"});
        let b = json!({"name": "y"});
        assert_ne!(definition_hash_of(&a), definition_hash_of(&b));
    }
}
