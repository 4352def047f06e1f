//! Content fingerprints
//!
//! `serde_json::Value` objects keep keys sorted, so the compact encoding of a
//! value is canonical and two equal values always hash the same.

use sha2::{Digest, Sha256};

/// Algorithm label recorded next to stored checksums
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// SHA-256 hex digest of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonical byte encoding of a JSON value
pub fn canonical_bytes(value: &serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Fingerprint of a JSON value
pub fn fingerprint(value: &serde_json::Value) -> String {
    sha256_hex(&canonical_bytes(value))
}

/// Fingerprint of several values taken together
pub fn fingerprint_all<'a>(values: impl IntoIterator<Item = &'a serde_json::Value>) -> String {
    let mut hasher = Sha256::new();
    for value in values {
        let bytes = canonical_bytes(value);
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_distinct_values_differ() {
        assert_ne!(fingerprint(&json!({"a": 1})), fingerprint(&json!({"a": 2})));
        assert_eq!(fingerprint(&json!(null)).len(), 64);
    }

    #[test]
    fn test_fingerprint_all_is_length_prefixed() {
        let split = fingerprint_all([&json!("ab"), &json!("c")]);
        let joined = fingerprint_all([&json!("a"), &json!("bc")]);
        assert_ne!(split, joined);
    }
}
