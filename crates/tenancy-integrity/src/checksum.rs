//! Checksum Manifests
//!
//! One manifest per data type, keyed by entry key. Checksums are SHA-256
//! over the canonical JSON encoding of each value.

use crate::model::DataType;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tenancy_common::digest::{canonical_bytes, sha256_hex, CHECKSUM_ALGORITHM};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    pub checksum: String,
    pub algorithm: String,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
}

impl ChecksumEntry {
    pub fn of(value: &Value) -> Self {
        let bytes = canonical_bytes(value);
        Self {
            checksum: sha256_hex(&bytes),
            algorithm: CHECKSUM_ALGORITHM.to_string(),
            size: bytes.len(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumVerification {
    pub verified: Vec<String>,
    pub mismatches: Vec<String>,
    /// Keys only in the data or only in the manifest
    pub missing: Vec<String>,
}

impl ChecksumVerification {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.missing.is_empty()
    }
}

#[derive(Default)]
pub struct ChecksumStore {
    manifests: DashMap<DataType, HashMap<String, ChecksumEntry>>,
}

impl ChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute and store checksums for every supplied key
    pub fn update(&self, data_type: DataType, data: &Map<String, Value>) -> usize {
        let mut manifest = self.manifests.entry(data_type).or_default();
        for (key, value) in data {
            manifest.insert(key.clone(), ChecksumEntry::of(value));
        }
        data.len()
    }

    pub fn record(&self, data_type: DataType, key: &str, value: &Value) {
        self.manifests
            .entry(data_type)
            .or_default()
            .insert(key.to_string(), ChecksumEntry::of(value));
    }

    pub fn drop_key(&self, data_type: DataType, key: &str) -> bool {
        self.manifests
            .get_mut(&data_type)
            .map(|mut m| m.remove(key).is_some())
            .unwrap_or(false)
    }

    pub fn verify(&self, data_type: DataType, data: &Map<String, Value>) -> ChecksumVerification {
        let mut outcome = ChecksumVerification::default();
        let manifest = self.manifests.get(&data_type);

        for (key, value) in data {
            match manifest.as_ref().and_then(|m| m.get(key)) {
                None => outcome.missing.push(key.clone()),
                Some(entry) if entry.checksum == sha256_hex(&canonical_bytes(value)) => {
                    outcome.verified.push(key.clone())
                }
                Some(_) => outcome.mismatches.push(key.clone()),
            }
        }
        if let Some(manifest) = &manifest {
            let mut stale: Vec<String> = manifest.keys().filter(|k| !data.contains_key(*k)).cloned().collect();
            stale.sort();
            outcome.missing.extend(stale);
        }
        outcome
    }

    pub fn manifest_sizes(&self) -> BTreeMap<DataType, usize> {
        self.manifests.iter().map(|m| (*m.key(), m.len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_round_trip_is_clean() {
        let store = ChecksumStore::new();
        let state = data(json!({"a": {"x": 1}, "b": [1, 2, 3]}));
        assert_eq!(store.update(DataType::State, &state), 2);
        let outcome = store.verify(DataType::State, &state);
        assert!(outcome.is_clean());
        assert_eq!(outcome.verified.len(), 2);
    }

    #[test]
    fn test_single_mutation_is_one_mismatch() {
        let store = ChecksumStore::new();
        let mut state = data(json!({"a": 1, "b": 2, "c": 3}));
        store.update(DataType::State, &state);
        state.insert("b".into(), json!(20));

        let outcome = store.verify(DataType::State, &state);
        assert_eq!(outcome.mismatches, vec!["b".to_string()]);
        assert!(outcome.missing.is_empty());
    }

    #[test]
    fn test_missing_both_ways() {
        let store = ChecksumStore::new();
        store.update(DataType::Cache, &data(json!({"old": 1, "kept": 2})));
        let outcome = store.verify(DataType::Cache, &data(json!({"kept": 2, "new": 3})));
        assert_eq!(outcome.missing, vec!["new".to_string(), "old".to_string()]);
    }

    #[test]
    fn test_manifests_are_per_type() {
        let store = ChecksumStore::new();
        store.update(DataType::State, &data(json!({"k": 1})));
        let outcome = store.verify(DataType::Config, &data(json!({"k": 1})));
        assert_eq!(outcome.missing, vec!["k".to_string()]);
        assert_eq!(store.manifest_sizes().get(&DataType::State), Some(&1));
    }
}
