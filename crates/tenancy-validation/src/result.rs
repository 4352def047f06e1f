//! Validation Results

use crate::schema::RuleSeverity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tenancy_common::TenantId;

/// One failed rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub rule_id: String,
    pub field: String,
    pub code: String,
    pub message: String,
    pub severity: RuleSeverity,
    /// The failing rule carries a remediation
    pub auto_fixable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub schema_id: String,
    pub schema_version: u32,
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
    pub rules_evaluated: usize,
    pub duration_us: u64,
    pub cache_hit: bool,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn error_codes(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.code.as_str()).collect()
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn issue_count(&self) -> usize {
        self.errors.len() + self.warnings.len() + self.info.len()
    }
}

/// Caller-supplied evaluation context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationContext {
    /// Tenant the data is validated for
    pub tenant_id: Option<TenantId>,
    /// Stop evaluating at the first error-severity failure
    pub stop_on_first_error: bool,
    /// Bypass the result cache for this call
    pub skip_cache: bool,
    /// Known ids for `reference` rules, by collection name
    pub references: HashMap<String, Vec<Value>>,
}

impl ValidationContext {
    pub fn for_tenant(tenant: &TenantId) -> Self {
        Self {
            tenant_id: Some(tenant.clone()),
            ..Default::default()
        }
    }

    pub fn stop_on_first_error(mut self) -> Self {
        self.stop_on_first_error = true;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn with_references(mut self, collection: impl Into<String>, ids: Vec<Value>) -> Self {
        self.references.insert(collection.into(), ids);
        self
    }
}

/// Output of `auto_fix`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixOutcome {
    pub data: Value,
    pub fixed: Vec<ValidationIssue>,
    pub unfixable: Vec<ValidationIssue>,
}

/// Engine counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub total_validations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failed_validations: u64,
    pub average_duration_us: f64,
    pub cached_results: u64,
    pub registered_schemas: usize,
}
