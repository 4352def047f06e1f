//! Check input source
//!
//! Scheduled runs have no caller-supplied data, so the checker asks a
//! provider for the payload each check inspects. Payload shapes by check
//! type:
//!
//! - checksum: `{key: value, ..}`
//! - isolation: `{key: entry}` for one tenant, or `{tenant: {key: entry}}`
//!   when no tenant is given
//! - consistency: `{"state": .., "cache": .., "sync": ..}`
//! - reference / constraint / business: a record, an array of records, or
//!   `{"records": [..], "references": {collection: [ids]}}`

use crate::model::{IntegrityCheck, IntegrityIssue};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tenancy_common::{TenancyError, TenancyResult, TenantId};

#[async_trait]
pub trait IntegrityDataProvider: Send + Sync {
    /// Payload for `check`, optionally scoped to a tenant
    async fn fetch(&self, check: &IntegrityCheck, tenant: Option<&TenantId>) -> TenancyResult<Value>;

    /// Try to fix an issue the checker cannot fix itself. `Ok(false)` means
    /// the provider does not handle it.
    async fn resolve(&self, _issue: &IntegrityIssue) -> TenancyResult<bool> {
        Ok(false)
    }
}

/// Serves payloads registered per check id, optionally per tenant
#[derive(Default)]
pub struct StaticDataProvider {
    payloads: DashMap<(String, Option<TenantId>), Value>,
}

impl StaticDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, check_id: impl Into<String>, tenant: Option<&TenantId>, payload: Value) {
        self.payloads.insert((check_id.into(), tenant.cloned()), payload);
    }
}

#[async_trait]
impl IntegrityDataProvider for StaticDataProvider {
    async fn fetch(&self, check: &IntegrityCheck, tenant: Option<&TenantId>) -> TenancyResult<Value> {
        self.payloads
            .get(&(check.id.clone(), tenant.cloned()))
            .or_else(|| self.payloads.get(&(check.id.clone(), None)))
            .map(|p| p.value().clone())
            .ok_or_else(|| TenancyError::CheckExecutionError {
                check_id: check.id.clone(),
                message: "no data available".to_string(),
            })
    }
}
