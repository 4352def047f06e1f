//! External collaborator contracts
//!
//! The isolation core does not own the cache layer, the per-tenant state
//! layer, or durable audit storage. These traits describe what it needs
//! from them.

use crate::audit::SecurityAuditEvent;
use crate::{TenancyResult, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Tenant-namespaced cache.
///
/// Implementations must guarantee that `get(key, b)` never returns a value
/// written by `set(key, value, CacheSetOptions { tenant: a, .. })`.
#[async_trait]
pub trait TenantCache: Send + Sync {
    /// Read a key inside the tenant's namespace
    async fn get(&self, key: &str, tenant: &TenantId) -> TenancyResult<Option<serde_json::Value>>;

    /// Write a key inside `options.tenant`'s namespace
    async fn set(&self, key: &str, value: serde_json::Value, options: CacheSetOptions) -> TenancyResult<()>;

    /// Drop every entry matching the pattern, returning how many were removed
    async fn invalidate(&self, pattern: &KeyPattern) -> TenancyResult<usize>;

    /// Hit/miss counters for a tenant
    async fn metrics(&self, tenant: &TenantId) -> TenancyResult<CacheMetrics>;
}

/// Options for a cache write
#[derive(Debug, Clone)]
pub struct CacheSetOptions {
    pub tenant: TenantId,
    pub ttl: Option<Duration>,
    pub tier: CacheTier,
}

impl CacheSetOptions {
    pub fn for_tenant(tenant: &TenantId) -> Self {
        Self {
            tenant: tenant.clone(),
            ttl: None,
            tier: CacheTier::Warm,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tier(mut self, tier: CacheTier) -> Self {
        self.tier = tier;
        self
    }
}

/// Cache storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
}

/// Invalidation pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Whole tenant namespace
    Namespace(TenantId),
    /// Keys starting with prefix inside a namespace
    Prefix { tenant: TenantId, prefix: String },
    /// One key
    Exact { tenant: TenantId, key: String },
}

impl KeyPattern {
    /// Does `(tenant, key)` fall under this pattern
    pub fn matches(&self, tenant: &TenantId, key: &str) -> bool {
        match self {
            Self::Namespace(t) => t == tenant,
            Self::Prefix { tenant: t, prefix } => t == tenant && key.starts_with(prefix.as_str()),
            Self::Exact { tenant: t, key: k } => t == tenant && k == key,
        }
    }
}

/// Cache counters for one tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub hit_ratio: f64,
}

/// Factory for per-tenant state manager instances
#[async_trait]
pub trait StateManagerFactory: Send + Sync {
    /// Return the tenant's instance, creating it if needed
    async fn get_or_create(&self, tenant: &TenantId, options: StateOptions) -> TenancyResult<StateHandle>;

    /// Tear down the tenant's instance; false if none existed
    async fn destroy(&self, tenant: &TenantId) -> TenancyResult<bool>;
}

/// Options for state instance creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateOptions {
    pub memory_limit_mb: Option<u64>,
    pub storage_limit_mb: Option<u64>,
    pub preload: bool,
}

/// Handle to a tenant state instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHandle {
    pub tenant: TenantId,
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit event ingestion
pub trait AuditSink: Send + Sync {
    fn ingest(&self, event: &SecurityAuditEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pattern_scopes_to_tenant() {
        let a = TenantId::from("a");
        let b = TenantId::from("b");
        let ns = KeyPattern::Namespace(a.clone());
        assert!(ns.matches(&a, "anything"));
        assert!(!ns.matches(&b, "anything"));

        let prefix = KeyPattern::Prefix { tenant: a.clone(), prefix: "session:".into() };
        assert!(prefix.matches(&a, "session:1"));
        assert!(!prefix.matches(&a, "state:1"));
        assert!(!prefix.matches(&b, "session:1"));
    }
}
