//! In-memory collaborators
//!
//! Reference implementations of the collaborator traits, used by tests and
//! by single-process embeddings.

use crate::audit::SecurityAuditEvent;
use crate::collaborators::{
    AuditSink, CacheMetrics, CacheSetOptions, KeyPattern, StateHandle,
    StateManagerFactory, StateOptions, TenantCache,
};
use crate::{TenancyResult, TenantId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::time::Instant;

/// Tenant-namespaced cache keyed by `(tenant, key)`
pub struct InMemoryTenantCache {
    entries: DashMap<(TenantId, String), CacheEntry>,
    counters: DashMap<TenantId, Counters>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
}

impl InMemoryTenantCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            counters: DashMap::new(),
        }
    }

    /// Entries currently stored for a tenant (expired ones included until read)
    pub fn len_for(&self, tenant: &TenantId) -> usize {
        self.entries.iter().filter(|e| &e.key().0 == tenant).count()
    }

    fn count(&self, tenant: &TenantId, hit: bool) {
        let mut counters = self.counters.entry(tenant.clone()).or_default();
        if hit {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
    }
}

impl Default for InMemoryTenantCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantCache for InMemoryTenantCache {
    async fn get(&self, key: &str, tenant: &TenantId) -> TenancyResult<Option<serde_json::Value>> {
        let slot = (tenant.clone(), key.to_string());
        let found = self.entries.get(&slot).map(|e| (e.value.clone(), e.expires_at));
        match found {
            Some((_, Some(at))) if at <= Instant::now() => {
                self.entries.remove(&slot);
                self.count(tenant, false);
                Ok(None)
            }
            Some((value, _)) => {
                self.count(tenant, true);
                Ok(Some(value))
            }
            None => {
                self.count(tenant, false);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, options: CacheSetOptions) -> TenancyResult<()> {
        let entry = CacheEntry {
            value,
            expires_at: options.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert((options.tenant, key.to_string()), entry);
        Ok(())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> TenancyResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|(tenant, key), _| !pattern.matches(tenant, key));
        let removed = before.saturating_sub(self.entries.len());
        tracing::debug!(?pattern, removed, "cache invalidated");
        Ok(removed)
    }

    async fn metrics(&self, tenant: &TenantId) -> TenancyResult<CacheMetrics> {
        let counters = self.counters.get(tenant).map(|c| *c).unwrap_or_default();
        let total = counters.hits + counters.misses;
        Ok(CacheMetrics {
            hits: counters.hits,
            misses: counters.misses,
            entries: self.len_for(tenant),
            hit_ratio: if total > 0 { counters.hits as f64 / total as f64 } else { 0.0 },
        })
    }
}

/// One state instance per tenant
pub struct InMemoryStateManager {
    instances: DashMap<TenantId, StateHandle>,
}

impl InMemoryStateManager {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.instances.contains_key(tenant)
    }

    pub fn count(&self) -> usize {
        self.instances.len()
    }
}

impl Default for InMemoryStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateManagerFactory for InMemoryStateManager {
    async fn get_or_create(&self, tenant: &TenantId, _options: StateOptions) -> TenancyResult<StateHandle> {
        let handle = self
            .instances
            .entry(tenant.clone())
            .or_insert_with(|| StateHandle {
                tenant: tenant.clone(),
                instance_id: uuid::Uuid::new_v4(),
                created_at: chrono::Utc::now(),
            })
            .clone();
        Ok(handle)
    }

    async fn destroy(&self, tenant: &TenantId) -> TenancyResult<bool> {
        Ok(self.instances.remove(tenant).is_some())
    }
}

/// Keeps every ingested event in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<SecurityAuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityAuditEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn ingest(&self, event: &SecurityAuditEvent) {
        self.events.write().push(event.clone());
    }
}

/// Emits every event as a structured `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn ingest(&self, event: &SecurityAuditEvent) {
        tracing::info!(
            target: "tenancy::audit",
            event_id = %event.id,
            event_type = ?event.event_type,
            severity = ?event.severity,
            outcome = ?event.outcome,
            tenant = event.tenant_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
            hash = %event.hash,
            "security audit event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cache_namespaces_do_not_leak() {
        let cache = InMemoryTenantCache::new();
        let a = TenantId::from("a");
        let b = TenantId::from("b");

        cache.set("k", json!({"tenant": "a"}), CacheSetOptions::for_tenant(&a)).await.unwrap();

        assert!(cache.get("k", &a).await.unwrap().is_some());
        assert!(cache.get("k", &b).await.unwrap().is_none());

        let metrics = cache.metrics(&b).await.unwrap();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 0);
    }

    #[tokio::test]
    async fn test_cache_ttl_expiry() {
        let cache = InMemoryTenantCache::new();
        let a = TenantId::from("a");
        cache
            .set("k", json!(1), CacheSetOptions::for_tenant(&a).with_ttl(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("k", &a).await.unwrap().is_none());
        assert_eq!(cache.len_for(&a), 0);
    }

    #[tokio::test]
    async fn test_namespace_invalidation() {
        let cache = InMemoryTenantCache::new();
        let a = TenantId::from("a");
        let b = TenantId::from("b");
        cache.set("x", json!(1), CacheSetOptions::for_tenant(&a)).await.unwrap();
        cache.set("y", json!(2), CacheSetOptions::for_tenant(&a)).await.unwrap();
        cache.set("x", json!(3), CacheSetOptions::for_tenant(&b)).await.unwrap();

        let removed = cache.invalidate(&KeyPattern::Namespace(a.clone())).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.len_for(&b), 1);
    }

    #[test]
    fn test_prefix_invalidation_stays_in_namespace() {
        let cache = InMemoryTenantCache::new();
        let a = TenantId::from("a");
        let b = TenantId::from("b");
        tokio_test::block_on(async {
            cache.set("probe:1", json!(1), CacheSetOptions::for_tenant(&a)).await.unwrap();
            cache.set("probe:2", json!(2), CacheSetOptions::for_tenant(&a)).await.unwrap();
            cache.set("other", json!(3), CacheSetOptions::for_tenant(&a)).await.unwrap();
            cache.set("probe:1", json!(4), CacheSetOptions::for_tenant(&b)).await.unwrap();

            let pattern = KeyPattern::Prefix {
                tenant: a.clone(),
                prefix: "probe:".to_string(),
            };
            assert_eq!(cache.invalidate(&pattern).await.unwrap(), 2);
        });
        assert_eq!(cache.len_for(&a), 1);
        assert_eq!(cache.len_for(&b), 1);
    }

    #[tokio::test]
    async fn test_state_manager_instances_are_per_tenant() {
        let state = InMemoryStateManager::new();
        let a = TenantId::from("a");
        let first = state.get_or_create(&a, StateOptions::default()).await.unwrap();
        let again = state.get_or_create(&a, StateOptions::default()).await.unwrap();
        let other = state.get_or_create(&TenantId::from("b"), StateOptions::default()).await.unwrap();

        assert_eq!(first.instance_id, again.instance_id);
        assert_ne!(first.instance_id, other.instance_id);
        assert!(state.destroy(&a).await.unwrap());
        assert!(!state.destroy(&a).await.unwrap());
    }
}
