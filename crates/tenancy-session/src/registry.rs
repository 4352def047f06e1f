//! Session Registry & Switching Engine

use crate::model::{
    Session, SessionOptions, SessionStatus, SwitchOptions, TerminationReason, SESSION_BOUNDARIES,
};
use crate::profile::{Optimization, OptimizationReport, SwitchingProfile};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tenancy_common::config::SessionConfig;
use tenancy_common::{
    AuditEventType, AuditOutcome, CacheSetOptions, CacheTier, EventSeverity, KeyPattern, SecurityAuditEvent,
    SessionId, StateManagerFactory, StateOptions, TenancyError, TenancyResult, TenantCache, TenantId, Ticker,
};
use tenancy_policy::{BoundarySpec, Operation, PolicyEvaluator, Resource, ResourceKind, TenantPolicy, Violation};
use tokio::sync::Mutex as AsyncMutex;

/// Outcome of a successful switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub from_session_id: SessionId,
    pub new_session_id: SessionId,
    pub switch_time_ms: u64,
    pub optimizations_applied: Vec<Optimization>,
    pub metrics: SwitchMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchMetrics {
    pub preloaded: bool,
    pub warmed_keys: usize,
    pub transferred_operations: u64,
    /// Target tenant cache hit ratio after warming
    pub cache_hit_ratio: f64,
}

/// Side effects of a switch in flight, undone on failure
#[derive(Default)]
struct SwitchProgress {
    source_paused: bool,
    new_session: Option<SessionId>,
}

fn session_key(id: SessionId) -> String {
    format!("session:{id}")
}

/// Owns every live session
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    /// Session ids per tenant, active and paused.
    ///
    /// Lock order is index entry, then sessions. Never take an index entry
    /// while holding a sessions guard.
    tenant_index: DashMap<TenantId, HashSet<SessionId>>,
    /// Held across session setup and across teardown, so a tenant's last
    /// session cannot release state and cache a new session is building on
    tenant_locks: DashMap<TenantId, Arc<AsyncMutex<()>>>,
    profiles: DashMap<TenantId, SwitchingProfile>,
    policy: Arc<PolicyEvaluator>,
    cache: Arc<dyn TenantCache>,
    state: Arc<dyn StateManagerFactory>,
    config: SessionConfig,
    sweeper: Mutex<Option<Ticker>>,
}

impl SessionRegistry {
    pub fn new(
        config: SessionConfig,
        policy: Arc<PolicyEvaluator>,
        cache: Arc<dyn TenantCache>,
        state: Arc<dyn StateManagerFactory>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            tenant_index: DashMap::new(),
            tenant_locks: DashMap::new(),
            profiles: DashMap::new(),
            policy,
            cache,
            state,
            config,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ----- lifecycle -----

    /// Start the expiry sweep
    pub fn start(self: &Arc<Self>) -> TenancyResult<()> {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return Err(TenancyError::AlreadyRunning("session-sweep".to_string()));
        }
        let registry: Weak<Self> = Arc::downgrade(self);
        *slot = Some(Ticker::spawn("session-sweep", self.config.cleanup_interval(), move || {
            let registry = registry.clone();
            async move {
                if let Some(registry) = registry.upgrade() {
                    registry.cleanup_expired_sessions().await;
                }
            }
        }));
        tracing::info!(
            interval_secs = self.config.cleanup_interval_secs,
            timeout_secs = self.config.session_timeout_secs,
            "session sweep started"
        );
        Ok(())
    }

    /// Stop the sweep. Sessions are left in place.
    pub async fn shutdown(&self) {
        let ticker = self.sweeper.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
            tracing::info!("session sweep stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().as_ref().map(Ticker::is_running).unwrap_or(false)
    }

    // ----- create -----

    /// Create a session for `tenant`.
    ///
    /// Fails with `SessionLimitExceeded` when the tenant already has its
    /// maximum of active sessions. Establishes data, cache and session
    /// boundaries and initializes the tenant's state and cache entries; any
    /// failure there discards the half-built session.
    pub async fn create_session(&self, tenant: &TenantId, options: SessionOptions) -> TenancyResult<SessionId> {
        let policy = self.policy.ensure_policy(tenant);
        let limit = self.session_limit(&policy);

        let mut options = options;
        options.isolation_level.get_or_insert(policy.isolation_level);
        let session = Session::new(tenant.clone(), &options, &self.config);
        let id = session.id;

        let lock = self.tenant_lock(tenant);
        let serial = lock.lock().await;
        self.reserve(session, limit)?;

        if let Err(err) = self.initialize(id, tenant, &options).await {
            tracing::warn!(tenant = %tenant, session = %id, error = %err, "session initialization failed");
            self.discard(id).await;
            return Err(err);
        }
        drop(serial);

        tracing::info!(tenant = %tenant, session = %id, user = ?options.user_id, "session created");
        self.policy.record(
            SecurityAuditEvent::builder(AuditEventType::SessionCreated)
                .tenant(tenant)
                .resource(id.to_string())
                .details(json!({ "user_id": options.user_id, "limit": limit }))
                .compliance_tags(policy.compliance_tags())
                .build(),
        );
        Ok(id)
    }

    /// Count and insert under the tenant's index entry so concurrent creates
    /// cannot both take the last slot
    fn reserve(&self, session: Session, limit: usize) -> TenancyResult<()> {
        let tenant = session.tenant_id().clone();
        let mut ids = self.tenant_index.entry(tenant.clone()).or_default();
        let active = self.active_among(&ids);
        if active >= limit {
            tracing::warn!(tenant = %tenant, active, limit, "session limit reached");
            return Err(TenancyError::SessionLimitExceeded { tenant, active, limit });
        }
        ids.insert(session.id);
        self.sessions.insert(session.id, session);
        Ok(())
    }

    /// Reactivate a paused session, counted under the index entry like `reserve`
    fn resume(&self, id: SessionId) -> TenancyResult<()> {
        let tenant = self.get_session(id).ok_or(TenancyError::SessionNotFound(id))?.tenant_id().clone();
        let limit = self.session_limit(&self.policy.ensure_policy(&tenant));

        let ids = self.tenant_index.get_mut(&tenant).ok_or(TenancyError::SessionNotFound(id))?;
        let active = self.active_among(&ids);
        if active >= limit {
            return Err(TenancyError::SessionLimitExceeded { tenant, active, limit });
        }
        let mut session = self.sessions.get_mut(&id).ok_or(TenancyError::SessionNotFound(id))?;
        session.status = SessionStatus::Active;
        session.last_activity = Utc::now();
        Ok(())
    }

    fn active_among(&self, ids: &HashSet<SessionId>) -> usize {
        ids.iter()
            .filter(|id| self.sessions.get(*id).map(|s| s.is_active()).unwrap_or(false))
            .count()
    }

    fn session_limit(&self, policy: &TenantPolicy) -> usize {
        policy
            .constraints
            .max_concurrent_sessions
            .unwrap_or(self.config.max_sessions_per_tenant)
    }

    fn tenant_lock(&self, tenant: &TenantId) -> Arc<AsyncMutex<()>> {
        self.tenant_locks.entry(tenant.clone()).or_default().clone()
    }

    async fn initialize(&self, id: SessionId, tenant: &TenantId, options: &SessionOptions) -> TenancyResult<()> {
        let mut boundary_ids = Vec::with_capacity(SESSION_BOUNDARIES.len());
        for boundary_type in SESSION_BOUNDARIES {
            let boundary = self
                .policy
                .establish_boundary(tenant, BoundarySpec::new(boundary_type, id))?;
            boundary_ids.push(boundary.id);
        }

        let quota = self.get_session(id).ok_or(TenancyError::SessionNotFound(id))?.quota;
        let handle = self
            .state
            .get_or_create(
                tenant,
                StateOptions {
                    memory_limit_mb: Some(quota.max_memory_mb),
                    storage_limit_mb: Some(quota.max_storage_mb),
                    preload: options.preload,
                },
            )
            .await?;

        let snapshot = {
            let mut session = self.sessions.get_mut(&id).ok_or(TenancyError::SessionNotFound(id))?;
            session.boundary_ids = boundary_ids;
            session.state_instance = Some(handle.instance_id);
            session.cache_snapshot()
        };

        self.cache
            .set(
                &session_key(id),
                snapshot,
                CacheSetOptions::for_tenant(tenant)
                    .with_tier(CacheTier::Hot)
                    .with_ttl(self.config.session_timeout()),
            )
            .await
    }

    // ----- switch -----

    /// Move the caller from session `from` into `to_tenant`.
    ///
    /// On success the source session is paused and exactly one new active
    /// session exists for the target. Statistics go to the source tenant's
    /// profile. A failure after the access check is recorded as a failed
    /// switch, and with `rollback_failed_switch` the new session is
    /// terminated and the source resumed.
    pub async fn switch_session(
        &self,
        from: SessionId,
        to_tenant: &TenantId,
        options: SwitchOptions,
    ) -> TenancyResult<SwitchResult> {
        let started = Instant::now();
        let source = self.get_session(from).ok_or(TenancyError::SessionNotFound(from))?;
        let source_tenant = source.tenant_id().clone();

        let mut progress = SwitchProgress::default();
        let outcome = self.run_switch(&source, to_tenant, &options, started, &mut progress).await;

        match outcome {
            Ok(result) => {
                self.profile_mut(&source_tenant, |p| p.record_success(to_tenant, result.switch_time_ms));
                tracing::info!(
                    from = %source_tenant,
                    to = %to_tenant,
                    session = %result.new_session_id,
                    switch_ms = result.switch_time_ms,
                    "session switched"
                );
                self.policy.record(
                    SecurityAuditEvent::builder(AuditEventType::SessionSwitched)
                        .tenant(&source_tenant)
                        .resource(from.to_string())
                        .details(json!({
                            "to_tenant": to_tenant,
                            "new_session_id": result.new_session_id,
                            "switch_time_ms": result.switch_time_ms,
                            "optimizations": result.optimizations_applied,
                        }))
                        .build(),
                );
                Ok(result)
            }
            Err(err) => {
                self.profile_mut(&source_tenant, |p| p.record_failure(to_tenant));
                tracing::warn!(from = %source_tenant, to = %to_tenant, error = %err, "session switch failed");
                if self.config.rollback_failed_switch {
                    self.rollback_switch(from, &source_tenant, progress).await;
                }
                Err(err)
            }
        }
    }

    async fn run_switch(
        &self,
        source: &Session,
        to_tenant: &TenantId,
        options: &SwitchOptions,
        started: Instant,
        progress: &mut SwitchProgress,
    ) -> TenancyResult<SwitchResult> {
        if !source.is_active() {
            return Err(TenancyError::InvalidInput(format!(
                "session {} is {:?}, only active sessions can switch",
                source.id, source.status
            )));
        }

        let ctx = match &options.context {
            Some(ctx) if ctx.tenant_id != *source.tenant_id() => {
                return Err(TenancyError::InvalidInput(
                    "switch context must belong to the source tenant".to_string(),
                ))
            }
            Some(ctx) => ctx.clone(),
            None => source.security_context(),
        };
        let target_policy = self.policy.ensure_policy(to_tenant);
        let resource = Resource::new(to_tenant.clone(), ResourceKind::Session, source.id.to_string());
        self.policy.validate_access(&ctx, &resource, Operation::Switch).into_result()?;

        let preferences = self.switching_profile(to_tenant).preferences;
        let mut optimizations_applied = preferences.active_ladder();
        let mut metrics = SwitchMetrics::default();

        if options.preload_data.unwrap_or(preferences.preload_data) {
            self.state
                .get_or_create(
                    to_tenant,
                    StateOptions {
                        memory_limit_mb: Some(source.quota.max_memory_mb),
                        storage_limit_mb: Some(source.quota.max_storage_mb),
                        preload: true,
                    },
                )
                .await?;
            metrics.preloaded = true;
            optimizations_applied.push(Optimization::DataPreload);
        }

        if options.warm_cache.unwrap_or(preferences.warm_cache) {
            let profile = self.switching_profile(to_tenant);
            let warm = [
                ("policy", json!({ "version": target_policy.version, "isolation_level": target_policy.isolation_level })),
                ("switching_profile", json!({ "target_switch_ms": profile.target_switch_ms, "preferences": profile.preferences })),
            ];
            for (key, value) in warm {
                self.cache
                    .set(key, value, CacheSetOptions::for_tenant(to_tenant).with_tier(CacheTier::Hot))
                    .await?;
                metrics.warmed_keys += 1;
            }
            optimizations_applied.push(Optimization::CacheWarming);
        }

        self.set_status(source.id, SessionStatus::Paused)?;
        progress.source_paused = true;

        let new_options = SessionOptions {
            user_id: source.user_id.clone(),
            memory_mb: Some(source.quota.max_memory_mb),
            storage_mb: Some(source.quota.max_storage_mb),
            max_concurrent_ops: Some(source.quota.max_concurrent_ops),
            isolation_level: Some(source.isolation.level),
            preload: false,
        };
        let new_id = self.create_session(to_tenant, new_options).await?;
        progress.new_session = Some(new_id);

        let switch_time_ms = started.elapsed().as_millis() as u64;
        {
            let mut session = self.sessions.get_mut(&new_id).ok_or(TenancyError::SessionNotFound(new_id))?;
            session.switched_from = Some(source.id);
            session.performance.last_switch_ms = Some(switch_time_ms);
            if options.transfer_state {
                session.performance.inherited_operations =
                    source.performance.operations + source.performance.inherited_operations;
                session.quota.allocated_memory_mb = source.quota.allocated_memory_mb.min(session.quota.max_memory_mb);
                session.quota.allocated_storage_mb =
                    source.quota.allocated_storage_mb.min(session.quota.max_storage_mb);
                metrics.transferred_operations = session.performance.inherited_operations;
            }
        }

        metrics.cache_hit_ratio = self.cache.metrics(to_tenant).await?.hit_ratio;

        Ok(SwitchResult {
            from_session_id: source.id,
            new_session_id: new_id,
            switch_time_ms,
            optimizations_applied,
            metrics,
        })
    }

    async fn rollback_switch(&self, from: SessionId, tenant: &TenantId, progress: SwitchProgress) {
        if let Some(new_id) = progress.new_session {
            self.terminate_session(new_id, TerminationReason::SwitchRollback).await;
        }
        if progress.source_paused {
            // the freed slot may have been taken while the source was paused
            if let Err(err) = self.resume(from) {
                tracing::warn!(session = %from, error = %err, "source session left paused after rollback");
                self.policy.record(
                    SecurityAuditEvent::builder(AuditEventType::SessionSwitched)
                        .tenant(tenant)
                        .resource(from.to_string())
                        .severity(EventSeverity::Warning)
                        .outcome(AuditOutcome::Recorded)
                        .details(json!({
                            "rolled_back": true,
                            "source_resumed": false,
                            "reason": err.to_string(),
                        }))
                        .build(),
                );
            }
        }
        tracing::debug!(session = %from, "switch rolled back");
    }

    // ----- terminate -----

    /// End a session. Returns false if it was already gone.
    ///
    /// The tenant's state instance is destroyed and its cache namespace
    /// invalidated only when no other session of the tenant remains.
    pub async fn terminate_session(&self, id: SessionId, reason: TerminationReason) -> bool {
        let tenant = match self.sessions.get(&id) {
            Some(session) => session.tenant_id().clone(),
            None => return false,
        };
        let lock = self.tenant_lock(&tenant);
        let _serial = lock.lock().await;

        // a concurrent terminate may have won while this one waited
        if self.sessions.remove(&id).is_none() {
            return false;
        }
        let released = self.teardown(id, &tenant).await;

        tracing::info!(tenant = %tenant, session = %id, reason = reason.as_str(), released, "session terminated");
        self.policy.record(
            SecurityAuditEvent::builder(AuditEventType::SessionTerminated)
                .tenant(&tenant)
                .resource(id.to_string())
                .details(json!({ "reason": reason, "boundaries_released": released }))
                .build(),
        );
        true
    }

    /// Remove a session whose initialization failed, without auditing.
    ///
    /// Called with the tenant lock already held by `create_session`.
    async fn discard(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            self.teardown(id, session.tenant_id()).await;
        }
    }

    /// Release what a removed session held. Caller holds the tenant lock.
    async fn teardown(&self, id: SessionId, tenant: &TenantId) -> usize {
        if let Some(mut ids) = self.tenant_index.get_mut(tenant) {
            ids.remove(&id);
        }
        let last_for_tenant = self.tenant_index.remove_if(tenant, |_, ids| ids.is_empty()).is_some()
            || !self.tenant_index.contains_key(tenant);

        let released = self.policy.release_session_boundaries(id);

        if last_for_tenant {
            if let Err(err) = self.state.destroy(tenant).await {
                tracing::warn!(tenant = %tenant, error = %err, "state teardown failed");
            }
            if let Err(err) = self.cache.invalidate(&KeyPattern::Namespace(tenant.clone())).await {
                tracing::warn!(tenant = %tenant, error = %err, "cache invalidation failed");
            }
        } else {
            let pattern = KeyPattern::Exact {
                tenant: tenant.clone(),
                key: session_key(id),
            };
            if let Err(err) = self.cache.invalidate(&pattern).await {
                tracing::warn!(tenant = %tenant, error = %err, "cache invalidation failed");
            }
        }
        released
    }

    /// Terminate every session idle longer than the timeout
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let timeout = self.config.session_timeout_secs as i64;
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.idle_secs(now) > timeout)
            .map(|s| s.id)
            .collect();

        let mut terminated = 0;
        for id in expired {
            if self.terminate_session(id, TerminationReason::Timeout).await {
                terminated += 1;
            }
        }
        if terminated > 0 {
            tracing::info!(terminated, "expired sessions cleaned up");
        }
        terminated
    }

    // ----- queries and helpers -----

    pub fn get_session(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    /// Tenant-checked read. A session of another tenant is denied and audited.
    pub fn access_session(&self, id: SessionId, requester: &TenantId) -> TenancyResult<Session> {
        let session = self.get_session(id).ok_or(TenancyError::SessionNotFound(id))?;
        if session.tenant_id() != requester {
            tracing::warn!(session = %id, owner = %session.tenant_id(), requester = %requester, "cross-tenant session access denied");
            self.policy.record(
                SecurityAuditEvent::builder(AuditEventType::AccessDecision)
                    .tenant(requester)
                    .resource(format!("{}:session:{id}", session.tenant_id()))
                    .severity(EventSeverity::Warning)
                    .outcome(AuditOutcome::Denied)
                    .details(json!({ "violations": [Violation::CrossTenantAccessDenied] }))
                    .build(),
            );
            return Err(TenancyError::access_denied(
                Violation::CrossTenantAccessDenied.as_str(),
                vec![Violation::CrossTenantAccessDenied.as_str().to_string()],
            ));
        }
        Ok(session)
    }

    /// Record activity on a session
    pub fn touch(&self, id: SessionId) -> TenancyResult<()> {
        let mut session = self.sessions.get_mut(&id).ok_or(TenancyError::SessionNotFound(id))?;
        session.last_activity = Utc::now();
        session.performance.operations += 1;
        Ok(())
    }

    pub fn list_sessions(&self, tenant: &TenantId) -> Vec<Session> {
        let ids: Vec<SessionId> = self
            .tenant_index
            .get(tenant)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        let mut sessions: Vec<Session> = ids.into_iter().filter_map(|id| self.get_session(id)).collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn count_active(&self, tenant: &TenantId) -> usize {
        self.list_sessions(tenant).iter().filter(|s| s.is_active()).count()
    }

    pub fn total_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// The tenant's profile, created from the default template if absent
    pub fn switching_profile(&self, tenant: &TenantId) -> SwitchingProfile {
        self.profiles
            .entry(tenant.clone())
            .or_insert_with(|| SwitchingProfile::new(tenant.clone(), self.config.default_switch_target_ms))
            .clone()
    }

    fn profile_mut<R>(&self, tenant: &TenantId, f: impl FnOnce(&mut SwitchingProfile) -> R) -> R {
        let mut profile = self
            .profiles
            .entry(tenant.clone())
            .or_insert_with(|| SwitchingProfile::new(tenant.clone(), self.config.default_switch_target_ms));
        f(profile.value_mut())
    }

    /// Tune the tenant's switching profile when switches run over target
    pub fn optimize_client_switching(&self, tenant: &TenantId) -> OptimizationReport {
        let report = self.profile_mut(tenant, |p| p.optimize(self.config.min_switch_target_ms));
        if !report.applied.is_empty() {
            tracing::info!(
                tenant = %tenant,
                applied = ?report.applied,
                new_target_ms = report.new_target_ms,
                "switching optimized"
            );
        }
        report
    }

    fn set_status(&self, id: SessionId, status: SessionStatus) -> TenancyResult<()> {
        let mut session = self.sessions.get_mut(&id).ok_or(TenancyError::SessionNotFound(id))?;
        session.status = status;
        session.last_activity = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::join_all;
    use tenancy_common::memory::{InMemoryStateManager, InMemoryTenantCache, MemoryAuditSink};
    use tenancy_common::config::PolicyConfig;
    use tenancy_common::StateHandle;
    use tenancy_policy::{AuditFilter, PolicyConstraints, PolicyOverrides, SecurityContext};

    struct Fixture {
        registry: Arc<SessionRegistry>,
        policy: Arc<PolicyEvaluator>,
        cache: Arc<InMemoryTenantCache>,
        state: Arc<InMemoryStateManager>,
    }

    fn fixture_with(config: SessionConfig) -> Fixture {
        let policy = Arc::new(PolicyEvaluator::new(PolicyConfig::default(), Arc::new(MemoryAuditSink::new())));
        let cache = Arc::new(InMemoryTenantCache::new());
        let state = Arc::new(InMemoryStateManager::new());
        let registry = Arc::new(SessionRegistry::new(config, policy.clone(), cache.clone(), state.clone()));
        Fixture {
            registry,
            policy,
            cache,
            state,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionConfig::default())
    }

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    fn globex() -> TenantId {
        TenantId::from("globex")
    }

    fn cap(policy: &PolicyEvaluator, tenant: &TenantId, max: usize) {
        policy
            .create_policy(
                tenant,
                PolicyOverrides {
                    constraints: Some(PolicyConstraints {
                        max_concurrent_sessions: Some(max),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    /// State manager that refuses one tenant
    struct RefusingState {
        inner: InMemoryStateManager,
        refuse: TenantId,
    }

    #[async_trait]
    impl StateManagerFactory for RefusingState {
        async fn get_or_create(&self, tenant: &TenantId, options: StateOptions) -> TenancyResult<StateHandle> {
            if *tenant == self.refuse {
                return Err(TenancyError::Collaborator("state store unavailable".into()));
            }
            self.inner.get_or_create(tenant, options).await
        }

        async fn destroy(&self, tenant: &TenantId) -> TenancyResult<bool> {
            self.inner.destroy(tenant).await
        }
    }

    /// Which state call a [`GatedState`] holds back
    #[derive(Clone, Copy, PartialEq)]
    enum GatedCall {
        Create,
        Destroy,
    }

    /// State manager whose gated call for one tenant waits for `release`,
    /// then optionally fails
    struct GatedState {
        inner: InMemoryStateManager,
        tenant: TenantId,
        call: GatedCall,
        fail: bool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Semaphore,
    }

    impl GatedState {
        fn new(tenant: TenantId, call: GatedCall, fail: bool) -> Self {
            Self {
                inner: InMemoryStateManager::new(),
                tenant,
                call,
                fail,
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Semaphore::new(0),
            }
        }

        async fn gate(&self, tenant: &TenantId, call: GatedCall) -> TenancyResult<()> {
            if *tenant != self.tenant || call != self.call {
                return Ok(());
            }
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
            if self.fail {
                return Err(TenancyError::Collaborator("state store unavailable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StateManagerFactory for GatedState {
        async fn get_or_create(&self, tenant: &TenantId, options: StateOptions) -> TenancyResult<StateHandle> {
            self.gate(tenant, GatedCall::Create).await?;
            self.inner.get_or_create(tenant, options).await
        }

        async fn destroy(&self, tenant: &TenantId) -> TenancyResult<bool> {
            self.gate(tenant, GatedCall::Destroy).await?;
            self.inner.destroy(tenant).await
        }
    }

    /// Cache that rejects every write
    struct ReadOnlyCache(InMemoryTenantCache);

    #[async_trait]
    impl TenantCache for ReadOnlyCache {
        async fn get(&self, key: &str, tenant: &TenantId) -> TenancyResult<Option<serde_json::Value>> {
            self.0.get(key, tenant).await
        }

        async fn set(&self, _key: &str, _value: serde_json::Value, _options: CacheSetOptions) -> TenancyResult<()> {
            Err(TenancyError::Collaborator("cache is read-only".into()))
        }

        async fn invalidate(&self, pattern: &KeyPattern) -> TenancyResult<usize> {
            self.0.invalidate(pattern).await
        }

        async fn metrics(&self, tenant: &TenantId) -> TenancyResult<tenancy_common::CacheMetrics> {
            self.0.metrics(tenant).await
        }
    }

    fn registry_with(
        policy: &Arc<PolicyEvaluator>,
        cache: Arc<dyn TenantCache>,
        state: Arc<dyn StateManagerFactory>,
    ) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(SessionConfig::default(), policy.clone(), cache, state))
    }

    #[tokio::test]
    async fn test_quota_scenario() {
        let f = fixture();
        cap(&f.policy, &acme(), 2);

        f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        let third = f.registry.create_session(&acme(), SessionOptions::default()).await;
        assert_eq!(
            third,
            Err(TenancyError::SessionLimitExceeded {
                tenant: acme(),
                active: 2,
                limit: 2
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_respect_cap() {
        let f = fixture();
        cap(&f.policy, &acme(), 3);

        let attempts = (0..10).map(|_| {
            let registry = f.registry.clone();
            tokio::spawn(async move { registry.create_session(&acme(), SessionOptions::default()).await })
        });
        let outcomes: Vec<_> = join_all(attempts).await.into_iter().map(|j| j.unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 3);
        assert_eq!(f.registry.count_active(&acme()), 3);
    }

    #[tokio::test]
    async fn test_create_initializes_boundaries_state_and_cache() {
        let f = fixture();
        let id = f
            .registry
            .create_session(&acme(), SessionOptions::for_user("alice"))
            .await
            .unwrap();

        let session = f.registry.get_session(id).unwrap();
        assert_eq!(session.tenant_id(), &acme());
        assert_eq!(session.boundary_ids.len(), 3);
        assert!(session.state_instance.is_some());
        assert_eq!(f.policy.boundaries_for_session(id).len(), 3);
        assert!(f.state.contains(&acme()));
        let cached = f.cache.get(&session_key(id), &acme()).await.unwrap();
        assert!(cached.is_some());
        assert!(f.cache.get(&session_key(id), &globex()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_switch_pauses_source_and_counts_once() {
        let f = fixture();
        let source = f.registry.create_session(&acme(), SessionOptions::for_user("alice")).await.unwrap();
        f.registry.touch(source).unwrap();

        let result = f
            .registry
            .switch_session(
                source,
                &globex(),
                SwitchOptions {
                    transfer_state: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let old = f.registry.get_session(source).unwrap();
        let new = f.registry.get_session(result.new_session_id).unwrap();
        assert_eq!(old.status, SessionStatus::Paused);
        assert_eq!(old.tenant_id(), &acme());
        assert_eq!(new.status, SessionStatus::Active);
        assert_eq!(new.tenant_id(), &globex());
        assert_eq!(new.switched_from, Some(source));
        assert_eq!(new.performance.inherited_operations, 1);
        assert_eq!(f.registry.count_active(&globex()), 1);
        assert!(result.optimizations_applied.contains(&Optimization::CacheWarming));
        assert_eq!(result.metrics.warmed_keys, 2);

        let stats = f.registry.switching_profile(&acme()).statistics;
        assert_eq!(stats.total_switches, 1);
        assert_eq!(stats.successful_switches, 1);
        assert_eq!(f.registry.switching_profile(&globex()).statistics.total_switches, 0);
    }

    #[tokio::test]
    async fn test_switch_unknown_session() {
        let f = fixture();
        let missing = uuid::Uuid::new_v4();
        let result = f.registry.switch_session(missing, &globex(), SwitchOptions::default()).await;
        assert_eq!(result, Err(TenancyError::SessionNotFound(missing)));
    }

    #[tokio::test]
    async fn test_denied_switch_records_failure_and_keeps_source_active() {
        let f = fixture();
        let source = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        let options = SwitchOptions {
            context: Some(SecurityContext::authenticated(acme()).with_risk_score(85)),
            ..Default::default()
        };

        let err = f.registry.switch_session(source, &globex(), options).await.unwrap_err();
        assert!(matches!(err, TenancyError::AccessDenied { ref violations, .. } if violations == &vec!["high_risk_score".to_string()]));
        assert!(f.registry.get_session(source).unwrap().is_active());
        assert_eq!(f.registry.list_sessions(&globex()).len(), 0);

        let stats = f.registry.switching_profile(&acme()).statistics;
        assert_eq!((stats.total_switches, stats.failed_switches), (1, 1));
    }

    #[tokio::test]
    async fn test_failed_switch_rolls_back() {
        let policy = Arc::new(PolicyEvaluator::new(PolicyConfig::default(), Arc::new(MemoryAuditSink::new())));
        let state = Arc::new(RefusingState {
            inner: InMemoryStateManager::new(),
            refuse: globex(),
        });
        let registry = SessionRegistry::new(
            SessionConfig::default(),
            policy.clone(),
            Arc::new(InMemoryTenantCache::new()),
            state,
        );
        let source = registry.create_session(&acme(), SessionOptions::default()).await.unwrap();

        let result = registry.switch_session(source, &globex(), SwitchOptions::default()).await;
        assert!(matches!(result, Err(TenancyError::Collaborator(_))));
        assert!(registry.get_session(source).unwrap().is_active());
        assert!(registry.list_sessions(&globex()).is_empty());
        assert!(policy.boundaries_for_tenant(&globex()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rollback_keeps_source_paused_when_slot_taken() {
        let policy = Arc::new(PolicyEvaluator::new(PolicyConfig::default(), Arc::new(MemoryAuditSink::new())));
        cap(&policy, &acme(), 1);
        let state = Arc::new(GatedState::new(globex(), GatedCall::Create, true));
        let registry = registry_with(&policy, Arc::new(InMemoryTenantCache::new()), state.clone());
        let source = registry.create_session(&acme(), SessionOptions::default()).await.unwrap();

        let switching = {
            let registry = registry.clone();
            let options = SwitchOptions {
                preload_data: Some(false),
                warm_cache: Some(false),
                ..Default::default()
            };
            tokio::spawn(async move { registry.switch_session(source, &globex(), options).await })
        };
        state.entered.notified().await;
        assert_eq!(registry.get_session(source).unwrap().status, SessionStatus::Paused);

        // the paused source frees its slot
        let replacement = registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        state.release.add_permits(1);

        assert!(matches!(switching.await.unwrap(), Err(TenancyError::Collaborator(_))));
        assert_eq!(registry.count_active(&acme()), 1);
        assert!(registry.get_session(replacement).unwrap().is_active());
        assert_eq!(registry.get_session(source).unwrap().status, SessionStatus::Paused);

        let events = policy.audit_events(&AuditFilter::tenant(&acme()).of_type(AuditEventType::SessionSwitched));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details["source_resumed"], json!(false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_during_last_session_teardown_keeps_resources() {
        let policy = Arc::new(PolicyEvaluator::new(PolicyConfig::default(), Arc::new(MemoryAuditSink::new())));
        let cache = Arc::new(InMemoryTenantCache::new());
        let state = Arc::new(GatedState::new(acme(), GatedCall::Destroy, false));
        let registry = registry_with(&policy, cache.clone(), state.clone());
        let first = registry.create_session(&acme(), SessionOptions::default()).await.unwrap();

        let terminating = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.terminate_session(first, TerminationReason::Explicit).await })
        };
        state.entered.notified().await;

        let creating = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.create_session(&acme(), SessionOptions::default()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        state.release.add_permits(1);

        assert!(terminating.await.unwrap());
        let second = creating.await.unwrap().unwrap();
        assert!(registry.get_session(second).unwrap().is_active());
        assert!(state.inner.contains(&acme()));
        assert!(cache.get(&session_key(second), &acme()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_initialization_releases_tenant_state() {
        let policy = Arc::new(PolicyEvaluator::new(PolicyConfig::default(), Arc::new(MemoryAuditSink::new())));
        let state = Arc::new(InMemoryStateManager::new());
        let registry = registry_with(&policy, Arc::new(ReadOnlyCache(InMemoryTenantCache::new())), state.clone());

        let result = registry.create_session(&acme(), SessionOptions::default()).await;
        assert!(matches!(result, Err(TenancyError::Collaborator(_))));
        assert!(!state.contains(&acme()));
        assert!(registry.tenant_index.get(&acme()).is_none());
        assert!(policy.boundaries_for_tenant(&acme()).is_empty());
    }

    #[tokio::test]
    async fn test_paused_sessions_do_not_count_toward_cap() {
        let f = fixture();
        cap(&f.policy, &acme(), 1);
        let first = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        f.registry.switch_session(first, &globex(), SwitchOptions::default()).await.unwrap();

        assert!(f.registry.create_session(&acme(), SessionOptions::default()).await.is_ok());
        assert_eq!(f.registry.list_sessions(&acme()).len(), 2);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent_under_concurrency() {
        let f = fixture();
        let id = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();

        let results = join_all((0..5).map(|_| f.registry.terminate_session(id, TerminationReason::Explicit))).await;
        assert_eq!(results.iter().filter(|r| **r).count(), 1);
        assert!(f.registry.get_session(id).is_none());
        assert!(f.policy.boundaries_for_session(id).is_empty());
    }

    #[tokio::test]
    async fn test_tenant_resources_released_with_last_session() {
        let f = fixture();
        let a = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        let b = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();

        f.registry.terminate_session(a, TerminationReason::Explicit).await;
        assert!(f.state.contains(&acme()));
        assert_eq!(f.cache.len_for(&acme()), 1);

        f.registry.terminate_session(b, TerminationReason::Explicit).await;
        assert!(!f.state.contains(&acme()));
        assert_eq!(f.cache.len_for(&acme()), 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired_sessions() {
        let f = fixture();
        let stale = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        let fresh = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        f.registry.sessions.get_mut(&stale).unwrap().last_activity = Utc::now() - chrono::Duration::hours(1);

        assert_eq!(f.registry.cleanup_expired_sessions().await, 1);
        assert!(f.registry.get_session(stale).is_none());
        assert!(f.registry.get_session(fresh).is_some());
        // already gone
        assert!(!f.registry.terminate_session(stale, TerminationReason::Explicit).await);
    }

    #[tokio::test]
    async fn test_access_session_checks_tenant() {
        let f = fixture();
        let id = f.registry.create_session(&acme(), SessionOptions::default()).await.unwrap();
        assert!(f.registry.access_session(id, &acme()).is_ok());
        assert!(matches!(
            f.registry.access_session(id, &globex()),
            Err(TenancyError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_optimize_respects_floor() {
        let f = fixture();
        f.registry.profile_mut(&acme(), |p| p.record_success(&globex(), 2_000));
        let report = f.registry.optimize_client_switching(&acme());
        assert_eq!(report.applied.len(), 3);
        assert_eq!(report.new_target_ms, 200);
    }

    #[tokio::test]
    async fn test_sweep_lifecycle() {
        let f = fixture();
        f.registry.start().unwrap();
        assert!(f.registry.is_running());
        assert!(matches!(f.registry.start(), Err(TenancyError::AlreadyRunning(_))));
        f.registry.shutdown().await;
        assert!(!f.registry.is_running());
    }
}
