//! Cross-tenant probes
//!
//! Every probe runs `iterations` rounds of "target owns something, probe
//! tenant tries to reach it" and records each round in a shared [`Tally`],
//! so a run cut short by its deadline still reports what it saw.

use crate::model::{IsolationValidationTest, Vulnerability, VulnerabilityKind};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenancy_common::{
    CacheSetOptions, IssueSeverity, KeyPattern, SessionId, StateManagerFactory, StateOptions, TenancyError,
    TenancyResult, TenantCache, TenantId,
};
use tenancy_integrity::{IntegrityChecker, IssueType};
use tenancy_policy::{Operation, PolicyEvaluator, Resource, ResourceKind, SecurityContext};
use tenancy_session::{SessionOptions, SessionRegistry, TerminationReason};

const PROBE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub attempts: u32,
    pub blocked: u32,
    pub allowed: u32,
    pub leakage: bool,
    pub unauthorized: Vec<String>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub iteration_ms: f64,
}

impl Tally {
    pub fn avg_iteration_ms(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.iteration_ms / self.attempts as f64
        }
    }

    fn block(&mut self, elapsed: Duration) {
        self.attempts += 1;
        self.blocked += 1;
        self.iteration_ms += elapsed.as_secs_f64() * 1000.0;
    }

    fn allow(&mut self, elapsed: Duration, access: String) {
        self.attempts += 1;
        self.allowed += 1;
        self.iteration_ms += elapsed.as_secs_f64() * 1000.0;
        self.unauthorized.push(access);
    }

    fn vulnerable(&mut self, kind: VulnerabilityKind, severity: IssueSeverity, description: String) {
        if !self.vulnerabilities.iter().any(|v| v.kind == kind) {
            self.vulnerabilities.push(Vulnerability {
                kind,
                severity,
                description,
            });
        }
    }
}

/// Collaborators a probe may touch
pub(crate) struct ProbeEnv {
    pub registry: Arc<SessionRegistry>,
    pub policy: Arc<PolicyEvaluator>,
    pub checker: Arc<IntegrityChecker>,
    pub cache: Arc<dyn TenantCache>,
    pub state: Arc<dyn StateManagerFactory>,
}

pub(crate) struct ProbeRun<'a> {
    pub env: &'a ProbeEnv,
    pub test: &'a IsolationValidationTest,
    pub iterations: u32,
    pub tally: &'a Mutex<Tally>,
    pub cancelled: &'a AtomicBool,
}

impl ProbeRun<'_> {
    fn target(&self) -> &TenantId {
        &self.test.target_tenant
    }

    fn observer(&self) -> &TenantId {
        &self.test.probe_tenant
    }

    fn rounds(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.iterations).take_while(move |_| !self.cancelled.load(Ordering::Acquire))
    }

    /// Run what the probe tenant managed to read through the integrity
    /// checker; any isolation breach there is leakage.
    fn confirm_leakage(&self, seen: Map<String, Value>) -> TenancyResult<()> {
        if seen.is_empty() {
            return Ok(());
        }
        let result = self
            .env
            .checker
            .validate_client_isolation(&Value::Object(seen), self.observer())?;
        if result.issues.iter().any(|i| i.issue_type == IssueType::IsolationBreach) {
            self.tally.lock().leakage = true;
        }
        Ok(())
    }

    /// Policy decisions for the probe tenant against the target's records
    pub async fn data_isolation(&self) -> TenancyResult<()> {
        let ctx = SecurityContext::authenticated(self.observer().clone());
        let operations = [Operation::Read, Operation::Write, Operation::Delete];
        let mut seen = Map::new();

        for round in self.rounds() {
            let started = Instant::now();
            let operation = operations[round as usize % operations.len()];
            let resource = Resource::new(self.target().clone(), ResourceKind::Data, format!("isolation-probe-{round}"));
            let decision = self.env.policy.validate_access(&ctx, &resource, operation);

            let mut tally = self.tally.lock();
            if !decision.allowed {
                tally.block(started.elapsed());
                continue;
            }
            tally.allow(started.elapsed(), format!("{operation:?} {}", resource.describe()));
            if operation.is_read() {
                seen.insert(resource.id.clone(), json!({ "tenant_id": self.target(), "round": round }));
                tally.vulnerable(
                    VulnerabilityKind::CrossTenantRead,
                    IssueSeverity::High,
                    format!("{} can read data owned by {}", self.observer(), self.target()),
                );
            } else {
                tally.vulnerable(
                    VulnerabilityKind::CrossTenantWrite,
                    IssueSeverity::Critical,
                    format!("{} can modify data owned by {}", self.observer(), self.target()),
                );
            }
        }
        self.confirm_leakage(seen)
    }

    /// Write under the target's namespace, read the same key under the probe tenant's
    pub async fn cache_isolation(&self) -> TenancyResult<()> {
        let prefix = format!("isolation-probe:{}:", self.test.id);
        let outcome = self.cache_rounds(&prefix).await;

        let pattern = KeyPattern::Prefix {
            tenant: self.target().clone(),
            prefix,
        };
        if let Err(err) = self.env.cache.invalidate(&pattern).await {
            tracing::warn!(test = %self.test.id, error = %err, "probe keys not cleaned up");
        }
        self.confirm_leakage(outcome?)
    }

    async fn cache_rounds(&self, prefix: &str) -> TenancyResult<Map<String, Value>> {
        let mut seen = Map::new();
        for round in self.rounds() {
            let key = format!("{prefix}{round}");
            self.env
                .cache
                .set(
                    &key,
                    json!({ "key": key, "tenant_id": self.target(), "round": round }),
                    CacheSetOptions::for_tenant(self.target()).with_ttl(PROBE_TTL),
                )
                .await?;

            let started = Instant::now();
            let read = self.env.cache.get(&key, self.observer()).await?;
            let mut tally = self.tally.lock();
            match read {
                None => tally.block(started.elapsed()),
                Some(value) => {
                    tally.allow(started.elapsed(), format!("cache get {key} as {}", self.observer()));
                    tally.vulnerable(
                        VulnerabilityKind::CacheNamespaceLeak,
                        IssueSeverity::Critical,
                        format!("cache namespace of {} readable by {}", self.target(), self.observer()),
                    );
                    seen.insert(key, value);
                }
            }
        }
        Ok(seen)
    }

    /// Open a session for the target and try to read it as the probe tenant
    pub async fn session_isolation(&self) -> TenancyResult<()> {
        let victim = self
            .env
            .registry
            .create_session(self.target(), SessionOptions::for_user("isolation-probe"))
            .await?;
        let outcome = self.session_rounds(victim);
        self.env.registry.terminate_session(victim, TerminationReason::Explicit).await;
        self.confirm_leakage(outcome?)
    }

    fn session_rounds(&self, victim: SessionId) -> TenancyResult<Map<String, Value>> {
        let mut seen = Map::new();
        for _ in self.rounds() {
            let started = Instant::now();
            let read = self.env.registry.access_session(victim, self.observer());
            let mut tally = self.tally.lock();
            match read {
                Err(TenancyError::AccessDenied { .. }) => tally.block(started.elapsed()),
                Err(err) => return Err(err),
                Ok(session) => {
                    tally.allow(started.elapsed(), format!("session {victim} as {}", self.observer()));
                    tally.vulnerable(
                        VulnerabilityKind::SessionExposure,
                        IssueSeverity::Critical,
                        format!("sessions of {} readable by {}", self.target(), self.observer()),
                    );
                    seen.insert(
                        format!("session:{victim}"),
                        json!({ "tenant_id": session.tenant_id(), "status": session.status }),
                    );
                }
            }
        }
        Ok(seen)
    }

    /// The probe tenant must get its own state instance and be refused the
    /// target's
    pub async fn memory_isolation(&self) -> TenancyResult<()> {
        let victim = self
            .env
            .registry
            .create_session(self.target(), SessionOptions::for_user("isolation-probe"))
            .await?;
        let outcome = self.memory_rounds(victim).await;
        self.env.registry.terminate_session(victim, TerminationReason::Explicit).await;

        // the rounds may have created the probe tenant's instance
        if self.env.registry.list_sessions(self.observer()).is_empty() {
            if let Err(err) = self.env.state.destroy(self.observer()).await {
                tracing::warn!(test = %self.test.id, error = %err, "probe state instance not destroyed");
            }
        }
        outcome
    }

    async fn memory_rounds(&self, victim: SessionId) -> TenancyResult<()> {
        let instance = self
            .env
            .registry
            .get_session(victim)
            .and_then(|s| s.state_instance)
            .ok_or(TenancyError::SessionNotFound(victim))?;
        let ctx = SecurityContext::authenticated(self.observer().clone());
        let resource = Resource::new(self.target().clone(), ResourceKind::State, instance.to_string());

        for _ in self.rounds() {
            let started = Instant::now();
            let handle = self
                .env
                .state
                .get_or_create(self.observer(), StateOptions::default())
                .await?;
            let shared = handle.instance_id == instance || &handle.tenant != self.observer();
            let decision = self.env.policy.validate_access(&ctx, &resource, Operation::Read);

            let mut tally = self.tally.lock();
            if shared {
                tally.leakage = true;
                tally.vulnerable(
                    VulnerabilityKind::SharedStateInstance,
                    IssueSeverity::Critical,
                    format!("state instance {instance} shared by {} and {}", self.target(), self.observer()),
                );
            }
            if decision.allowed || shared {
                tally.allow(started.elapsed(), format!("state {instance} as {}", self.observer()));
            } else {
                tally.block(started.elapsed());
            }
        }
        Ok(())
    }
}
