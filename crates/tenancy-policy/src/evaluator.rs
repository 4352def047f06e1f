//! Policy Evaluator & Boundary Manager

use crate::audit_log::{AuditFilter, AuditLog};
use crate::boundary::{BoundaryId, BoundarySpec, BoundaryValidation, SecurityBoundary};
use crate::context::{AccessDecision, Operation, Resource, SecurityContext, Violation};
use crate::health::{self, PolicyHealth};
use crate::model::{AuditLevel, PolicyOverrides, TenantPolicy};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tenancy_common::audit::ChainVerification;
use tenancy_common::config::PolicyConfig;
use tenancy_common::{
    AuditEventType, AuditOutcome, AuditSink, EventSeverity, IsolationLevel, SecurityAuditEvent,
    SessionId, TenancyError, TenancyResult, TenantId,
};

/// Owns tenant policies, security boundaries and the audit log
pub struct PolicyEvaluator {
    policies: DashMap<TenantId, TenantPolicy>,
    boundaries: DashMap<BoundaryId, SecurityBoundary>,
    audit: AuditLog,
    sink: Arc<dyn AuditSink>,
    config: PolicyConfig,
}

impl PolicyEvaluator {
    pub fn new(config: PolicyConfig, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            policies: DashMap::new(),
            boundaries: DashMap::new(),
            audit: AuditLog::new(config.audit_log_capacity),
            sink,
            config,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    // ----- policies -----

    /// Create a policy from the strict template plus overrides.
    ///
    /// Fails with `PolicyAlreadyExists` if the tenant already has one.
    pub fn create_policy(&self, tenant: &TenantId, overrides: PolicyOverrides) -> TenancyResult<TenantPolicy> {
        let policy = match self.policies.entry(tenant.clone()) {
            Entry::Occupied(_) => return Err(TenancyError::PolicyAlreadyExists(tenant.clone())),
            Entry::Vacant(slot) => {
                let mut policy = TenantPolicy::strict(tenant.clone());
                policy.apply(overrides);
                slot.insert(policy.clone());
                policy
            }
        };

        tracing::info!(tenant = %tenant, level = ?policy.isolation_level, "security policy created");
        self.audit_policy_change(AuditEventType::PolicyCreated, &policy);
        Ok(policy)
    }

    /// Return the tenant's policy, creating the strict template if absent
    pub fn ensure_policy(&self, tenant: &TenantId) -> TenantPolicy {
        let (policy, created) = match self.policies.entry(tenant.clone()) {
            Entry::Occupied(slot) => (slot.get().clone(), false),
            Entry::Vacant(slot) => {
                let policy = TenantPolicy::strict(tenant.clone());
                slot.insert(policy.clone());
                (policy, true)
            }
        };
        if created {
            tracing::info!(tenant = %tenant, "default strict policy created");
            self.audit_policy_change(AuditEventType::PolicyCreated, &policy);
        }
        policy
    }

    /// Replace sections of an existing policy and bump its version
    pub fn update_policy(&self, tenant: &TenantId, overrides: PolicyOverrides) -> TenancyResult<TenantPolicy> {
        let policy = {
            let mut current = self
                .policies
                .get_mut(tenant)
                .ok_or_else(|| TenancyError::PolicyNotFound(tenant.clone()))?;
            let mut next = current.clone();
            next.apply(overrides);
            next.version = current.version + 1;
            next.updated_at = Utc::now();
            *current = next.clone();
            next
        };

        tracing::info!(tenant = %tenant, version = policy.version, "security policy updated");
        self.audit_policy_change(AuditEventType::PolicyUpdated, &policy);
        Ok(policy)
    }

    pub fn get_policy(&self, tenant: &TenantId) -> TenancyResult<TenantPolicy> {
        self.policies
            .get(tenant)
            .map(|p| p.clone())
            .ok_or_else(|| TenancyError::PolicyNotFound(tenant.clone()))
    }

    pub fn has_policy(&self, tenant: &TenantId) -> bool {
        self.policies.contains_key(tenant)
    }

    pub fn list_policies(&self) -> Vec<TenantPolicy> {
        self.policies.iter().map(|p| p.value().clone()).collect()
    }

    pub fn remove_policy(&self, tenant: &TenantId) -> TenancyResult<TenantPolicy> {
        let (_, policy) = self
            .policies
            .remove(tenant)
            .ok_or_else(|| TenancyError::PolicyNotFound(tenant.clone()))?;
        tracing::info!(tenant = %tenant, "security policy removed");
        self.audit_policy_change(AuditEventType::PolicyRemoved, &policy);
        Ok(policy)
    }

    fn audit_policy_change(&self, event_type: AuditEventType, policy: &TenantPolicy) {
        self.record(
            SecurityAuditEvent::builder(event_type)
                .tenant(&policy.tenant_id)
                .details(json!({
                    "version": policy.version,
                    "isolation_level": policy.isolation_level,
                }))
                .compliance_tags(policy.compliance_tags())
                .build(),
        );
    }

    // ----- access decisions -----

    /// Evaluate an access request.
    ///
    /// Checks run in order (policy, authentication, rate limit, risk score,
    /// geofencing, switching, cross-tenant) and every violation is
    /// collected. `Switch` requests are gated by the switching flags of both
    /// tenants instead of the cross-tenant data rules. Never mutates policy
    /// state.
    pub fn validate_access(&self, ctx: &SecurityContext, resource: &Resource, operation: Operation) -> AccessDecision {
        let policy = self.policies.get(&ctx.tenant_id).map(|p| p.clone());
        let mut violations = Vec::new();

        match &policy {
            None => {
                violations.push(Violation::PolicyNotFound);
                if ctx.risk_score > self.config.risk_score_threshold {
                    violations.push(Violation::HighRiskScore);
                }
            }
            Some(policy) => {
                if policy.access_control.require_authentication && !ctx.authenticated {
                    violations.push(Violation::AuthenticationRequired);
                }
                if ctx.rate_limited {
                    violations.push(Violation::RateLimitExceeded);
                }
                if ctx.risk_score > self.config.risk_score_threshold {
                    violations.push(Violation::HighRiskScore);
                }
                if let Some(allowed) = &policy.constraints.allowed_countries {
                    let permitted = ctx
                        .country
                        .as_ref()
                        .map(|c| allowed.iter().any(|a| a.eq_ignore_ascii_case(c)))
                        .unwrap_or(false);
                    if !permitted {
                        violations.push(Violation::GeoRestriction);
                    }
                }
                if operation == Operation::Switch
                    && !(policy.access_control.allow_client_switching && self.switching_allowed(&resource.tenant_id))
                {
                    violations.push(Violation::ClientSwitchingDisabled);
                }
                // switching moves the caller into the target tenant, it does not read across
                if resource.tenant_id != ctx.tenant_id && operation != Operation::Switch {
                    if let Some(violation) = self.cross_tenant_violation(policy, &resource.tenant_id, operation) {
                        violations.push(violation);
                    }
                }
            }
        }

        let verbose = policy
            .as_ref()
            .map(|p| p.audit.enabled && p.audit.level == AuditLevel::Comprehensive)
            .unwrap_or(false);
        let decision = AccessDecision::from_violations(violations, verbose);

        if !decision.allowed {
            tracing::warn!(
                tenant = %ctx.tenant_id,
                resource = %resource.describe(),
                ?operation,
                violations = ?decision.violations,
                "access denied"
            );
        }

        if decision.audit_required {
            let tags = policy.as_ref().map(|p| p.compliance_tags()).unwrap_or_default();
            let mut event = SecurityAuditEvent::builder(AuditEventType::AccessDecision)
                .tenant(&ctx.tenant_id)
                .resource(resource.describe())
                .severity(if decision.allowed { EventSeverity::Info } else { EventSeverity::Warning })
                .outcome(if decision.allowed { AuditOutcome::Allowed } else { AuditOutcome::Denied })
                .risk(ctx.risk_score)
                .details(json!({
                    "operation": operation,
                    "violations": decision.violations,
                }))
                .compliance_tags(tags);
            if let Some(user) = &ctx.user_id {
                event = event.actor(user.clone());
            }
            self.record(event.build());
        }

        decision
    }

    fn switching_allowed(&self, target: &TenantId) -> bool {
        self.policies
            .get(target)
            .map(|p| p.access_control.allow_client_switching)
            .unwrap_or(true)
    }

    /// Both the requester's and the owner's policy must permit cross-tenant access
    fn cross_tenant_violation(&self, requester: &TenantPolicy, owner: &TenantId, operation: Operation) -> Option<Violation> {
        if let Some(violation) = Self::level_violation(requester, operation) {
            return Some(violation);
        }
        match self.policies.get(owner) {
            Some(owner_policy) => Self::level_violation(&owner_policy, operation),
            None => Some(Violation::CrossTenantAccessDenied),
        }
    }

    fn level_violation(policy: &TenantPolicy, operation: Operation) -> Option<Violation> {
        match policy.isolation_level {
            IsolationLevel::Strict => Some(Violation::CrossTenantAccessDenied),
            IsolationLevel::Readonly if !operation.is_read() => Some(Violation::CrossTenantWriteDenied),
            IsolationLevel::Readonly => None,
            IsolationLevel::Shared if operation.is_read() => {
                (!policy.access_control.allow_cross_tenant_read).then_some(Violation::CrossTenantAccessDenied)
            }
            IsolationLevel::Shared => {
                (!policy.access_control.allow_cross_tenant_write).then_some(Violation::CrossTenantWriteDenied)
            }
        }
    }

    // ----- boundaries -----

    pub fn establish_boundary(&self, tenant: &TenantId, spec: BoundarySpec) -> TenancyResult<SecurityBoundary> {
        let policy = self.get_policy(tenant)?;
        let boundary = SecurityBoundary::establish(tenant.clone(), spec, &policy);
        self.boundaries.insert(boundary.id, boundary.clone());

        tracing::debug!(
            tenant = %tenant,
            boundary = %boundary.id,
            boundary_type = ?boundary.boundary_type,
            enforcement = ?boundary.enforcement,
            "security boundary established"
        );
        self.record(
            SecurityAuditEvent::builder(AuditEventType::BoundaryEstablished)
                .tenant(tenant)
                .resource(boundary.id.to_string())
                .details(json!({
                    "session_id": boundary.session_id,
                    "boundary_type": boundary.boundary_type,
                    "enforcement": boundary.enforcement,
                }))
                .build(),
        );
        Ok(boundary)
    }

    /// Validate one of the tenant's boundaries. Boundaries owned by another
    /// tenant are reported as not found.
    pub fn validate_boundary(&self, tenant: &TenantId, id: BoundaryId) -> TenancyResult<BoundaryValidation> {
        let policy = self.policies.get(tenant).map(|p| p.clone());
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.config.boundary_stale_after())
            .unwrap_or_else(|_| chrono::Duration::hours(24));

        let validation = {
            let mut boundary = match self.boundaries.get_mut(&id) {
                Some(b) if &b.tenant_id == tenant => b,
                _ => return Err(TenancyError::BoundaryNotFound(id)),
            };
            let validation = boundary.inspect(policy.as_ref(), now, stale_after);
            if boundary.active {
                boundary.last_validated = now;
            }
            validation
        };

        if !validation.valid {
            tracing::warn!(tenant = %tenant, boundary = %id, issues = ?validation.issues, "boundary validation failed");
            self.record(
                SecurityAuditEvent::builder(AuditEventType::BoundaryValidated)
                    .tenant(tenant)
                    .resource(id.to_string())
                    .severity(EventSeverity::Warning)
                    .details(json!({ "issues": validation.issues }))
                    .build(),
            );
        }
        Ok(validation)
    }

    pub fn get_boundary(&self, id: BoundaryId) -> Option<SecurityBoundary> {
        self.boundaries.get(&id).map(|b| b.clone())
    }

    /// Remove a boundary; false if it was already gone
    pub fn release_boundary(&self, id: BoundaryId) -> bool {
        let Some((_, mut boundary)) = self.boundaries.remove(&id) else {
            return false;
        };
        boundary.active = false;
        self.record(
            SecurityAuditEvent::builder(AuditEventType::BoundaryReleased)
                .tenant(&boundary.tenant_id)
                .resource(id.to_string())
                .details(json!({ "session_id": boundary.session_id }))
                .build(),
        );
        true
    }

    /// Remove every boundary owned by a session
    pub fn release_session_boundaries(&self, session_id: SessionId) -> usize {
        let ids: Vec<BoundaryId> = self
            .boundaries
            .iter()
            .filter(|b| b.session_id == session_id)
            .map(|b| b.id)
            .collect();
        ids.into_iter().filter(|id| self.release_boundary(*id)).count()
    }

    pub fn boundaries_for_tenant(&self, tenant: &TenantId) -> Vec<SecurityBoundary> {
        self.boundaries
            .iter()
            .filter(|b| &b.tenant_id == tenant)
            .map(|b| b.value().clone())
            .collect()
    }

    pub fn boundaries_for_session(&self, session_id: SessionId) -> Vec<SecurityBoundary> {
        self.boundaries
            .iter()
            .filter(|b| b.session_id == session_id)
            .map(|b| b.value().clone())
            .collect()
    }

    pub fn perform_health_check(&self, tenant: &TenantId) -> PolicyHealth {
        let policy = self.policies.get(tenant).map(|p| p.clone());
        let active = self
            .boundaries
            .iter()
            .filter(|b| &b.tenant_id == tenant && b.active)
            .count();
        let report = health::assess(tenant, policy.as_ref(), active);
        tracing::debug!(tenant = %tenant, score = report.score, overall = ?report.overall, "policy health check");
        report
    }

    // ----- audit -----

    /// Append to the audit log and forward to the sink
    pub fn record(&self, event: SecurityAuditEvent) -> SecurityAuditEvent {
        let sealed = self.audit.append(event);
        self.sink.ingest(&sealed);
        sealed
    }

    /// Record an isolation breach. Always critical, regardless of the
    /// tenant's audit settings.
    pub fn record_isolation_breach(
        &self,
        tenant: &TenantId,
        observer: &TenantId,
        details: serde_json::Value,
    ) -> SecurityAuditEvent {
        tracing::error!(tenant = %tenant, observer = %observer, %details, "isolation breach detected");
        let tags = self
            .policies
            .get(tenant)
            .map(|p| p.compliance_tags())
            .unwrap_or_default();
        self.record(
            SecurityAuditEvent::builder(AuditEventType::IsolationBreach)
                .tenant(tenant)
                .actor(observer.to_string())
                .severity(EventSeverity::Critical)
                .outcome(AuditOutcome::Breach)
                .risk(100)
                .details(details)
                .compliance_tags(tags)
                .build(),
        )
    }

    pub fn audit_events(&self, filter: &AuditFilter) -> Vec<SecurityAuditEvent> {
        self.audit.query(filter)
    }

    pub fn audit_log_len(&self) -> usize {
        self.audit.len()
    }

    /// Events dropped from the front of the log since start
    pub fn audit_events_evicted(&self) -> u64 {
        self.audit.evicted()
    }

    pub fn verify_audit_chain(&self) -> ChainVerification {
        self.audit.verify()
    }

    pub fn export_audit_json(&self) -> TenancyResult<String> {
        self.audit
            .export_json()
            .map_err(|e| TenancyError::InvalidInput(e.to_string()))
    }
}

/// Lets other components append to this evaluator's log. Isolation breaches
/// reported through the sink are forced to critical severity.
impl AuditSink for PolicyEvaluator {
    fn ingest(&self, event: &SecurityAuditEvent) {
        let mut event = event.clone();
        if event.event_type == AuditEventType::IsolationBreach {
            event.severity = EventSeverity::Critical;
            event.outcome = AuditOutcome::Breach;
        }
        self.record(event);
    }
}
