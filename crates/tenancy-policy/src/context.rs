//! Access Requests and Decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenancy_common::{TenancyError, TenancyResult, TenantId};

/// Who is asking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub tenant_id: TenantId,
    pub user_id: Option<String>,
    pub authenticated: bool,
    pub mfa_verified: bool,
    pub roles: Vec<String>,
    /// Upstream rate limiter already tripped for this caller
    pub rate_limited: bool,
    /// 0-100
    pub risk_score: u8,
    pub country: Option<String>,
    pub source_ip: Option<String>,
}

impl SecurityContext {
    /// Authenticated, low-risk context for a tenant
    pub fn authenticated(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            user_id: None,
            authenticated: true,
            mfa_verified: false,
            roles: Vec::new(),
            rate_limited: false,
            risk_score: 0,
            country: None,
            source_ip: None,
        }
    }

    /// Unauthenticated context
    pub fn anonymous(tenant_id: TenantId) -> Self {
        Self {
            authenticated: false,
            ..Self::authenticated(tenant_id)
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_risk_score(mut self, score: u8) -> Self {
        self.risk_score = score.min(100);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }
}

/// What is being accessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Tenant owning the resource
    pub tenant_id: TenantId,
    pub kind: ResourceKind,
    pub id: String,
}

impl Resource {
    pub fn new(tenant_id: TenantId, kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            kind,
            id: id.into(),
        }
    }

    pub fn describe(&self) -> String {
        format!("{}:{:?}:{}", self.tenant_id, self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Session,
    Data,
    Cache,
    State,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Delete,
    /// Move a session into the resource's tenant
    Switch,
    Admin,
}

impl Operation {
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }
}

/// Violated rule codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    PolicyNotFound,
    AuthenticationRequired,
    RateLimitExceeded,
    HighRiskScore,
    GeoRestriction,
    ClientSwitchingDisabled,
    CrossTenantAccessDenied,
    CrossTenantWriteDenied,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyNotFound => "policy_not_found",
            Self::AuthenticationRequired => "authentication_required",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::HighRiskScore => "high_risk_score",
            Self::GeoRestriction => "geo_restriction",
            Self::ClientSwitchingDisabled => "client_switching_disabled",
            Self::CrossTenantAccessDenied => "cross_tenant_access_denied",
            Self::CrossTenantWriteDenied => "cross_tenant_write_denied",
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `validate_access`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    /// First violation, or "allowed"
    pub reason: String,
    /// Every violation, in evaluation order
    pub violations: Vec<Violation>,
    pub audit_required: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl AccessDecision {
    pub(crate) fn from_violations(violations: Vec<Violation>, audit_verbose: bool) -> Self {
        let allowed = violations.is_empty();
        Self {
            allowed,
            reason: violations
                .first()
                .map(|v| v.as_str().to_string())
                .unwrap_or_else(|| "allowed".to_string()),
            audit_required: !allowed || audit_verbose,
            violations,
            evaluated_at: Utc::now(),
        }
    }

    pub fn has_violation(&self, violation: Violation) -> bool {
        self.violations.contains(&violation)
    }

    pub fn violation_codes(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.as_str().to_string()).collect()
    }

    /// `Ok(())` when allowed, otherwise `AccessDenied` with every code
    pub fn into_result(self) -> TenancyResult<()> {
        if self.allowed {
            Ok(())
        } else {
            let violations = self.violation_codes();
            Err(TenancyError::access_denied(self.reason, violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_reason_is_first_violation() {
        let decision = AccessDecision::from_violations(
            vec![Violation::AuthenticationRequired, Violation::HighRiskScore],
            false,
        );
        assert!(!decision.allowed);
        assert!(decision.audit_required);
        assert_eq!(decision.reason, "authentication_required");
        assert!(decision.has_violation(Violation::HighRiskScore));
    }

    #[test]
    fn test_allowed_decision_audit_depends_on_verbosity() {
        assert!(!AccessDecision::from_violations(vec![], false).audit_required);
        assert!(AccessDecision::from_violations(vec![], true).audit_required);
    }

    #[test]
    fn test_into_result() {
        let denied = AccessDecision::from_violations(vec![Violation::GeoRestriction], false);
        assert_eq!(
            denied.into_result(),
            Err(TenancyError::access_denied("geo_restriction", vec!["geo_restriction".into()]))
        );
    }
}
