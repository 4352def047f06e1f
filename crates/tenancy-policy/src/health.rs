//! Policy Health Scoring

use crate::model::TenantPolicy;
use serde::{Deserialize, Serialize};
use tenancy_common::{IssueSeverity, TenantId};

const MISSING_POLICY_PENALTY: u32 = 40;
const AUDIT_DISABLED_PENALTY: u32 = 15;
const FIELD_ENCRYPTION_PENALTY: u32 = 10;
const TOKEN_EXPIRY_PENALTY: u32 = 5;
const NO_BOUNDARIES_PENALTY: u32 = 25;
const MAX_TOKEN_EXPIRY_HOURS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => Self::Healthy,
            60..=79 => Self::Warning,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthFinding {
    pub code: String,
    pub severity: IssueSeverity,
    pub penalty: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyHealth {
    pub tenant_id: TenantId,
    pub overall: HealthStatus,
    pub score: u32,
    pub findings: Vec<HealthFinding>,
}

/// Score a tenant's policy posture, starting from 100
pub fn assess(tenant_id: &TenantId, policy: Option<&TenantPolicy>, active_boundaries: usize) -> PolicyHealth {
    let mut findings = Vec::new();
    let mut finding = |code: &str, severity, penalty, message: String| {
        findings.push(HealthFinding {
            code: code.to_string(),
            severity,
            penalty,
            message,
        });
    };

    match policy {
        None => finding(
            "policy_missing",
            IssueSeverity::Critical,
            MISSING_POLICY_PENALTY,
            format!("tenant {tenant_id} has no security policy"),
        ),
        Some(policy) => {
            if !policy.audit.enabled {
                finding(
                    "audit_disabled",
                    IssueSeverity::High,
                    AUDIT_DISABLED_PENALTY,
                    "audit logging is disabled".to_string(),
                );
            }
            if !policy.data_protection.field_encryption {
                finding(
                    "field_encryption_disabled",
                    IssueSeverity::Medium,
                    FIELD_ENCRYPTION_PENALTY,
                    "field-level encryption is disabled".to_string(),
                );
            }
            if policy.constraints.token_expiry_hours > MAX_TOKEN_EXPIRY_HOURS {
                finding(
                    "token_expiry_excessive",
                    IssueSeverity::Low,
                    TOKEN_EXPIRY_PENALTY,
                    format!(
                        "token expiry {}h exceeds {MAX_TOKEN_EXPIRY_HOURS}h",
                        policy.constraints.token_expiry_hours
                    ),
                );
            }
        }
    }

    if active_boundaries == 0 {
        finding(
            "no_boundaries",
            IssueSeverity::High,
            NO_BOUNDARIES_PENALTY,
            "no active security boundaries".to_string(),
        );
    }

    let deducted: u32 = findings.iter().map(|f| f.penalty).sum();
    let score = 100u32.saturating_sub(deducted);

    PolicyHealth {
        tenant_id: tenant_id.clone(),
        overall: HealthStatus::from_score(score),
        score,
        findings,
    }
}
