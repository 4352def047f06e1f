//! Security Boundaries
//!
//! A boundary is a declared isolation contract attached to one session of one
//! tenant. The cache and state collaborators are expected to honour it; this
//! crate only records and audits it.

use crate::model::TenantPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tenancy_common::{IsolationLevel, SessionId, TenantId};
use uuid::Uuid;

/// Boundary identifier
pub type BoundaryId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityBoundary {
    pub id: BoundaryId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub boundary_type: BoundaryType,
    pub enforcement: EnforcementLevel,
    pub config: BoundaryConfig,
    pub thresholds: MonitoringThresholds,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryType {
    Network,
    Process,
    Data,
    Cache,
    Session,
}

impl BoundaryType {
    /// Is this type switched on in the policy
    pub fn enabled_in(&self, policy: &TenantPolicy) -> bool {
        let toggles = &policy.boundaries;
        match self {
            Self::Network => toggles.network,
            Self::Process => toggles.process,
            Self::Data => toggles.data,
            Self::Cache => toggles.cache,
            Self::Session => toggles.session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    Advisory,
    Enforced,
    Strict,
}

/// Type-specific boundary configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoundaryConfig {
    Network {
        allowed_egress: Vec<String>,
        deny_by_default: bool,
    },
    Process {
        max_processes: u32,
        sandboxed: bool,
    },
    Data {
        namespace: String,
        encryption_required: bool,
    },
    Cache {
        namespace: String,
        max_entries: u64,
        ttl_secs: u64,
    },
    Session {
        max_idle_secs: u64,
        bind_to_user: bool,
    },
}

impl BoundaryConfig {
    /// Default configuration for a boundary type under a policy
    pub fn default_for(boundary_type: BoundaryType, policy: &TenantPolicy) -> Self {
        let namespace = format!("tenant:{}", policy.tenant_id);
        match boundary_type {
            BoundaryType::Network => Self::Network {
                allowed_egress: Vec::new(),
                deny_by_default: policy.isolation_level == IsolationLevel::Strict,
            },
            BoundaryType::Process => Self::Process {
                max_processes: 16,
                sandboxed: true,
            },
            BoundaryType::Data => Self::Data {
                namespace,
                encryption_required: policy.data_protection.encryption_at_rest,
            },
            BoundaryType::Cache => Self::Cache {
                namespace,
                max_entries: 10_000,
                ttl_secs: 3600,
            },
            BoundaryType::Session => Self::Session {
                max_idle_secs: 1800,
                bind_to_user: true,
            },
        }
    }

    pub fn boundary_type(&self) -> BoundaryType {
        match self {
            Self::Network { .. } => BoundaryType::Network,
            Self::Process { .. } => BoundaryType::Process,
            Self::Data { .. } => BoundaryType::Data,
            Self::Cache { .. } => BoundaryType::Cache,
            Self::Session { .. } => BoundaryType::Session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitoringThresholds {
    pub max_violations_per_hour: u32,
    pub alert_on_breach: bool,
}

impl Default for MonitoringThresholds {
    fn default() -> Self {
        Self {
            max_violations_per_hour: 10,
            alert_on_breach: true,
        }
    }
}

/// Request to establish a boundary
#[derive(Debug, Clone, PartialEq)]
pub struct BoundarySpec {
    pub boundary_type: BoundaryType,
    pub session_id: SessionId,
    pub enforcement: Option<EnforcementLevel>,
    pub config: Option<BoundaryConfig>,
    pub thresholds: Option<MonitoringThresholds>,
}

impl BoundarySpec {
    pub fn new(boundary_type: BoundaryType, session_id: SessionId) -> Self {
        Self {
            boundary_type,
            session_id,
            enforcement: None,
            config: None,
            thresholds: None,
        }
    }

    pub fn with_enforcement(mut self, level: EnforcementLevel) -> Self {
        self.enforcement = Some(level);
        self
    }

    pub fn with_config(mut self, config: BoundaryConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Result of validating one boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryValidation {
    pub boundary_id: BoundaryId,
    pub valid: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl SecurityBoundary {
    pub(crate) fn establish(tenant_id: TenantId, spec: BoundarySpec, policy: &TenantPolicy) -> Self {
        let enforcement = spec.enforcement.unwrap_or_else(|| {
            if !spec.boundary_type.enabled_in(policy) {
                EnforcementLevel::Advisory
            } else if policy.isolation_level == IsolationLevel::Strict {
                EnforcementLevel::Strict
            } else {
                EnforcementLevel::Enforced
            }
        });
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            session_id: spec.session_id,
            boundary_type: spec.boundary_type,
            enforcement,
            config: spec
                .config
                .unwrap_or_else(|| BoundaryConfig::default_for(spec.boundary_type, policy)),
            thresholds: spec.thresholds.unwrap_or_default(),
            active: true,
            created_at: now,
            last_validated: now,
        }
    }

    /// Inspect the boundary against its tenant's policy
    pub fn inspect(
        &self,
        policy: Option<&TenantPolicy>,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> BoundaryValidation {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if !self.active {
            issues.push("boundary_inactive".to_string());
            recommendations.push("re-establish the boundary for the owning session".to_string());
        }

        if now - self.last_validated > stale_after {
            issues.push("boundary_stale".to_string());
            recommendations.push("revalidate boundary configuration".to_string());
        }

        if self.config.boundary_type() != self.boundary_type {
            issues.push("config_type_mismatch".to_string());
            recommendations.push(format!(
                "replace config with a {:?} configuration",
                self.boundary_type
            ));
        }

        match policy {
            None => {
                issues.push("policy_not_found".to_string());
                recommendations.push("create a security policy for the tenant".to_string());
            }
            Some(policy) => {
                if policy.isolation_level == IsolationLevel::Strict
                    && self.enforcement == EnforcementLevel::Advisory
                {
                    recommendations.push("raise enforcement to strict to match tenant isolation".to_string());
                }
                if let BoundaryConfig::Data { encryption_required: false, .. } = self.config {
                    if policy.data_protection.encryption_at_rest {
                        issues.push("encryption_not_required".to_string());
                        recommendations.push("require encryption for the data boundary".to_string());
                    }
                }
            }
        }

        if self.thresholds.max_violations_per_hour == 0 && !self.thresholds.alert_on_breach {
            recommendations.push("enable breach alerting".to_string());
        }

        BoundaryValidation {
            boundary_id: self.id,
            valid: issues.is_empty(),
            issues,
            recommendations,
        }
    }
}
