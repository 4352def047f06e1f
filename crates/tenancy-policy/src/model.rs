//! Tenant Security Policy Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenancy_common::{IsolationLevel, TenantId};

/// Tenant security policy. One active policy per tenant; updates replace it
/// and bump `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantPolicy {
    pub tenant_id: TenantId,
    pub version: u32,
    pub isolation_level: IsolationLevel,
    pub boundaries: BoundaryToggles,
    pub access_control: AccessControl,
    pub data_protection: DataProtection,
    pub audit: AuditSettings,
    pub constraints: PolicyConstraints,
    pub compliance: ComplianceFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantPolicy {
    /// Strict default template
    pub fn strict(tenant_id: TenantId) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            version: 1,
            isolation_level: IsolationLevel::Strict,
            boundaries: BoundaryToggles::default(),
            access_control: AccessControl::default(),
            data_protection: DataProtection::default(),
            audit: AuditSettings::default(),
            constraints: PolicyConstraints::default(),
            compliance: ComplianceFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply overrides section by section
    pub fn apply(&mut self, overrides: PolicyOverrides) {
        if let Some(level) = overrides.isolation_level {
            self.isolation_level = level;
        }
        if let Some(boundaries) = overrides.boundaries {
            self.boundaries = boundaries;
        }
        if let Some(access_control) = overrides.access_control {
            self.access_control = access_control;
        }
        if let Some(data_protection) = overrides.data_protection {
            self.data_protection = data_protection;
        }
        if let Some(audit) = overrides.audit {
            self.audit = audit;
        }
        if let Some(constraints) = overrides.constraints {
            self.constraints = constraints;
        }
        if let Some(compliance) = overrides.compliance {
            self.compliance = compliance;
        }
    }

    /// Compliance tags attached to audit events for this tenant
    pub fn compliance_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        if self.compliance.soc2 {
            tags.push("soc2".to_string());
        }
        if self.compliance.gdpr {
            tags.push("gdpr".to_string());
        }
        if self.compliance.hipaa {
            tags.push("hipaa".to_string());
        }
        if self.compliance.pci_dss {
            tags.push("pci_dss".to_string());
        }
        tags
    }
}

/// Partial policy. `None` sections keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverrides {
    pub isolation_level: Option<IsolationLevel>,
    pub boundaries: Option<BoundaryToggles>,
    pub access_control: Option<AccessControl>,
    pub data_protection: Option<DataProtection>,
    pub audit: Option<AuditSettings>,
    pub constraints: Option<PolicyConstraints>,
    pub compliance: Option<ComplianceFlags>,
}

/// Which boundary types the policy wants enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryToggles {
    pub network: bool,
    pub process: bool,
    pub data: bool,
    pub cache: bool,
    pub session: bool,
}

impl Default for BoundaryToggles {
    fn default() -> Self {
        Self {
            network: true,
            process: true,
            data: true,
            cache: true,
            session: true,
        }
    }
}

/// Access control rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub require_authentication: bool,
    pub require_mfa: bool,
    pub default_role: String,
    pub allowed_roles: Vec<String>,
    pub allow_cross_tenant_read: bool,
    pub allow_cross_tenant_write: bool,
    /// Sessions may switch into this tenant
    pub allow_client_switching: bool,
}

impl Default for AccessControl {
    fn default() -> Self {
        Self {
            require_authentication: true,
            require_mfa: false,
            default_role: "viewer".to_string(),
            allowed_roles: vec!["admin".into(), "operator".into(), "viewer".into()],
            allow_cross_tenant_read: false,
            allow_cross_tenant_write: false,
            allow_client_switching: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProtection {
    pub encryption_at_rest: bool,
    pub field_encryption: bool,
    pub data_masking: bool,
    pub retention_days: u32,
}

impl Default for DataProtection {
    fn default() -> Self {
        Self {
            encryption_at_rest: true,
            field_encryption: true,
            data_masking: true,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    pub enabled: bool,
    pub level: AuditLevel,
    pub retention_days: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: AuditLevel::Standard,
            retention_days: 365,
        }
    }
}

/// Audit verbosity. Denials are always audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Minimal,
    Standard,
    /// Every access decision is audited
    Comprehensive,
}

/// Rate and size constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConstraints {
    /// Overrides the registry-wide session cap when set
    pub max_concurrent_sessions: Option<usize>,
    pub rate_limit_per_minute: u32,
    pub max_request_size_kb: u32,
    pub token_expiry_hours: u32,
    /// ISO country codes; `None` disables geofencing
    pub allowed_countries: Option<Vec<String>>,
}

impl Default for PolicyConstraints {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: None,
            rate_limit_per_minute: 1000,
            max_request_size_kb: 10 * 1024,
            token_expiry_hours: 8,
            allowed_countries: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub soc2: bool,
    pub gdpr: bool,
    pub hipaa: bool,
    pub pci_dss: bool,
}

impl Default for ComplianceFlags {
    fn default() -> Self {
        Self {
            soc2: true,
            gdpr: false,
            hipaa: false,
            pci_dss: false,
        }
    }
}
