//! Session Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenancy_common::config::SessionConfig;
use tenancy_common::{IsolationLevel, SessionId, TenantId};
use tenancy_policy::{BoundaryId, BoundaryType, SecurityContext};
use uuid::Uuid;

/// Boundaries established for every new session
pub const SESSION_BOUNDARIES: [BoundaryType; 3] = [BoundaryType::Data, BoundaryType::Cache, BoundaryType::Session];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Terminated,
}

/// Tenant-scoped session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    tenant_id: TenantId,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub quota: ResourceQuota,
    pub performance: PerformanceCounters,
    pub isolation: IsolationSettings,
    pub boundary_ids: Vec<BoundaryId>,
    /// Tenant state instance backing this session
    pub state_instance: Option<Uuid>,
    /// Source session when created by a switch
    pub switched_from: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(tenant_id: TenantId, options: &SessionOptions, config: &SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: options.user_id.clone(),
            status: SessionStatus::Active,
            quota: ResourceQuota {
                allocated_memory_mb: 0,
                max_memory_mb: options.memory_mb.unwrap_or(config.default_memory_mb),
                allocated_storage_mb: 0,
                max_storage_mb: options.storage_mb.unwrap_or(config.default_storage_mb),
                max_concurrent_ops: options.max_concurrent_ops.unwrap_or(config.default_max_concurrent_ops),
            },
            performance: PerformanceCounters::default(),
            isolation: IsolationSettings {
                level: options.isolation_level.unwrap_or_default(),
                boundary_types: SESSION_BOUNDARIES.to_vec(),
            },
            boundary_ids: Vec::new(),
            state_instance: None,
            switched_from: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Owning tenant; fixed at creation
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Seconds since last activity
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity).num_seconds()
    }

    /// Context used when the registry asks the policy evaluator on this
    /// session's behalf
    pub fn security_context(&self) -> SecurityContext {
        let ctx = SecurityContext::authenticated(self.tenant_id.clone());
        match &self.user_id {
            Some(user) => ctx.with_user(user.clone()),
            None => ctx,
        }
    }

    /// Snapshot stored in the tenant cache
    pub fn cache_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.id,
            "tenant_id": self.tenant_id,
            "status": self.status,
            "created_at": self.created_at,
            "quota": self.quota,
        })
    }
}

/// Accounting-only resource quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub allocated_memory_mb: u64,
    pub max_memory_mb: u64,
    pub allocated_storage_mb: u64,
    pub max_storage_mb: u64,
    pub max_concurrent_ops: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub operations: u64,
    /// Operations carried over from a switched-from session
    pub inherited_operations: u64,
    pub last_switch_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationSettings {
    pub level: IsolationLevel,
    pub boundary_types: Vec<BoundaryType>,
}

/// Options for `create_session`. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionOptions {
    pub user_id: Option<String>,
    pub memory_mb: Option<u64>,
    pub storage_mb: Option<u64>,
    pub max_concurrent_ops: Option<u32>,
    /// Defaults to the tenant policy's level
    pub isolation_level: Option<IsolationLevel>,
    /// Ask the state manager to preload tenant data
    pub preload: bool,
}

impl SessionOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }
}

/// Options for `switch_session`. `None` flags fall back to the target
/// tenant's switching profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwitchOptions {
    pub preload_data: Option<bool>,
    pub warm_cache: Option<bool>,
    /// Carry performance counters and allocations into the new session
    pub transfer_state: bool,
    /// Caller context; must belong to the source tenant
    pub context: Option<SecurityContext>,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Explicit,
    Timeout,
    SwitchRollback,
    Shutdown,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Timeout => "timeout",
            Self::SwitchRollback => "switch_rollback",
            Self::Shutdown => "shutdown",
        }
    }
}
