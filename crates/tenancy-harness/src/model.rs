//! Isolation Tests and Results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tenancy_common::{IssueSeverity, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationTestType {
    /// Policy decisions on another tenant's data records
    DataIsolation,
    /// Reads of another tenant's cache keys
    CacheIsolation,
    /// Reads of another tenant's live session
    SessionIsolation,
    /// Sharing of per-tenant state instances
    MemoryIsolation,
}

impl IsolationTestType {
    pub const ALL: [IsolationTestType; 4] = [
        Self::DataIsolation,
        Self::CacheIsolation,
        Self::SessionIsolation,
        Self::MemoryIsolation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataIsolation => "data_isolation",
            Self::CacheIsolation => "cache_isolation",
            Self::SessionIsolation => "session_isolation",
            Self::MemoryIsolation => "memory_isolation",
        }
    }
}

/// Pass/fail thresholds on top of effectiveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestCriteria {
    pub min_score: u32,
    /// Fail when iterations are slower than this on average
    pub max_avg_iteration_ms: Option<f64>,
}

impl Default for TestCriteria {
    fn default() -> Self {
        Self {
            min_score: 90,
            max_avg_iteration_ms: None,
        }
    }
}

/// A declarative cross-tenant probe: `probe_tenant` tries to reach
/// `target_tenant`'s data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationValidationTest {
    pub id: String,
    pub test_type: IsolationTestType,
    pub target_tenant: TenantId,
    pub probe_tenant: TenantId,
    pub iterations: u32,
    pub timeout_ms: u64,
    pub criteria: TestCriteria,
}

impl IsolationValidationTest {
    pub fn new(
        id: impl Into<String>,
        test_type: IsolationTestType,
        target_tenant: TenantId,
        probe_tenant: TenantId,
    ) -> Self {
        Self {
            id: id.into(),
            test_type,
            target_tenant,
            probe_tenant,
            iterations: 0,
            timeout_ms: 0,
            criteria: TestCriteria::default(),
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_criteria(mut self, criteria: TestCriteria) -> Self {
        self.criteria = criteria;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityKind {
    CrossTenantRead,
    CrossTenantWrite,
    CacheNamespaceLeak,
    SessionExposure,
    SharedStateInstance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub kind: VulnerabilityKind,
    pub severity: IssueSeverity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationValidationResult {
    pub test_id: String,
    pub test_type: IsolationTestType,
    pub target_tenant: TenantId,
    pub probe_tenant: TenantId,
    pub attempts: u32,
    pub blocked: u32,
    pub allowed: u32,
    pub leakage_detected: bool,
    /// Every attempt blocked and no leakage
    pub isolation_effective: bool,
    pub unauthorized_accesses: Vec<String>,
    /// One per distinct kind
    pub vulnerabilities: Vec<Vulnerability>,
    pub avg_iteration_ms: f64,
    pub score: u32,
    pub passed: bool,
    /// Set when the probe failed or timed out before finishing
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl IsolationValidationResult {
    pub fn block_rate(&self) -> f64 {
        if self.attempts == 0 {
            1.0
        } else {
            self.blocked as f64 / self.attempts as f64
        }
    }
}

/// `100 - 40 (ineffective) - 30 (leakage) - 5/unauthorized - 10/vulnerability
/// - min(10, avg_ms / 10)`, rounded and floored at zero
pub fn isolation_score(
    effective: bool,
    leakage: bool,
    unauthorized: usize,
    vulnerabilities: usize,
    avg_iteration_ms: f64,
) -> u32 {
    let mut score = 100.0;
    if !effective {
        score -= 40.0;
    }
    if leakage {
        score -= 30.0;
    }
    score -= unauthorized as f64 * 5.0;
    score -= vulnerabilities as f64 * 10.0;
    score -= (avg_iteration_ms.max(0.0) / 10.0).min(10.0);
    score.max(0.0).round() as u32
}
