//! Integrity Checks, Results and Reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tenancy_common::{IssueSeverity, TenantId};
use uuid::Uuid;

/// Manifest category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    State,
    Cache,
    Sync,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Checksum,
    Isolation,
    Consistency,
    Reference,
    Constraint,
    Business,
}

/// Ordered so that `Critical` sorts last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFrequency {
    /// Picked up by the periodic ticker
    Periodic,
    OnDemand,
}

/// A named, schedulable probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub id: String,
    pub name: String,
    pub check_type: CheckType,
    pub priority: CheckPriority,
    pub frequency: CheckFrequency,
    pub active: bool,
    /// Falls back to the checker default
    pub timeout_ms: Option<u64>,
    /// Manifest for checksum checks
    pub data_type: Option<DataType>,
    /// Validation schema for reference, constraint and business checks
    pub schema_id: Option<String>,
}

impl IntegrityCheck {
    pub fn new(id: impl Into<String>, check_type: CheckType, priority: CheckPriority) -> Self {
        let id = id.into();
        Self {
            name: id.replace('_', " "),
            id,
            check_type,
            priority,
            frequency: CheckFrequency::Periodic,
            active: true,
            timeout_ms: None,
            data_type: None,
            schema_id: None,
        }
    }

    pub fn checksum(id: impl Into<String>, data_type: DataType, priority: CheckPriority) -> Self {
        Self {
            data_type: Some(data_type),
            ..Self::new(id, CheckType::Checksum, priority)
        }
    }

    pub fn with_schema(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    pub fn on_demand(mut self) -> Self {
        self.frequency = CheckFrequency::OnDemand;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ChecksumMismatch,
    MissingChecksum,
    IsolationBreach,
    MissingTenantId,
    IdMismatch,
    TimestampSkew,
    VersionMismatch,
    BrokenReference,
    ConstraintViolation,
    BusinessRuleViolation,
    CheckFailed,
    Timeout,
}

/// What the auto-resolution pass should do for an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    /// Add the key's current checksum to the manifest
    RecordChecksum { data_type: DataType, key: String, value: serde_json::Value },
    /// Drop a manifest entry whose key no longer exists
    DropChecksum { data_type: DataType, key: String },
    /// Handled by the data provider
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub id: Uuid,
    pub check_id: String,
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub tenant_id: Option<TenantId>,
    /// Affected key or field
    pub key: Option<String>,
    pub message: String,
    pub auto_resolvable: bool,
    pub resolution: Option<Resolution>,
    pub resolved: bool,
}

impl IntegrityIssue {
    pub fn new(issue_type: IssueType, severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            check_id: String::new(),
            issue_type,
            severity,
            tenant_id: None,
            key: None,
            message: message.into(),
            auto_resolvable: false,
            resolution: None,
            resolved: false,
        }
    }

    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn for_tenant(mut self, tenant: &TenantId) -> Self {
        self.tenant_id = Some(tenant.clone());
        self
    }

    pub fn resolvable(mut self, resolution: Resolution) -> Self {
        self.auto_resolvable = true;
        self.resolution = Some(resolution);
        self
    }

    pub fn is_serious(&self) -> bool {
        self.severity >= IssueSeverity::High
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckMetrics {
    pub items_checked: usize,
    pub duration_ms: u64,
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityResult {
    pub check_id: String,
    pub check_type: CheckType,
    pub tenant_id: Option<TenantId>,
    /// The probe ran to completion
    pub executed: bool,
    /// Executed with no high or critical issue
    pub success: bool,
    pub issues: Vec<IntegrityIssue>,
    pub metrics: CheckMetrics,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl IntegrityResult {
    pub fn completed(
        check_id: &str,
        check_type: CheckType,
        tenant: Option<&TenantId>,
        mut issues: Vec<IntegrityIssue>,
        items_checked: usize,
    ) -> Self {
        for issue in &mut issues {
            issue.check_id = check_id.to_string();
        }
        Self {
            check_id: check_id.to_string(),
            check_type,
            tenant_id: tenant.cloned(),
            executed: true,
            success: !issues.iter().any(IntegrityIssue::is_serious),
            issues,
            metrics: CheckMetrics {
                items_checked,
                duration_ms: 0,
            },
            error: None,
            executed_at: Utc::now(),
        }
    }

    /// Result for a check that failed or timed out before finishing
    pub fn degraded(check: &IntegrityCheck, tenant: Option<&TenantId>, issue_type: IssueType, error: String) -> Self {
        let mut issue = IntegrityIssue::new(issue_type, IssueSeverity::High, error.clone());
        issue.check_id = check.id.clone();
        Self {
            check_id: check.id.clone(),
            check_type: check.check_type,
            tenant_id: tenant.cloned(),
            executed: false,
            success: false,
            issues: vec![issue],
            metrics: CheckMetrics::default(),
            error: Some(error),
            executed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Healthy,
    Warning,
    Critical,
    Corrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl IssueCounts {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }

    fn add(&mut self, severity: IssueSeverity) {
        match severity {
            IssueSeverity::Critical => self.critical += 1,
            IssueSeverity::High => self.high += 1,
            IssueSeverity::Medium => self.medium += 1,
            IssueSeverity::Low => self.low += 1,
        }
    }
}

/// `max(0, success_ratio * 100 - critical * 10)`, rounded
pub fn integrity_score(total_checks: usize, successful_checks: usize, critical_issues: usize) -> u32 {
    let ratio = if total_checks == 0 {
        1.0
    } else {
        successful_checks.min(total_checks) as f64 / total_checks as f64
    };
    (ratio * 100.0 - critical_issues as f64 * 10.0).max(0.0).round() as u32
}

pub fn overall_status(counts: &IssueCounts) -> IntegrityStatus {
    if counts.critical > 0 {
        IntegrityStatus::Corrupted
    } else if counts.high > 0 {
        IntegrityStatus::Critical
    } else if counts.total() > 0 {
        IntegrityStatus::Warning
    } else {
        IntegrityStatus::Healthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub id: Uuid,
    pub tenant_id: Option<TenantId>,
    pub generated_at: DateTime<Utc>,
    pub total_checks: usize,
    pub successful_checks: usize,
    pub failed_checks: usize,
    pub score: u32,
    pub overall_status: IntegrityStatus,
    pub issues_by_severity: IssueCounts,
    pub issues_by_type: BTreeMap<IssueType, usize>,
    pub auto_resolved: usize,
    pub duration_ms: u64,
    pub results: Vec<IntegrityResult>,
}

impl IntegrityReport {
    pub fn compile(tenant: Option<&TenantId>, results: Vec<IntegrityResult>, duration_ms: u64) -> Self {
        let mut by_severity = IssueCounts::default();
        let mut by_type = BTreeMap::new();
        for issue in results.iter().flat_map(|r| r.issues.iter()) {
            by_severity.add(issue.severity);
            *by_type.entry(issue.issue_type).or_insert(0) += 1;
        }

        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant.cloned(),
            generated_at: Utc::now(),
            total_checks: total,
            successful_checks: successful,
            failed_checks: total - successful,
            score: integrity_score(total, successful, by_severity.critical),
            overall_status: overall_status(&by_severity),
            issues_by_severity: by_severity,
            issues_by_type: by_type,
            auto_resolved: 0,
            duration_ms,
            results,
        }
    }

    pub fn issues(&self) -> impl Iterator<Item = &IntegrityIssue> {
        self.results.iter().flat_map(|r| r.issues.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ok(id: &str) -> IntegrityResult {
        IntegrityResult::completed(id, CheckType::Checksum, None, vec![], 1)
    }

    #[test]
    fn test_scoring_scenario() {
        let mut results: Vec<_> = (0..9).map(|i| ok(&format!("c{i}"))).collect();
        results.push(IntegrityResult::completed(
            "breach",
            CheckType::Isolation,
            None,
            vec![IntegrityIssue::new(IssueType::IsolationBreach, IssueSeverity::Critical, "leak")],
            1,
        ));

        let report = IntegrityReport::compile(None, results, 0);
        assert_eq!(report.successful_checks, 9);
        assert_eq!(report.score, 80);
        assert_eq!(report.overall_status, IntegrityStatus::Corrupted);
        assert_eq!(report.issues_by_type[&IssueType::IsolationBreach], 1);
        assert_eq!(report.results[9].issues[0].check_id, "breach");
    }

    #[test]
    fn test_status_ladder() {
        let mut counts = IssueCounts::default();
        assert_eq!(overall_status(&counts), IntegrityStatus::Healthy);
        counts.low = 1;
        assert_eq!(overall_status(&counts), IntegrityStatus::Warning);
        counts.high = 1;
        assert_eq!(overall_status(&counts), IntegrityStatus::Critical);
        counts.critical = 1;
        assert_eq!(overall_status(&counts), IntegrityStatus::Corrupted);
    }

    #[test]
    fn test_medium_issue_still_successful() {
        let result = IntegrityResult::completed(
            "skew",
            CheckType::Consistency,
            None,
            vec![IntegrityIssue::new(IssueType::TimestampSkew, IssueSeverity::Medium, "skew")],
            1,
        );
        assert!(result.success);
    }

    proptest! {
        #[test]
        fn prop_score_bounded(total in 0usize..200, successful in 0usize..200, critical in 0usize..50) {
            let score = integrity_score(total, successful, critical);
            prop_assert!(score <= 100);
        }

        #[test]
        fn prop_more_critical_never_scores_higher(total in 1usize..100, successful in 0usize..100, critical in 0usize..20) {
            let successful = successful.min(total);
            prop_assert!(integrity_score(total, successful, critical + 1) <= integrity_score(total, successful, critical));
        }

        #[test]
        fn prop_all_successful_without_critical_is_perfect(total in 1usize..100) {
            prop_assert_eq!(integrity_score(total, total, 0), 100);
        }
    }
}
