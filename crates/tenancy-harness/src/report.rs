//! Security Audit Reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tenancy_common::{AuditEventType, AuditOutcome, EventSeverity, RiskLevel, SecurityAuditEvent, TenantId};
use uuid::Uuid;

/// Security posture of a tenant (or the whole platform) over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAuditReport {
    pub id: Uuid,
    pub tenant_id: Option<TenantId>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total_events: usize,
    pub events_by_type: BTreeMap<AuditEventType, usize>,
    pub events_by_severity: BTreeMap<EventSeverity, usize>,
    pub denied_access: usize,
    pub isolation_breaches: usize,
    /// Denied, breached or error-and-above events
    pub failures: usize,
    /// `100 - failure_ratio * 100`
    pub compliance_score: u32,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    /// Events the in-process log had already dropped; when non-zero the
    /// window may be incomplete
    pub events_evicted: u64,
}

impl SecurityAuditReport {
    pub fn compile(
        tenant: Option<&TenantId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        events: &[SecurityAuditEvent],
        events_evicted: u64,
    ) -> Self {
        let mut events_by_type = BTreeMap::new();
        let mut events_by_severity = BTreeMap::new();
        for event in events {
            *events_by_type.entry(event.event_type).or_insert(0) += 1;
            *events_by_severity.entry(event.severity).or_insert(0) += 1;
        }

        let denied_access = events
            .iter()
            .filter(|e| e.event_type == AuditEventType::AccessDecision && e.outcome == AuditOutcome::Denied)
            .count();
        let isolation_breaches = events_by_type.get(&AuditEventType::IsolationBreach).copied().unwrap_or(0);
        let failures = events.iter().filter(|e| e.is_failure()).count();
        let compliance_score = compliance_score(failures, events.len());

        let critical = events_by_severity.get(&EventSeverity::Critical).copied().unwrap_or(0);
        let errors = events_by_severity.get(&EventSeverity::Error).copied().unwrap_or(0);
        let risk_level = risk_level(critical, errors);

        let mut report = Self {
            id: Uuid::new_v4(),
            tenant_id: tenant.cloned(),
            period_start: start,
            period_end: end,
            generated_at: Utc::now(),
            total_events: events.len(),
            events_by_type,
            events_by_severity,
            denied_access,
            isolation_breaches,
            failures,
            compliance_score,
            risk_level,
            recommendations: Vec::new(),
            events_evicted,
        };
        report.recommendations = report.recommend();
        report
    }

    fn recommend(&self) -> Vec<String> {
        let mut recs = Vec::new();
        if self.events_evicted > 0 {
            recs.push(format!(
                "{} audit event(s) were evicted from the in-process log; raise audit_log_capacity or export more often",
                self.events_evicted
            ));
        }

        if self.total_events == 0 {
            recs.push("No audit activity in this period; confirm auditing is enabled for the tenant".to_string());
            return recs;
        }
        if self.isolation_breaches > 0 {
            recs.push(format!(
                "Investigate {} isolation breach(es) and rotate any exposed tenant data",
                self.isolation_breaches
            ));
        }
        if self.events_by_type.contains_key(&AuditEventType::IntegrityViolation) {
            recs.push("Review the latest integrity report and resolve outstanding issues".to_string());
        }
        if self.denied_access > 0 {
            recs.push(format!(
                "Review {} denied access attempt(s) for misconfigured clients or probing",
                self.denied_access
            ));
        }
        if self.compliance_score < 90 {
            recs.push("Failure ratio is above 10%; tighten policies or retire noisy integrations".to_string());
        }
        if recs.is_empty() {
            recs.push("No action required".to_string());
        }
        recs
    }
}

fn compliance_score(failures: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let ratio = failures.min(total) as f64 / total as f64;
    (100.0 - ratio * 100.0).round() as u32
}

fn risk_level(critical: usize, errors: usize) -> RiskLevel {
    match (critical, errors) {
        (c, _) if c > 0 => RiskLevel::Critical,
        (_, e) if e > 5 => RiskLevel::High,
        (_, e) if e > 0 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: AuditEventType, severity: EventSeverity, outcome: AuditOutcome) -> SecurityAuditEvent {
        SecurityAuditEvent::builder(event_type)
            .tenant(&TenantId::from("acme"))
            .severity(severity)
            .outcome(outcome)
            .details(json!({}))
            .build()
    }

    #[test]
    fn test_compile_counts_and_score() {
        let events = vec![
            event(AuditEventType::AccessDecision, EventSeverity::Warning, AuditOutcome::Denied),
            event(AuditEventType::AccessDecision, EventSeverity::Info, AuditOutcome::Allowed),
            event(AuditEventType::SessionCreated, EventSeverity::Info, AuditOutcome::Recorded),
            event(AuditEventType::SessionTerminated, EventSeverity::Info, AuditOutcome::Recorded),
        ];
        let now = Utc::now();
        let report = SecurityAuditReport::compile(None, now, now, &events, 0);

        assert_eq!(report.total_events, 4);
        assert_eq!(report.denied_access, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.compliance_score, 75);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.events_by_type[&AuditEventType::AccessDecision], 2);
        assert!(report.recommendations.iter().any(|r| r.contains("denied")));
    }

    #[test]
    fn test_breach_is_critical_risk() {
        let events = vec![event(AuditEventType::IsolationBreach, EventSeverity::Critical, AuditOutcome::Breach)];
        let now = Utc::now();
        let report = SecurityAuditReport::compile(None, now, now, &events, 0);
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert_eq!(report.isolation_breaches, 1);
        assert_eq!(report.compliance_score, 0);
    }

    #[test]
    fn test_empty_window() {
        let now = Utc::now();
        let report = SecurityAuditReport::compile(None, now, now, &[], 0);
        assert_eq!(report.compliance_score, 100);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_evicted_events_flag_incomplete_window() {
        let events = vec![event(AuditEventType::SessionCreated, EventSeverity::Info, AuditOutcome::Recorded)];
        let now = Utc::now();
        let report = SecurityAuditReport::compile(None, now, now, &events, 3);
        assert_eq!(report.events_evicted, 3);
        assert!(report.recommendations[0].contains("evicted"));
        assert!(!report.recommendations.iter().any(|r| r == "No action required"));
    }

    #[test]
    fn test_risk_thresholds() {
        assert_eq!(risk_level(0, 6), RiskLevel::High);
        assert_eq!(risk_level(0, 1), RiskLevel::Medium);
        assert_eq!(risk_level(1, 0), RiskLevel::Critical);
    }
}
