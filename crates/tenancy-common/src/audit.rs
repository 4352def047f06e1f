//! Security Audit Events (Tamper-Evident)
//!
//! Events are immutable once built. Each carries the hash of its predecessor,
//! so a log of events forms a SHA-256 chain that can be re-walked.

use crate::{RiskLevel, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash anchoring an empty chain
pub const GENESIS_HASH: &str = "genesis";

/// Security audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<TenantId>,
    pub event_type: AuditEventType,
    pub severity: EventSeverity,
    pub outcome: AuditOutcome,
    pub actor: Option<String>,
    pub resource: Option<String>,
    pub details: serde_json::Value,
    pub risk: RiskAssessment,
    pub compliance_tags: Vec<String>,
    pub prev_hash: String,
    pub hash: String,
}

impl SecurityAuditEvent {
    /// Start building an event
    pub fn builder(event_type: AuditEventType) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type)
    }

    /// Recompute the hash of this event against `prev_hash`
    pub fn compute_hash(&self, prev_hash: &str) -> String {
        let data = format!(
            "{}|{}|{}|{:?}|{:?}|{:?}|{}|{}|{}|{}",
            self.id,
            self.timestamp.to_rfc3339(),
            self.tenant_id.as_ref().map(|t| t.as_str()).unwrap_or(""),
            self.event_type,
            self.severity,
            self.outcome,
            self.actor.as_deref().unwrap_or(""),
            self.resource.as_deref().unwrap_or(""),
            self.details,
            prev_hash,
        );
        hex::encode(Sha256::digest(data.as_bytes()))
    }

    /// Link this event after `prev_hash`
    pub fn seal(mut self, prev_hash: &str) -> Self {
        self.prev_hash = prev_hash.to_string();
        self.hash = self.compute_hash(prev_hash);
        self
    }

    /// True if the event denied something or reports a breach
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AuditOutcome::Denied | AuditOutcome::Breach)
            || self.severity >= EventSeverity::Error
    }
}

/// Builder for audit events
pub struct AuditEventBuilder {
    event: SecurityAuditEvent,
}

impl AuditEventBuilder {
    fn new(event_type: AuditEventType) -> Self {
        Self {
            event: SecurityAuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                tenant_id: None,
                event_type,
                severity: EventSeverity::Info,
                outcome: AuditOutcome::Recorded,
                actor: None,
                resource: None,
                details: serde_json::Value::Null,
                risk: RiskAssessment::default(),
                compliance_tags: Vec::new(),
                prev_hash: String::new(),
                hash: String::new(),
            },
        }
    }

    pub fn tenant(mut self, tenant: &TenantId) -> Self {
        self.event.tenant_id = Some(tenant.clone());
        self
    }

    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.event.outcome = outcome;
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.event.actor = Some(actor.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.event.resource = Some(resource.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.event.details = details;
        self
    }

    pub fn risk(mut self, score: u8) -> Self {
        self.event.risk = RiskAssessment::from_score(score);
        self
    }

    pub fn compliance_tags(mut self, tags: Vec<String>) -> Self {
        self.event.compliance_tags = tags;
        self
    }

    /// Finish an unsealed event; the log seals it on append
    pub fn build(self) -> SecurityAuditEvent {
        self.event
    }
}

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PolicyCreated,
    PolicyUpdated,
    PolicyRemoved,
    AccessDecision,
    BoundaryEstablished,
    BoundaryValidated,
    BoundaryReleased,
    SessionCreated,
    SessionSwitched,
    SessionTerminated,
    IsolationBreach,
    IntegrityViolation,
    IsolationTest,
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Outcome recorded by the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Allowed,
    Denied,
    Breach,
    Recorded,
}

/// Risk assessment attached to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
}

impl RiskAssessment {
    pub fn from_score(score: u8) -> Self {
        let score = score.min(100);
        Self {
            score,
            level: RiskLevel::from_score(score),
        }
    }
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self::from_score(0)
    }
}

/// Result of re-walking a hash chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    pub checked_count: usize,
    pub error: Option<String>,
}

/// Verify that `events` form an unbroken chain starting at `anchor`
pub fn verify_chain<'a>(
    anchor: &str,
    events: impl IntoIterator<Item = &'a SecurityAuditEvent>,
) -> ChainVerification {
    let mut prev_hash = anchor.to_string();
    let mut checked_count = 0;

    for event in events {
        if event.prev_hash != prev_hash {
            return ChainVerification {
                valid: false,
                checked_count,
                error: Some(format!("hash chain broken at event {}", event.id)),
            };
        }
        if event.compute_hash(&prev_hash) != event.hash {
            return ChainVerification {
                valid: false,
                checked_count,
                error: Some(format!("event {} hash mismatch", event.id)),
            };
        }
        prev_hash = event.hash.clone();
        checked_count += 1;
    }

    ChainVerification {
        valid: true,
        checked_count,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> Vec<SecurityAuditEvent> {
        let mut prev = GENESIS_HASH.to_string();
        (0..n)
            .map(|i| {
                let event = SecurityAuditEvent::builder(AuditEventType::AccessDecision)
                    .tenant(&TenantId::from("acme"))
                    .details(serde_json::json!({ "seq": i }))
                    .build()
                    .seal(&prev);
                prev = event.hash.clone();
                event
            })
            .collect()
    }

    #[test]
    fn test_chain_verifies() {
        let events = chain(5);
        let result = verify_chain(GENESIS_HASH, &events);
        assert!(result.valid);
        assert_eq!(result.checked_count, 5);
    }

    #[test]
    fn test_tampering_detected() {
        let mut events = chain(4);
        events[2].details = serde_json::json!({ "seq": 99 });
        let result = verify_chain(GENESIS_HASH, &events);
        assert!(!result.valid);
        assert_eq!(result.checked_count, 2);
    }

    #[test]
    fn test_failure_classification() {
        let denied = SecurityAuditEvent::builder(AuditEventType::AccessDecision)
            .outcome(AuditOutcome::Denied)
            .build();
        let info = SecurityAuditEvent::builder(AuditEventType::PolicyCreated).build();
        assert!(denied.is_failure());
        assert!(!info.is_failure());
    }
}
