//! In-process Audit Log
//!
//! Size-bounded, append-only ring of sealed events. When the ring is full the
//! oldest event is evicted and its hash becomes the new chain anchor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tenancy_common::audit::{verify_chain, ChainVerification, GENESIS_HASH};
use tenancy_common::{AuditEventType, EventSeverity, SecurityAuditEvent, TenantId};

pub struct AuditLog {
    ring: Mutex<Ring>,
    capacity: usize,
}

struct Ring {
    events: VecDeque<SecurityAuditEvent>,
    anchor: String,
    last_hash: String,
    evicted: u64,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity.min(1024)),
                anchor: GENESIS_HASH.to_string(),
                last_hash: GENESIS_HASH.to_string(),
                evicted: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Seal and append an event, returning the sealed copy
    pub fn append(&self, event: SecurityAuditEvent) -> SecurityAuditEvent {
        let mut ring = self.ring.lock();
        let sealed = event.seal(&ring.last_hash);
        ring.last_hash = sealed.hash.clone();
        ring.events.push_back(sealed.clone());

        while ring.events.len() > self.capacity {
            if let Some(oldest) = ring.events.pop_front() {
                ring.anchor = oldest.hash;
                ring.evicted += 1;
            }
        }
        sealed
    }

    pub fn query(&self, filter: &AuditFilter) -> Vec<SecurityAuditEvent> {
        self.ring
            .lock()
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped because the ring was full
    pub fn evicted(&self) -> u64 {
        self.ring.lock().evicted
    }

    pub fn verify(&self) -> ChainVerification {
        let ring = self.ring.lock();
        verify_chain(&ring.anchor, ring.events.iter())
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        let ring = self.ring.lock();
        serde_json::to_string_pretty(&ring.events)
    }
}

/// Audit query filter
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub tenant: Option<TenantId>,
    pub event_type: Option<AuditEventType>,
    pub min_severity: Option<EventSeverity>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn tenant(tenant: &TenantId) -> Self {
        Self {
            tenant: Some(tenant.clone()),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn of_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    fn matches(&self, event: &SecurityAuditEvent) -> bool {
        if let Some(t) = &self.tenant {
            if event.tenant_id.as_ref() != Some(t) {
                return false;
            }
        }
        if let Some(kind) = self.event_type {
            if event.event_type != kind {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(start) = self.start {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tenant: &str, severity: EventSeverity) -> SecurityAuditEvent {
        SecurityAuditEvent::builder(AuditEventType::AccessDecision)
            .tenant(&TenantId::from(tenant))
            .severity(severity)
            .build()
    }

    #[test]
    fn test_eviction_keeps_chain_verifiable() {
        let log = AuditLog::new(3);
        for _ in 0..5 {
            log.append(event("acme", EventSeverity::Info));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.evicted(), 2);
        let verification = log.verify();
        assert!(verification.valid, "{:?}", verification.error);
        assert_eq!(verification.checked_count, 3);
    }

    #[test]
    fn test_filtering() {
        let log = AuditLog::new(10);
        log.append(event("acme", EventSeverity::Info));
        log.append(event("acme", EventSeverity::Critical));
        log.append(event("globex", EventSeverity::Warning));

        assert_eq!(log.query(&AuditFilter::tenant(&TenantId::from("acme"))).len(), 2);
        let severe = AuditFilter {
            min_severity: Some(EventSeverity::Warning),
            ..Default::default()
        };
        assert_eq!(log.query(&severe).len(), 2);
        let future = AuditFilter::default().between(Utc::now() + chrono::Duration::hours(1), Utc::now() + chrono::Duration::hours(2));
        assert!(log.query(&future).is_empty());
    }

    #[test]
    fn test_export_json() {
        let log = AuditLog::new(4);
        log.append(event("acme", EventSeverity::Info));
        let json = log.export_json().unwrap();
        assert!(json.contains("access_decision"));
    }
}
