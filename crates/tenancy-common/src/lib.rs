//! Tenancy Common - shared building blocks for client session isolation
//!
//! Every service in the workspace is built from the pieces in this crate:
//!
//! - Tenant/session identifiers and isolation levels
//! - The [`TenancyError`] taxonomy
//! - [`config::TenancyConfig`], layered from file and environment
//! - The [`audit::SecurityAuditEvent`] model and hash chain
//! - Collaborator contracts (tenant cache, state manager, audit sink) and
//!   in-memory reference implementations
//! - A windowed worker pool and a cancellable ticker for background work
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CLIENT SESSION ISOLATION                            │
//! │                                                                         │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐               │
//! │  │   Isolation   │  │   Integrity   │  │    Session    │               │
//! │  │    Harness    │──│    Checker    │  │   Registry    │               │
//! │  └───────┬───────┘  └───────┬───────┘  └───────┬───────┘               │
//! │          │                  │                  │                        │
//! │  ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐               │
//! │  │    Policy     │  │  Validation   │  │    Policy     │               │
//! │  │   Evaluator   │  │    Engine     │  │   Evaluator   │               │
//! │  └───────────────┘  └───────────────┘  └───────────────┘               │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │   COLLABORATORS: tenant cache | state manager | audit sink       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod digest;
pub mod error;
pub mod memory;
pub mod pool;
pub mod telemetry;
pub mod ticker;

pub use audit::{AuditEventType, AuditOutcome, EventSeverity, RiskAssessment, SecurityAuditEvent};
pub use collaborators::{
    AuditSink, CacheMetrics, CacheSetOptions, CacheTier, KeyPattern, StateHandle,
    StateManagerFactory, StateOptions, TenantCache,
};
pub use config::TenancyConfig;
pub use error::{TenancyError, TenancyResult};
pub use pool::{run_windowed, UnitFailure};
pub use ticker::Ticker;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session identifier
pub type SessionId = uuid::Uuid;

/// Tenant (client) identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create tenant id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cross-tenant isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// No cross-tenant access
    #[default]
    Strict,
    /// Explicit cross-tenant reads allowed
    Shared,
    /// Read-only cross-tenant access
    Readonly,
}

/// Issue severity, ordered low to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Informational drift
    Low,
    /// Needs attention
    Medium,
    /// Integrity at risk
    High,
    /// Isolation or integrity broken
    Critical,
}

/// Overall risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Low risk
    Low,
    /// Medium risk
    Medium,
    /// High risk
    High,
    /// Critical risk
    Critical,
}

impl RiskLevel {
    /// Bucket a 0-100 risk score
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => Self::Low,
            30..=59 => Self::Medium,
            60..=80 => Self::High,
            _ => Self::Critical,
        }
    }
}
