//! Tenant Policy Evaluator & Boundary Manager
//!
//! Owns one security policy per tenant, answers access requests against it,
//! and tracks the security boundaries established for each session.
//!
//! # Decision Flow
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  SecurityContext + Resource + Operation                          │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  policy ─► auth ─► rate limit ─► risk ─► geo ─► switch ─► cross  │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  AccessDecision { allowed, violations[] } ──► audit log (chain)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audit_log;
pub mod boundary;
pub mod context;
pub mod evaluator;
pub mod health;
pub mod model;

pub use audit_log::{AuditFilter, AuditLog};
pub use boundary::{
    BoundaryConfig, BoundaryId, BoundarySpec, BoundaryType, BoundaryValidation, EnforcementLevel,
    MonitoringThresholds, SecurityBoundary,
};
pub use context::{AccessDecision, Operation, Resource, ResourceKind, SecurityContext, Violation};
pub use evaluator::PolicyEvaluator;
pub use health::{HealthFinding, HealthStatus, PolicyHealth};
pub use model::{
    AccessControl, AuditLevel, AuditSettings, BoundaryToggles, ComplianceFlags, DataProtection,
    PolicyConstraints, PolicyOverrides, TenantPolicy,
};
