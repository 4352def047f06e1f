//! Tenancy - per-tenant client session isolation
//!
//! One import for the whole stack. [`IsolationRuntime`] wires the services
//! together around caller-supplied collaborators:
//!
//! ```text
//!                       ┌──────────────────────┐
//!                       │   IsolationRuntime   │  start / shutdown
//!                       └──────────┬───────────┘
//!        ┌───────────────┬─────────┼─────────────┬────────────────┐
//!        ▼               ▼         ▼             ▼                ▼
//!   PolicyEvaluator  SessionRegistry  ValidationEngine  IntegrityChecker  IsolationHarness
//!        │               │                               │                │
//!        └── audit ◀─────┴───────────────────────────────┴────────────────┘
//!                                   │
//!            cache / state / audit sink / integrity data (collaborators)
//! ```
//!
//! ```no_run
//! use tenancy::{Collaborators, IsolationRuntime, SessionOptions, TenancyConfig, TenantId};
//!
//! # async fn run() -> tenancy::TenancyResult<()> {
//! tenancy::init_tracing();
//! let runtime = IsolationRuntime::new(TenancyConfig::default(), Collaborators::in_memory())?;
//! runtime.start().await?;
//! let session = runtime
//!     .sessions()
//!     .create_session(&TenantId::from("acme"), SessionOptions::default())
//!     .await?;
//! # let _ = session;
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod runtime;

pub use runtime::{Collaborators, IsolationRuntime};

pub use tenancy_common::telemetry::init_tracing;
pub use tenancy_common::{
    AuditSink, IsolationLevel, SecurityAuditEvent, SessionId, StateManagerFactory, TenancyConfig, TenancyError,
    TenancyResult, TenantCache, TenantId,
};
pub use tenancy_harness::{
    DataLeakageReport, IsolationHarness, IsolationTestType, IsolationValidationResult, IsolationValidationTest,
    SecurityAuditReport,
};
pub use tenancy_integrity::{
    IntegrityCheck, IntegrityChecker, IntegrityDataProvider, IntegrityReport, IntegrityResult, IntegrityStatus,
};
pub use tenancy_policy::{AccessDecision, Operation, PolicyEvaluator, Resource, SecurityContext, TenantPolicy};
pub use tenancy_session::{SessionOptions, SessionRegistry, SwitchOptions, SwitchResult};
pub use tenancy_validation::{ValidationContext, ValidationEngine, ValidationResult, ValidationSchema};
