//! Tenancy Harness - black-box isolation testing
//!
//! Drives the session registry, policy evaluator and integrity checker as a
//! probe tenant would: the target tenant owns something, the probe tenant
//! tries to reach it. Each round is either blocked or allowed; anything the
//! probe tenant actually read is run through the integrity checker to
//! confirm leakage.
//!
//! ```text
//!   IsolationValidationTest ──▶ execute (one in flight per id, deadline)
//!                                   │
//!        ┌──────────────┬───────────┼──────────────┬──────────────┐
//!        ▼              ▼           ▼              ▼              │
//!   data: policy   cache: get   session:      memory: state      │
//!   decisions      under probe  access_session instances         │
//!        └──────────────┴───────────┴──────────────┘              │
//!                       ▼                                          │
//!             integrity checker (leakage) ──▶ breach audit         │
//!                       ▼                                          │
//!           IsolationValidationResult ◀───────────── continuous ticker
//! ```

#![warn(clippy::all)]

pub mod harness;
pub mod model;
mod probes;
pub mod report;

pub use harness::{DataLeakageReport, IsolationHarness};
pub use model::{
    isolation_score, IsolationTestType, IsolationValidationResult, IsolationValidationTest, TestCriteria,
    Vulnerability, VulnerabilityKind,
};
pub use report::SecurityAuditReport;
