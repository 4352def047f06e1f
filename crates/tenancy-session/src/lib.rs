//! Session Registry & Switching Engine
//!
//! Tenant-scoped sessions with per-tenant caps, security boundaries from the
//! policy evaluator, and a switching workflow that pauses the source session
//! and opens a new one in the target tenant.
//!
//! # Switch Workflow
//!
//! ```text
//! resolve source ─► policy check (Switch) ─► target profile
//!        │                                        │
//!        │                         preload state / warm cache
//!        ▼                                        ▼
//!   pause source ─────────────► create target session ─► transfer counters
//!        │                                        │
//!        └──── on failure: terminate new, resume source, record failure
//! ```
//!
//! An expiry sweep runs on a [`tenancy_common::Ticker`] and terminates idle
//! sessions. Termination is idempotent, so the sweep and foreground calls
//! can race safely.

pub mod model;
pub mod profile;
pub mod registry;

pub use model::{
    IsolationSettings, PerformanceCounters, ResourceQuota, Session, SessionOptions, SessionStatus, SwitchOptions,
    TerminationReason,
};
pub use profile::{Optimization, OptimizationReport, SwitchPreferences, SwitchStatistics, SwitchingProfile};
pub use registry::{SessionRegistry, SwitchMetrics, SwitchResult};
