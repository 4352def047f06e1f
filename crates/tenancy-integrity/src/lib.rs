//! Tenancy Integrity - data integrity checks for isolated tenant data
//!
//! Checks come in six flavours: checksum manifests, isolation probes,
//! state/cache/sync consistency, and reference, constraint and business
//! rules delegated to the validation engine. A run executes every active
//! check in bounded windows and folds the results into one report.
//!
//! ```text
//!  register_check ──▶ checks
//!                       │ active, by priority
//!                       ▼
//!             ┌──────────────────┐   fetch    ┌──────────────┐
//!             │  run (windowed,  │──────────▶ │ DataProvider │
//!             │  per-check       │            └──────────────┘
//!             │  deadline)       │──▶ checksum store
//!             └────────┬─────────┘──▶ validation engine
//!                      ▼
//!               IntegrityReport ──▶ auto-resolve ──▶ audit sink
//!      score = success% - 10 x critical    status = worst severity
//! ```

#![warn(clippy::all)]

pub mod checker;
pub mod checksum;
pub mod model;
mod probes;
pub mod provider;

pub use checker::{CheckerStatus, IntegrityChecker};
pub use checksum::{ChecksumEntry, ChecksumStore, ChecksumVerification};
pub use model::{
    integrity_score, overall_status, CheckFrequency, CheckMetrics, CheckPriority, CheckType, DataType,
    IntegrityCheck, IntegrityIssue, IntegrityReport, IntegrityResult, IntegrityStatus, IssueCounts, IssueType,
    Resolution,
};
pub use provider::{IntegrityDataProvider, StaticDataProvider};
