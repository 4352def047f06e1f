//! Validation Rule Engine
//!
//! Schemas are ordered lists of typed rules addressed by field path. Results
//! are cached by `(schema, generation, fingerprint(data, context))` in a
//! TTL + LRU cache, and failed rules with a remediation can be auto-fixed.
//!
//! ```text
//! data ──► schema lookup ──► cache? ──hit──► result (cache_hit)
//!                               │miss
//!                               ▼
//!              rules in order: required │ type │ format/enum │
//!                              range/length │ custom │ reference │ business
//!                               │
//!                               ▼
//!                errors / warnings / info ──► cache
//! ```

/// Schemas shipped with the engine
pub mod builtin;
/// Validation engine
pub mod engine;
/// JSON field paths
pub mod path;
/// Results, context and metrics
pub mod result;
/// Rule evaluation and hooks
pub mod rules;
/// Schema and rule model
pub mod schema;

pub use engine::{BatchItem, BatchOptions, BatchReport, ValidationEngine};
pub use result::{AutoFixOutcome, ValidationContext, ValidationIssue, ValidationMetrics, ValidationResult};
pub use rules::ValidationHook;
pub use schema::{
    codes, BusinessRule, FormatKind, Remediation, RuleKind, RuleSeverity, ValidationRule, ValidationSchema,
    ValueType,
};
