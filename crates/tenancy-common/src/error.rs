//! Error types for client session isolation

use crate::TenantId;
use thiserror::Error;
use uuid::Uuid;

/// Isolation error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TenancyError {
    /// Tenant has no security policy
    #[error("policy not found for tenant {0}")]
    PolicyNotFound(TenantId),

    /// Tenant already has a policy
    #[error("policy already exists for tenant {0}")]
    PolicyAlreadyExists(TenantId),

    /// Access decision denied the request
    #[error("access denied: {reason}")]
    AccessDenied {
        /// First failing check
        reason: String,
        /// Every violated rule code
        violations: Vec<String>,
    },

    /// Tenant reached its active-session cap
    #[error("session limit exceeded for tenant {tenant}: {active}/{limit}")]
    SessionLimitExceeded {
        /// Tenant
        tenant: TenantId,
        /// Sessions currently active
        active: usize,
        /// Configured limit
        limit: usize,
    },

    /// Unknown session
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Unknown security boundary
    #[error("boundary not found: {0}")]
    BoundaryNotFound(Uuid),

    /// Unit of work already in flight
    #[error("already running: {0}")]
    AlreadyRunning(String),

    /// Unknown validation schema
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// Data failed validation
    #[error("validation failed: {errors} errors, {warnings} warnings")]
    ValidationFailure {
        /// Error count
        errors: usize,
        /// Warning count
        warnings: usize,
    },

    /// Unknown integrity check
    #[error("check not found: {0}")]
    CheckNotFound(String),

    /// Integrity check could not execute
    #[error("check execution error in {check_id}: {message}")]
    CheckExecutionError {
        /// Check id
        check_id: String,
        /// Failure detail
        message: String,
    },

    /// Unknown isolation test
    #[error("isolation test not found: {0}")]
    TestNotFound(String),

    /// One tenant's data reachable from another tenant
    #[error("isolation breach: {tenant} data reachable from {observer}")]
    IsolationBreach {
        /// Tenant owning the data
        tenant: TenantId,
        /// Tenant that observed it
        observer: TenantId,
    },

    /// Operation exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name
        operation: String,
        /// Deadline
        timeout_ms: u64,
    },

    /// Malformed input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// External cache/state/audit collaborator failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl TenancyError {
    /// Build an access-denied error from collected violation codes
    pub fn access_denied(reason: impl Into<String>, violations: Vec<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
            violations,
        }
    }

    /// Stable kind label for logs and structured results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PolicyNotFound(_) => "policy_not_found",
            Self::PolicyAlreadyExists(_) => "policy_already_exists",
            Self::AccessDenied { .. } => "access_denied",
            Self::SessionLimitExceeded { .. } => "session_limit_exceeded",
            Self::SessionNotFound(_) => "session_not_found",
            Self::BoundaryNotFound(_) => "boundary_not_found",
            Self::AlreadyRunning(_) => "already_running",
            Self::SchemaNotFound(_) => "schema_not_found",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::CheckNotFound(_) => "check_not_found",
            Self::CheckExecutionError { .. } => "check_execution_error",
            Self::TestNotFound(_) => "test_not_found",
            Self::IsolationBreach { .. } => "isolation_breach",
            Self::Timeout { .. } => "timeout",
            Self::InvalidInput(_) => "invalid_input",
            Self::Collaborator(_) => "collaborator",
            Self::Config(_) => "config",
        }
    }
}

impl From<config::ConfigError> for TenancyError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for isolation operations
pub type TenancyResult<T> = Result<T, TenancyError>;
