//! Isolation Runtime Configuration
//!
//! Every recognised option is listed here. Unknown keys are rejected when
//! loading, so a typo in a file or environment variable fails loudly.

use crate::TenancyResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix, e.g. `TENANCY__SESSION__MAX_SESSIONS_PER_TENANT=4`
pub const ENV_PREFIX: &str = "TENANCY";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenancyConfig {
    pub policy: PolicyConfig,
    pub session: SessionConfig,
    pub validation: ValidationConfig,
    pub integrity: IntegrityConfig,
    pub harness: HarnessConfig,
}

impl TenancyConfig {
    /// Load defaults, then an optional file, then `TENANCY__*` environment variables
    pub fn load(path: Option<&Path>) -> TenancyResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }
}

/// Policy evaluator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Audit events retained in process (oldest evicted)
    pub audit_log_capacity: usize,
    /// Risk scores strictly above this are denied
    pub risk_score_threshold: u8,
    /// Boundaries unvalidated for longer than this are stale
    pub boundary_stale_after_secs: u64,
}

impl PolicyConfig {
    pub fn boundary_stale_after(&self) -> Duration {
        Duration::from_secs(self.boundary_stale_after_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            audit_log_capacity: 10_000,
            risk_score_threshold: 80,
            boundary_stale_after_secs: 24 * 60 * 60,
        }
    }
}

/// Session registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Active sessions per tenant unless the tenant policy says otherwise
    pub max_sessions_per_tenant: usize,
    /// Idle time before the sweep terminates a session
    pub session_timeout_secs: u64,
    /// Sweep period
    pub cleanup_interval_secs: u64,
    pub default_memory_mb: u64,
    pub default_storage_mb: u64,
    pub default_max_concurrent_ops: u32,
    /// Switch-time target for new switching profiles
    pub default_switch_target_ms: u64,
    /// Optimizer never lowers the target below this
    pub min_switch_target_ms: u64,
    /// Terminate the new session and resume the source when a late switch step fails
    pub rollback_failed_switch: bool,
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_tenant: 10,
            session_timeout_secs: 30 * 60,
            cleanup_interval_secs: 60,
            default_memory_mb: 256,
            default_storage_mb: 1024,
            default_max_concurrent_ops: 16,
            default_switch_target_ms: 500,
            min_switch_target_ms: 200,
            rollback_failed_switch: true,
        }
    }
}

/// Validation engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// Batch window size when the caller does not pick one
    pub default_max_concurrency: usize,
}

impl ValidationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
            default_max_concurrency: 8,
        }
    }
}

/// Integrity checker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegrityConfig {
    pub check_interval_secs: u64,
    pub max_concurrent_checks: usize,
    pub default_check_timeout_ms: u64,
    /// Allowed skew between state and cache timestamps
    pub timestamp_tolerance_secs: i64,
    pub auto_resolve: bool,
}

impl IntegrityConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn default_check_timeout(&self) -> Duration {
        Duration::from_millis(self.default_check_timeout_ms)
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            max_concurrent_checks: 4,
            default_check_timeout_ms: 30_000,
            timestamp_tolerance_secs: 30,
            auto_resolve: true,
        }
    }
}

/// Isolation test harness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Run registered tests on a timer
    pub continuous_enabled: bool,
    pub continuous_interval_secs: u64,
    pub max_concurrent_tests: usize,
    pub default_iterations: u32,
    pub default_test_timeout_ms: u64,
}

impl HarnessConfig {
    pub fn continuous_interval(&self) -> Duration {
        Duration::from_secs(self.continuous_interval_secs.max(1))
    }

    pub fn default_test_timeout(&self) -> Duration {
        Duration::from_millis(self.default_test_timeout_ms)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            continuous_enabled: false,
            continuous_interval_secs: 60 * 60,
            max_concurrent_tests: 2,
            default_iterations: 25,
            default_test_timeout_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TenancyConfig::default();
        assert_eq!(config.policy.risk_score_threshold, 80);
        assert_eq!(config.session.min_switch_target_ms, 200);
        assert_eq!(config.integrity.timestamp_tolerance_secs, 30);
        assert_eq!(config.policy.boundary_stale_after(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: TenancyConfig = serde_json::from_value(serde_json::json!({
            "session": { "max_sessions_per_tenant": 2 }
        }))
        .unwrap();
        assert_eq!(config.session.max_sessions_per_tenant, 2);
        assert_eq!(config.session.session_timeout_secs, 1800);
        assert_eq!(config.validation, ValidationConfig::default());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<TenancyConfig, _> = serde_json::from_value(serde_json::json!({
            "session": { "max_session_per_tenant": 2 }
        }));
        assert!(result.is_err());

        let result: Result<TenancyConfig, _> =
            serde_json::from_value(serde_json::json!({ "metrics": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("tenancy-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tenancy.json");
        std::fs::write(&path, r#"{ "harness": { "default_iterations": 7 } }"#).unwrap();

        let config = TenancyConfig::load(Some(&path)).unwrap();
        assert_eq!(config.harness.default_iterations, 7);
        assert_eq!(config.policy, PolicyConfig::default());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
