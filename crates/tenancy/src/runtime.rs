//! Isolation Runtime
//!
//! Builds every service from one [`TenancyConfig`] and a set of external
//! collaborators, and owns their background tickers.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tenancy_common::memory::{InMemoryStateManager, InMemoryTenantCache, TracingAuditSink};
use tenancy_common::{AuditSink, StateManagerFactory, TenancyConfig, TenancyError, TenancyResult, TenantCache};
use tenancy_harness::IsolationHarness;
use tenancy_integrity::{IntegrityChecker, IntegrityDataProvider, StaticDataProvider};
use tenancy_policy::PolicyEvaluator;
use tenancy_session::SessionRegistry;
use tenancy_validation::ValidationEngine;

/// Systems the runtime depends on but does not own
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn TenantCache>,
    pub state: Arc<dyn StateManagerFactory>,
    /// Durable audit storage; every recorded event is forwarded here
    pub audit: Arc<dyn AuditSink>,
    /// Payloads for scheduled integrity checks
    pub integrity_data: Arc<dyn IntegrityDataProvider>,
}

impl Collaborators {
    /// In-process reference collaborators, audit forwarded to tracing
    pub fn in_memory() -> Self {
        Self {
            cache: Arc::new(InMemoryTenantCache::new()),
            state: Arc::new(InMemoryStateManager::new()),
            audit: Arc::new(TracingAuditSink),
            integrity_data: Arc::new(StaticDataProvider::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Running,
}

pub struct IsolationRuntime {
    config: TenancyConfig,
    policy: Arc<PolicyEvaluator>,
    validation: Arc<ValidationEngine>,
    sessions: Arc<SessionRegistry>,
    integrity: Arc<IntegrityChecker>,
    harness: Arc<IsolationHarness>,
    phase: Mutex<Phase>,
}

impl IsolationRuntime {
    /// Wire all services. Builtin schemas and the default integrity checks
    /// are installed; nothing runs until [`start`](Self::start).
    pub fn new(config: TenancyConfig, collaborators: Collaborators) -> TenancyResult<Self> {
        let policy = Arc::new(PolicyEvaluator::new(config.policy.clone(), collaborators.audit));
        let validation = Arc::new(ValidationEngine::with_builtin_schemas(config.validation.clone())?);
        let sessions = Arc::new(SessionRegistry::new(
            config.session.clone(),
            policy.clone(),
            collaborators.cache.clone(),
            collaborators.state.clone(),
        ));

        let integrity = Arc::new(IntegrityChecker::new(
            config.integrity.clone(),
            validation.clone(),
            collaborators.integrity_data,
            policy.clone(),
        ));
        integrity.register_default_checks()?;

        let harness = Arc::new(IsolationHarness::new(
            config.harness.clone(),
            sessions.clone(),
            policy.clone(),
            integrity.clone(),
            collaborators.cache,
            collaborators.state,
        ));

        tracing::debug!(?config, "isolation runtime assembled");
        Ok(Self {
            config,
            policy,
            validation,
            sessions,
            integrity,
            harness,
            phase: Mutex::new(Phase::Idle),
        })
    }

    /// Load configuration from an optional file plus environment, then wire
    pub fn from_config_file(path: Option<&Path>, collaborators: Collaborators) -> TenancyResult<Self> {
        Self::new(TenancyConfig::load(path)?, collaborators)
    }

    /// Start the session sweep, periodic integrity checks and, when
    /// enabled, continuous isolation testing
    ///
    /// If a service fails to start, the ones this call already started are
    /// stopped again before the error is returned.
    pub async fn start(&self) -> TenancyResult<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Idle {
                return Err(TenancyError::AlreadyRunning("isolation-runtime".to_string()));
            }
            *phase = Phase::Starting;
        }

        if let Err(err) = self.start_services().await {
            tracing::warn!(error = %err, "isolation runtime failed to start");
            *self.phase.lock() = Phase::Idle;
            return Err(err);
        }

        *self.phase.lock() = Phase::Running;
        tracing::info!(
            continuous_testing = self.config.harness.continuous_enabled,
            "isolation runtime started"
        );
        Ok(())
    }

    async fn start_services(&self) -> TenancyResult<()> {
        self.sessions.start()?;
        if let Err(err) = self.integrity.start() {
            self.sessions.shutdown().await;
            return Err(err);
        }
        if self.config.harness.continuous_enabled {
            if let Err(err) = self.harness.start() {
                self.integrity.shutdown().await;
                self.sessions.shutdown().await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop every ticker and wait for in-progress runs. Registries are kept.
    pub async fn shutdown(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Running {
                return;
            }
            *phase = Phase::Idle;
        }
        self.harness.shutdown().await;
        self.integrity.shutdown().await;
        self.sessions.shutdown().await;
        tracing::info!("isolation runtime stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.phase.lock() == Phase::Running
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<PolicyEvaluator> {
        &self.policy
    }

    pub fn validation(&self) -> &Arc<ValidationEngine> {
        &self.validation
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn integrity(&self) -> &Arc<IntegrityChecker> {
        &self.integrity
    }

    pub fn harness(&self) -> &Arc<IsolationHarness> {
        &self.harness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use tenancy_common::TenantId;
    use tenancy_harness::{IsolationTestType, IsolationValidationTest};
    use tenancy_integrity::{DataType, IntegrityStatus};
    use tenancy_policy::PolicyOverrides;
    use tenancy_session::{SessionOptions, SessionStatus, SwitchOptions};
    use tenancy_validation::{builtin, ValidationContext};

    fn runtime() -> IsolationRuntime {
        IsolationRuntime::new(TenancyConfig::default(), Collaborators::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let rt = runtime();
        assert!(!rt.is_running());
        rt.start().await.unwrap();
        assert!(rt.is_running());
        assert!(rt.sessions().is_running());
        assert!(rt.integrity().is_running());
        assert!(!rt.harness().is_running());
        assert!(matches!(rt.start().await, Err(TenancyError::AlreadyRunning(_))));

        rt.shutdown().await;
        assert!(!rt.is_running());
        assert!(!rt.sessions().is_running());
        assert!(!rt.integrity().is_running());
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn test_continuous_testing_follows_config() {
        let mut config = TenancyConfig::default();
        config.harness.continuous_enabled = true;
        let rt = IsolationRuntime::new(config, Collaborators::in_memory()).unwrap();
        rt.start().await.unwrap();
        assert!(rt.harness().is_running());
        rt.shutdown().await;
        assert!(!rt.harness().is_running());
    }

    #[tokio::test]
    async fn test_failed_start_stops_started_services() {
        let mut config = TenancyConfig::default();
        config.harness.continuous_enabled = true;
        let rt = IsolationRuntime::new(config, Collaborators::in_memory()).unwrap();
        rt.harness().start().unwrap();

        assert!(matches!(rt.start().await, Err(TenancyError::AlreadyRunning(_))));
        assert!(!rt.is_running());
        assert!(!rt.sessions().is_running());
        assert!(!rt.integrity().is_running());

        rt.harness().shutdown().await;
        rt.start().await.unwrap();
        assert!(rt.sessions().is_running());
        rt.shutdown().await;
        assert!(!rt.sessions().is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_to_end() {
        let rt = runtime();
        let acme = TenantId::from("acme");
        let globex = TenantId::from("globex");
        let start = Utc::now() - ChronoDuration::seconds(1);
        rt.policy().create_policy(&acme, PolicyOverrides::default()).unwrap();
        rt.policy().create_policy(&globex, PolicyOverrides::default()).unwrap();

        let session = rt.sessions().create_session(&acme, SessionOptions::for_user("alice")).await.unwrap();
        let switched = rt
            .sessions()
            .switch_session(session, &globex, SwitchOptions::default())
            .await
            .unwrap();
        assert_eq!(rt.sessions().get_session(session).map(|s| s.status), Some(SessionStatus::Paused));
        assert_eq!(rt.sessions().switching_profile(&acme).statistics.total_switches, 1);

        let snapshot = rt.sessions().get_session(switched.new_session_id).unwrap().cache_snapshot();
        let checked = rt
            .validation()
            .validate(&snapshot, builtin::SESSION_STATE, &ValidationContext::for_tenant(&globex))
            .unwrap();
        assert!(checked.valid, "{:?}", checked.errors);

        let state = json!({"a": 1, "b": 2});
        rt.integrity().update_checksums(DataType::State, &state).unwrap();
        let result = rt
            .integrity()
            .run_specific_check("state_checksum", Some(state), Some(&acme))
            .await
            .unwrap();
        assert!(result.success);

        rt.harness()
            .register_test(
                IsolationValidationTest::new("cache", IsolationTestType::CacheIsolation, acme.clone(), globex.clone())
                    .with_iterations(10),
            )
            .unwrap();
        let probe = rt.harness().execute_validation_test("cache").await.unwrap();
        assert!(probe.isolation_effective);
        assert_eq!(probe.blocked, 10);

        let report = rt.integrity().run_all_checks(Some(&acme)).await.unwrap();
        assert_ne!(report.overall_status, IntegrityStatus::Healthy);
        assert_eq!(report.total_checks, 5);

        let audit = rt
            .harness()
            .generate_security_audit_report(Some(&acme), start, Utc::now())
            .unwrap();
        assert!(audit.total_events > 0);
        assert!(rt.policy().verify_audit_chain().valid);
    }
}
