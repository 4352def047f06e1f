//! Isolation Test Harness

use crate::model::{isolation_score, IsolationTestType, IsolationValidationResult, IsolationValidationTest};
use crate::probes::{ProbeEnv, ProbeRun, Tally};
use crate::report::SecurityAuditReport;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tenancy_common::config::HarnessConfig;
use tenancy_common::{
    run_windowed, AuditEventType, AuditOutcome, EventSeverity, SecurityAuditEvent, StateManagerFactory,
    TenancyError, TenancyResult, TenantCache, TenantId, Ticker,
};
use tenancy_integrity::IntegrityChecker;
use tenancy_policy::{AuditFilter, PolicyEvaluator};
use tenancy_session::SessionRegistry;

/// Outcome of probing one tenant pair with every test type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataLeakageReport {
    pub target_tenant: TenantId,
    pub probe_tenant: TenantId,
    pub results: Vec<IsolationValidationResult>,
    pub leakage_detected: bool,
    pub isolation_effective: bool,
    /// Mean of the per-test scores
    pub score: u32,
    pub generated_at: DateTime<Utc>,
}

/// Removes the in-flight marker when a run ends
struct InFlight<'a> {
    runs: &'a DashMap<String, Arc<AtomicBool>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.id);
    }
}

pub struct IsolationHarness {
    tests: DashMap<String, IsolationValidationTest>,
    results: DashMap<String, IsolationValidationResult>,
    /// Cancel flag per running test
    in_flight: DashMap<String, Arc<AtomicBool>>,
    env: ProbeEnv,
    continuous: Mutex<Option<Ticker>>,
    config: HarnessConfig,
}

impl IsolationHarness {
    pub fn new(
        config: HarnessConfig,
        registry: Arc<SessionRegistry>,
        policy: Arc<PolicyEvaluator>,
        checker: Arc<IntegrityChecker>,
        cache: Arc<dyn TenantCache>,
        state: Arc<dyn StateManagerFactory>,
    ) -> Self {
        Self {
            tests: DashMap::new(),
            results: DashMap::new(),
            in_flight: DashMap::new(),
            env: ProbeEnv {
                registry,
                policy,
                checker,
                cache,
                state,
            },
            continuous: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    // ----- registry -----

    /// Add or replace a test. Zero iterations or timeout take the configured defaults.
    pub fn register_test(&self, mut test: IsolationValidationTest) -> TenancyResult<()> {
        if test.id.is_empty() {
            return Err(TenancyError::InvalidInput("isolation test id is empty".into()));
        }
        if test.target_tenant == test.probe_tenant {
            return Err(TenancyError::InvalidInput(format!(
                "test {} probes tenant {} against itself",
                test.id, test.target_tenant
            )));
        }
        if test.iterations == 0 {
            test.iterations = self.config.default_iterations;
        }
        if test.timeout_ms == 0 {
            test.timeout_ms = self.config.default_test_timeout_ms;
        }
        tracing::debug!(test = %test.id, test_type = test.test_type.as_str(), "isolation test registered");
        self.tests.insert(test.id.clone(), test);
        Ok(())
    }

    pub fn remove_test(&self, id: &str) -> bool {
        self.results.remove(id);
        self.tests.remove(id).is_some()
    }

    pub fn get_test(&self, id: &str) -> Option<IsolationValidationTest> {
        self.tests.get(id).map(|t| t.clone())
    }

    pub fn list_tests(&self) -> Vec<IsolationValidationTest> {
        let mut tests: Vec<_> = self.tests.iter().map(|t| t.clone()).collect();
        tests.sort_by(|a, b| a.id.cmp(&b.id));
        tests
    }

    /// Latest result of a registered test
    pub fn get_result(&self, id: &str) -> Option<IsolationValidationResult> {
        self.results.get(id).map(|r| r.clone())
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Ask a running test to stop before its next iteration
    pub fn cancel_test(&self, id: &str) -> bool {
        match self.in_flight.get(id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    // ----- execution -----

    /// Run a registered test. A second call for the same id while the first
    /// is in flight fails with `AlreadyRunning`.
    pub async fn execute_validation_test(&self, id: &str) -> TenancyResult<IsolationValidationResult> {
        let test = self
            .get_test(id)
            .ok_or_else(|| TenancyError::TestNotFound(id.to_string()))?;
        let result = self.run_test(&test).await?;
        self.results.insert(test.id.clone(), result.clone());
        Ok(result)
    }

    async fn run_test(&self, test: &IsolationValidationTest) -> TenancyResult<IsolationValidationResult> {
        let cancelled = match self.in_flight.entry(test.id.clone()) {
            Entry::Occupied(_) => return Err(TenancyError::AlreadyRunning(test.id.clone())),
            Entry::Vacant(slot) => slot.insert(Arc::new(AtomicBool::new(false))).clone(),
        };
        let _guard = InFlight {
            runs: &self.in_flight,
            id: test.id.clone(),
        };

        let iterations = if test.iterations == 0 {
            self.config.default_iterations
        } else {
            test.iterations
        };
        let timeout = match test.timeout_ms {
            0 => self.config.default_test_timeout(),
            ms => Duration::from_millis(ms),
        };

        tracing::info!(
            test = %test.id,
            test_type = test.test_type.as_str(),
            target = %test.target_tenant,
            probe = %test.probe_tenant,
            iterations,
            "isolation test started"
        );
        let started_at = Utc::now();
        let tally = Mutex::new(Tally::default());
        let run = ProbeRun {
            env: &self.env,
            test,
            iterations,
            tally: &tally,
            cancelled: &cancelled,
        };

        let probe = async {
            match test.test_type {
                IsolationTestType::DataIsolation => run.data_isolation().await,
                IsolationTestType::CacheIsolation => run.cache_isolation().await,
                IsolationTestType::SessionIsolation => run.session_isolation().await,
                IsolationTestType::MemoryIsolation => run.memory_isolation().await,
            }
        };
        let error = match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                tracing::warn!(test = %test.id, error = %err, "isolation probe failed");
                Some(err.to_string())
            }
            Err(_) => {
                let err = TenancyError::Timeout {
                    operation: format!("isolation test {}", test.id),
                    timeout_ms: timeout.as_millis() as u64,
                };
                tracing::warn!(test = %test.id, error = %err, "isolation probe timed out");
                Some(err.to_string())
            }
        };
        let error = error.or_else(|| {
            cancelled
                .load(Ordering::Acquire)
                .then(|| "cancelled before completion".to_string())
        });

        let result = self.conclude(test, tally.into_inner(), error, started_at);
        self.audit_result(&result);
        Ok(result)
    }

    fn conclude(
        &self,
        test: &IsolationValidationTest,
        tally: Tally,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> IsolationValidationResult {
        let avg_iteration_ms = tally.avg_iteration_ms();
        let isolation_effective =
            error.is_none() && tally.allowed == 0 && tally.blocked == tally.attempts && !tally.leakage;
        let score = isolation_score(
            isolation_effective,
            tally.leakage,
            tally.unauthorized.len(),
            tally.vulnerabilities.len(),
            avg_iteration_ms,
        );
        let passed = isolation_effective
            && score >= test.criteria.min_score
            && test
                .criteria
                .max_avg_iteration_ms
                .map_or(true, |max| avg_iteration_ms <= max);

        IsolationValidationResult {
            test_id: test.id.clone(),
            test_type: test.test_type,
            target_tenant: test.target_tenant.clone(),
            probe_tenant: test.probe_tenant.clone(),
            attempts: tally.attempts,
            blocked: tally.blocked,
            allowed: tally.allowed,
            leakage_detected: tally.leakage,
            isolation_effective,
            unauthorized_accesses: tally.unauthorized,
            vulnerabilities: tally.vulnerabilities,
            avg_iteration_ms,
            score,
            passed,
            error,
            started_at,
            completed_at: Utc::now(),
        }
    }

    fn audit_result(&self, result: &IsolationValidationResult) {
        if result.leakage_detected {
            self.env.policy.record_isolation_breach(
                &result.target_tenant,
                &result.probe_tenant,
                json!({
                    "test_id": result.test_id,
                    "test_type": result.test_type,
                    "unauthorized_accesses": result.unauthorized_accesses.len(),
                    "vulnerabilities": result.vulnerabilities,
                }),
            );
        }

        let (severity, outcome) = match (result.isolation_effective, result.error.is_some()) {
            (true, _) => (EventSeverity::Info, AuditOutcome::Recorded),
            (false, true) => (EventSeverity::Warning, AuditOutcome::Recorded),
            (false, false) => (EventSeverity::Error, AuditOutcome::Allowed),
        };
        self.env.policy.record(
            SecurityAuditEvent::builder(AuditEventType::IsolationTest)
                .tenant(&result.target_tenant)
                .actor(result.probe_tenant.to_string())
                .resource(result.test_id.clone())
                .severity(severity)
                .outcome(outcome)
                .details(json!({
                    "test_type": result.test_type,
                    "attempts": result.attempts,
                    "blocked": result.blocked,
                    "score": result.score,
                    "passed": result.passed,
                    "error": result.error,
                }))
                .build(),
        );

        tracing::info!(
            test = %result.test_id,
            effective = result.isolation_effective,
            leakage = result.leakage_detected,
            blocked = result.blocked,
            attempts = result.attempts,
            score = result.score,
            "isolation test finished"
        );
    }

    /// Probe `target` from `probe` with every test type
    pub async fn run_data_leakage_test(&self, target: &TenantId, probe: &TenantId) -> TenancyResult<DataLeakageReport> {
        if target == probe {
            return Err(TenancyError::InvalidInput(format!("cannot probe tenant {target} against itself")));
        }

        let mut results = Vec::with_capacity(IsolationTestType::ALL.len());
        for test_type in IsolationTestType::ALL {
            let test = IsolationValidationTest::new(
                format!("leakage:{target}:{probe}:{}", test_type.as_str()),
                test_type,
                target.clone(),
                probe.clone(),
            );
            results.push(self.run_test(&test).await?);
        }

        let score = (results.iter().map(|r| r.score as f64).sum::<f64>() / results.len() as f64).round() as u32;
        Ok(DataLeakageReport {
            target_tenant: target.clone(),
            probe_tenant: probe.clone(),
            leakage_detected: results.iter().any(|r| r.leakage_detected),
            isolation_effective: results.iter().all(|r| r.isolation_effective),
            score,
            results,
            generated_at: Utc::now(),
        })
    }

    /// Run every registered test not already in flight, `max_concurrent_tests` at a time
    pub async fn run_registered_tests(self: &Arc<Self>) -> Vec<IsolationValidationResult> {
        let ids: Vec<String> = self
            .list_tests()
            .into_iter()
            .map(|t| t.id)
            .filter(|id| !self.is_in_flight(id))
            .collect();

        let harness = Arc::clone(self);
        let outcomes = run_windowed(
            ids,
            self.config.max_concurrent_tests,
            move |id| {
                let harness = Arc::clone(&harness);
                async move { harness.execute_validation_test(&id).await }
            },
            |_| false,
        )
        .await;

        outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(Ok(result)) => Some(result),
                Ok(Err(TenancyError::AlreadyRunning(id))) => {
                    tracing::debug!(test = %id, "isolation test already in flight, skipped");
                    None
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "isolation test could not run");
                    None
                }
                Err(failure) => {
                    tracing::warn!(error = %failure, "isolation test unit failed");
                    None
                }
            })
            .collect()
    }

    // ----- reporting -----

    /// Summarize the policy audit log for a window, optionally for one tenant
    pub fn generate_security_audit_report(
        &self,
        tenant: Option<&TenantId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TenancyResult<SecurityAuditReport> {
        if end < start {
            return Err(TenancyError::InvalidInput("audit report window ends before it starts".into()));
        }
        let filter = AuditFilter {
            tenant: tenant.cloned(),
            ..Default::default()
        }
        .between(start, end);
        let events = self.env.policy.audit_events(&filter);
        let evicted = self.env.policy.audit_events_evicted();
        Ok(SecurityAuditReport::compile(tenant, start, end, &events, evicted))
    }

    // ----- continuous mode -----

    pub fn start(self: &Arc<Self>) -> TenancyResult<()> {
        let mut slot = self.continuous.lock();
        if slot.is_some() {
            return Err(TenancyError::AlreadyRunning("isolation-continuous".to_string()));
        }
        let harness: Weak<Self> = Arc::downgrade(self);
        *slot = Some(Ticker::spawn("isolation-continuous", self.config.continuous_interval(), move || {
            let harness = harness.clone();
            async move {
                if let Some(harness) = harness.upgrade() {
                    let results = harness.run_registered_tests().await;
                    let failed = results.iter().filter(|r| !r.passed).count();
                    if failed > 0 {
                        tracing::warn!(ran = results.len(), failed, "continuous isolation tests failing");
                    }
                }
            }
        }));
        tracing::info!(
            interval_secs = self.config.continuous_interval_secs,
            max_concurrent = self.config.max_concurrent_tests,
            "continuous isolation testing started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ticker = self.continuous.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
            tracing::info!("continuous isolation testing stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.continuous.lock().as_ref().map(Ticker::is_running).unwrap_or(false)
    }
}
