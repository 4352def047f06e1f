//! Integrity Checker
//!
//! Owns the check registry and the checksum manifests, runs checks in
//! bounded windows with a per-check deadline, and compiles the results into
//! a scored [`IntegrityReport`].

use crate::checksum::{ChecksumStore, ChecksumVerification};
use crate::model::{
    CheckFrequency, CheckPriority, CheckType, DataType, IntegrityCheck, IntegrityIssue, IntegrityReport,
    IntegrityResult, IntegrityStatus, IssueType, Resolution,
};
use crate::probes;
use crate::provider::IntegrityDataProvider;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tenancy_common::config::IntegrityConfig;
use tenancy_common::{
    run_windowed, AuditEventType, AuditOutcome, AuditSink, EventSeverity, IssueSeverity, SecurityAuditEvent,
    TenancyError, TenancyResult, TenantId, Ticker,
};
use tenancy_validation::{builtin, ValidationEngine};

/// Point-in-time view of the checker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerStatus {
    pub periodic_running: bool,
    pub registered_checks: usize,
    pub active_checks: usize,
    pub last_run: Option<DateTime<Utc>>,
    pub last_score: Option<u32>,
    pub last_status: Option<IntegrityStatus>,
    pub manifest_sizes: BTreeMap<DataType, usize>,
}

/// Clears the in-flight flag when a run ends, including by panic
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct IntegrityChecker {
    checks: DashMap<String, IntegrityCheck>,
    checksums: ChecksumStore,
    validation: Arc<ValidationEngine>,
    provider: Arc<dyn IntegrityDataProvider>,
    audit: Arc<dyn AuditSink>,
    last_report: RwLock<Option<IntegrityReport>>,
    running: AtomicBool,
    ticker: Mutex<Option<Ticker>>,
    config: IntegrityConfig,
}

impl IntegrityChecker {
    pub fn new(
        config: IntegrityConfig,
        validation: Arc<ValidationEngine>,
        provider: Arc<dyn IntegrityDataProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            checks: DashMap::new(),
            checksums: ChecksumStore::new(),
            validation,
            provider,
            audit,
            last_report: RwLock::new(None),
            running: AtomicBool::new(false),
            ticker: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    /// Checks installed on a fresh deployment. The validation-backed ones
    /// need the builtin schemas.
    pub fn default_checks() -> Vec<IntegrityCheck> {
        vec![
            IntegrityCheck::checksum("state_checksum", DataType::State, CheckPriority::Critical),
            IntegrityCheck::new("cache_isolation", CheckType::Isolation, CheckPriority::Critical),
            IntegrityCheck::new("state_consistency", CheckType::Consistency, CheckPriority::High),
            IntegrityCheck::new("session_state_rules", CheckType::Business, CheckPriority::High)
                .with_schema(builtin::SESSION_STATE),
            IntegrityCheck::new("tenant_config_constraints", CheckType::Constraint, CheckPriority::Medium)
                .with_schema(builtin::TENANT_CONFIG),
        ]
    }

    pub fn register_default_checks(&self) -> TenancyResult<()> {
        Self::default_checks()
            .into_iter()
            .try_for_each(|check| self.register_check(check))
    }

    // ----- registry -----

    /// Add or replace a check
    pub fn register_check(&self, check: IntegrityCheck) -> TenancyResult<()> {
        match check.check_type {
            CheckType::Checksum if check.data_type.is_none() => {
                return Err(TenancyError::InvalidInput(format!(
                    "checksum check {} needs a data type",
                    check.id
                )));
            }
            CheckType::Reference | CheckType::Constraint | CheckType::Business => {
                let schema_id = check.schema_id.as_deref().ok_or_else(|| {
                    TenancyError::InvalidInput(format!("check {} needs a validation schema", check.id))
                })?;
                if self.validation.get_schema(schema_id).is_none() {
                    return Err(TenancyError::SchemaNotFound(schema_id.to_string()));
                }
            }
            _ => {}
        }

        tracing::debug!(check = %check.id, check_type = ?check.check_type, priority = ?check.priority, "integrity check registered");
        self.checks.insert(check.id.clone(), check);
        Ok(())
    }

    pub fn remove_check(&self, id: &str) -> bool {
        self.checks.remove(id).is_some()
    }

    pub fn get_check(&self, id: &str) -> Option<IntegrityCheck> {
        self.checks.get(id).map(|c| c.clone())
    }

    pub fn list_checks(&self) -> Vec<IntegrityCheck> {
        let mut checks: Vec<_> = self.checks.iter().map(|c| c.clone()).collect();
        checks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        checks
    }

    // ----- runs -----

    /// Run every active check, optionally scoped to one tenant.
    ///
    /// Only one run may be in flight; a second caller gets `AlreadyRunning`.
    /// A check that fails or overruns its deadline contributes a failed
    /// result instead of aborting the run.
    pub async fn run_all_checks(self: &Arc<Self>, tenant: Option<&TenantId>) -> TenancyResult<IntegrityReport> {
        self.run_checks(tenant.cloned(), false).await
    }

    async fn run_checks(self: &Arc<Self>, tenant: Option<TenantId>, periodic_only: bool) -> TenancyResult<IntegrityReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TenancyError::AlreadyRunning("integrity-checks".to_string()));
        }
        let _guard = RunGuard(&self.running);
        let started = Instant::now();

        let mut checks: Vec<IntegrityCheck> = self
            .checks
            .iter()
            .filter(|c| c.active && (!periodic_only || c.frequency == CheckFrequency::Periodic))
            .map(|c| c.clone())
            .collect();
        checks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        tracing::info!(
            checks = checks.len(),
            tenant = tenant.as_ref().map(TenantId::as_str),
            "integrity run started"
        );

        let checker = Arc::clone(self);
        let scope = tenant.clone();
        let outcomes = run_windowed(
            checks.clone(),
            self.config.max_concurrent_checks,
            move |check| {
                let checker = Arc::clone(&checker);
                let tenant = scope.clone();
                async move { checker.execute_guarded(&check, tenant.as_ref()).await }
            },
            |_| false,
        )
        .await;

        let results: Vec<IntegrityResult> = checks
            .iter()
            .zip(outcomes)
            .map(|(check, outcome)| {
                outcome.unwrap_or_else(|failure| {
                    IntegrityResult::degraded(check, tenant.as_ref(), IssueType::CheckFailed, failure.to_string())
                })
            })
            .collect();

        let mut report = IntegrityReport::compile(tenant.as_ref(), results, started.elapsed().as_millis() as u64);
        if self.config.auto_resolve {
            report.auto_resolved = self.auto_resolve(&mut report.results).await;
        }

        self.audit_report(&report);
        tracing::info!(
            score = report.score,
            status = ?report.overall_status,
            failed = report.failed_checks,
            auto_resolved = report.auto_resolved,
            duration_ms = report.duration_ms,
            "integrity run finished"
        );
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    /// Run one check. With `data` the provider is bypassed.
    ///
    /// Unlike a full run, execution errors and timeouts are returned to the
    /// caller.
    pub async fn run_specific_check(
        &self,
        id: &str,
        data: Option<Value>,
        tenant: Option<&TenantId>,
    ) -> TenancyResult<IntegrityResult> {
        let check = self
            .get_check(id)
            .ok_or_else(|| TenancyError::CheckNotFound(id.to_string()))?;
        let deadline = self.deadline(&check);

        let result = tokio::time::timeout(deadline, self.execute(&check, data, tenant))
            .await
            .map_err(|_| TenancyError::Timeout {
                operation: format!("integrity check {}", check.id),
                timeout_ms: deadline.as_millis() as u64,
            })??;
        self.audit_breaches(&result);
        Ok(result)
    }

    fn deadline(&self, check: &IntegrityCheck) -> Duration {
        check
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_check_timeout())
    }

    /// Never fails: errors and timeouts become degraded results
    async fn execute_guarded(&self, check: &IntegrityCheck, tenant: Option<&TenantId>) -> IntegrityResult {
        let deadline = self.deadline(check);
        match tokio::time::timeout(deadline, self.execute(check, None, tenant)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::warn!(check = %check.id, error = %err, "integrity check failed");
                IntegrityResult::degraded(check, tenant, IssueType::CheckFailed, err.to_string())
            }
            Err(_) => {
                tracing::warn!(check = %check.id, timeout_ms = deadline.as_millis() as u64, "integrity check timed out");
                let err = TenancyError::Timeout {
                    operation: format!("integrity check {}", check.id),
                    timeout_ms: deadline.as_millis() as u64,
                };
                IntegrityResult::degraded(check, tenant, IssueType::Timeout, err.to_string())
            }
        }
    }

    async fn execute(
        &self,
        check: &IntegrityCheck,
        data: Option<Value>,
        tenant: Option<&TenantId>,
    ) -> TenancyResult<IntegrityResult> {
        let started = Instant::now();
        let data = match data {
            Some(data) => data,
            None => self.provider.fetch(check, tenant).await?,
        };

        let mut result = match check.check_type {
            CheckType::Checksum => {
                let data_type = check
                    .data_type
                    .ok_or_else(|| TenancyError::InvalidInput(format!("check {} has no data type", check.id)))?;
                self.checksum_result(check, data_type, &data, tenant)?
            }
            CheckType::Isolation => match tenant {
                Some(tenant) => probes::client_isolation(&check.id, &data, tenant)?,
                None => probes::namespace_isolation(&check.id, &data)?,
            },
            CheckType::Consistency => {
                let tenant = tenant.ok_or_else(|| {
                    TenancyError::InvalidInput(format!("consistency check {} needs a tenant", check.id))
                })?;
                let layer = |name: &str| {
                    data.get(name)
                        .ok_or_else(|| TenancyError::InvalidInput(format!("consistency payload has no {name} layer")))
                };
                probes::state_consistency(
                    &check.id,
                    layer("state")?,
                    layer("cache")?,
                    data.get("sync"),
                    tenant,
                    self.config.timestamp_tolerance_secs,
                )
            }
            CheckType::Reference | CheckType::Constraint | CheckType::Business => {
                probes::validation_backed(&self.validation, check, &data, tenant)?
            }
        };

        result.metrics.duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            check = %check.id,
            issues = result.issues.len(),
            success = result.success,
            duration_ms = result.metrics.duration_ms,
            "integrity check executed"
        );
        Ok(result)
    }

    fn checksum_result(
        &self,
        check: &IntegrityCheck,
        data_type: DataType,
        data: &Value,
        tenant: Option<&TenantId>,
    ) -> TenancyResult<IntegrityResult> {
        let entries = probes::as_object(data, "checksum")?;
        let outcome = self.checksums.verify(data_type, entries);

        let mut issues: Vec<IntegrityIssue> = outcome
            .mismatches
            .iter()
            .map(|key| {
                IntegrityIssue::new(
                    IssueType::ChecksumMismatch,
                    IssueSeverity::High,
                    format!("checksum mismatch for {key}"),
                )
                .for_key(key.clone())
            })
            .collect();

        issues.extend(outcome.missing.iter().map(|key| {
            let issue = IntegrityIssue::new(IssueType::MissingChecksum, IssueSeverity::Medium, format!("no checksum pairing for {key}"))
                .for_key(key.clone());
            match entries.get(key) {
                Some(value) => issue.resolvable(Resolution::RecordChecksum {
                    data_type,
                    key: key.clone(),
                    value: value.clone(),
                }),
                None => issue.resolvable(Resolution::DropChecksum {
                    data_type,
                    key: key.clone(),
                }),
            }
        }));

        if let Some(tenant) = tenant {
            issues = issues.into_iter().map(|i| i.for_tenant(tenant)).collect();
        }

        Ok(IntegrityResult::completed(
            &check.id,
            CheckType::Checksum,
            tenant,
            issues,
            entries.len(),
        ))
    }

    async fn auto_resolve(&self, results: &mut [IntegrityResult]) -> usize {
        let mut resolved = 0;
        for issue in results.iter_mut().flat_map(|r| r.issues.iter_mut()) {
            if !issue.auto_resolvable || issue.resolved {
                continue;
            }
            let outcome = match &issue.resolution {
                Some(Resolution::RecordChecksum { data_type, key, value }) => {
                    self.checksums.record(*data_type, key, value);
                    Ok(true)
                }
                Some(Resolution::DropChecksum { data_type, key }) => Ok(self.checksums.drop_key(*data_type, key)),
                Some(Resolution::External) | None => self.provider.resolve(issue).await,
            };
            match outcome {
                Ok(true) => {
                    issue.resolved = true;
                    resolved += 1;
                }
                Ok(false) => {
                    tracing::debug!(issue = %issue.id, issue_type = ?issue.issue_type, "issue left for manual resolution")
                }
                Err(err) => {
                    tracing::warn!(issue = %issue.id, issue_type = ?issue.issue_type, error = %err, "auto-resolution failed")
                }
            }
        }
        resolved
    }

    // ----- audit -----

    fn audit_breaches(&self, result: &IntegrityResult) {
        for issue in result
            .issues
            .iter()
            .filter(|i| i.issue_type == IssueType::IsolationBreach)
        {
            let mut event = SecurityAuditEvent::builder(AuditEventType::IsolationBreach)
                .severity(EventSeverity::Critical)
                .outcome(AuditOutcome::Breach)
                .actor("integrity-checker")
                .risk(100)
                .details(json!({
                    "check_id": issue.check_id,
                    "key": issue.key,
                    "message": issue.message,
                }));
            if let Some(tenant) = &issue.tenant_id {
                event = event.tenant(tenant);
            }
            if let Some(key) = &issue.key {
                event = event.resource(key.clone());
            }
            self.audit.ingest(&event.build());
        }
    }

    fn audit_report(&self, report: &IntegrityReport) {
        for result in &report.results {
            self.audit_breaches(result);
        }

        let severity = match report.overall_status {
            IntegrityStatus::Healthy => return,
            IntegrityStatus::Warning => EventSeverity::Warning,
            IntegrityStatus::Critical => EventSeverity::Error,
            IntegrityStatus::Corrupted => EventSeverity::Critical,
        };
        let mut event = SecurityAuditEvent::builder(AuditEventType::IntegrityViolation)
            .severity(severity)
            .outcome(AuditOutcome::Recorded)
            .actor("integrity-checker")
            .resource(report.id.to_string())
            .details(json!({
                "score": report.score,
                "status": report.overall_status,
                "failed_checks": report.failed_checks,
                "issues_by_severity": report.issues_by_severity,
            }));
        if let Some(tenant) = &report.tenant_id {
            event = event.tenant(tenant);
        }
        self.audit.ingest(&event.build());
    }

    // ----- direct probes -----

    pub fn verify_checksums(&self, data_type: DataType, data: &Value) -> TenancyResult<ChecksumVerification> {
        Ok(self.checksums.verify(data_type, probes::as_object(data, "checksum")?))
    }

    /// Record fresh checksums for every key in `data`
    pub fn update_checksums(&self, data_type: DataType, data: &Value) -> TenancyResult<usize> {
        let updated = self.checksums.update(data_type, probes::as_object(data, "checksum")?);
        tracing::debug!(?data_type, updated, "checksums updated");
        Ok(updated)
    }

    /// Every entry of `data` must carry `target` as its tenant id
    pub fn validate_client_isolation(&self, data: &Value, target: &TenantId) -> TenancyResult<IntegrityResult> {
        let result = probes::client_isolation("client_isolation", data, target)?;
        self.audit_breaches(&result);
        Ok(result)
    }

    pub fn validate_state_consistency(
        &self,
        state: &Value,
        cache: &Value,
        sync: Option<&Value>,
        tenant: &TenantId,
    ) -> IntegrityResult {
        let result = probes::state_consistency(
            "state_consistency",
            state,
            cache,
            sync,
            tenant,
            self.config.timestamp_tolerance_secs,
        );
        self.audit_breaches(&result);
        result
    }

    pub fn last_report(&self) -> Option<IntegrityReport> {
        self.last_report.read().clone()
    }

    pub fn status(&self) -> CheckerStatus {
        let last = self.last_report.read();
        CheckerStatus {
            periodic_running: self.is_running(),
            registered_checks: self.checks.len(),
            active_checks: self.checks.iter().filter(|c| c.active).count(),
            last_run: last.as_ref().map(|r| r.generated_at),
            last_score: last.as_ref().map(|r| r.score),
            last_status: last.as_ref().map(|r| r.overall_status),
            manifest_sizes: self.checksums.manifest_sizes(),
        }
    }

    // ----- lifecycle -----

    /// Run periodic checks on the configured interval
    pub fn start(self: &Arc<Self>) -> TenancyResult<()> {
        let mut slot = self.ticker.lock();
        if slot.is_some() {
            return Err(TenancyError::AlreadyRunning("integrity-periodic".to_string()));
        }
        let checker: Weak<Self> = Arc::downgrade(self);
        *slot = Some(Ticker::spawn("integrity-periodic", self.config.check_interval(), move || {
            let checker = checker.clone();
            async move {
                let Some(checker) = checker.upgrade() else { return };
                match checker.run_checks(None, true).await {
                    Ok(_) => {}
                    Err(TenancyError::AlreadyRunning(_)) => {
                        tracing::debug!("integrity run still in flight, skipping tick")
                    }
                    Err(err) => tracing::warn!(error = %err, "periodic integrity run failed"),
                }
            }
        }));
        tracing::info!(interval_secs = self.config.check_interval_secs, "periodic integrity checks started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
            tracing::info!("periodic integrity checks stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().as_ref().map(Ticker::is_running).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticDataProvider;
    use async_trait::async_trait;
    use tenancy_common::config::ValidationConfig;
    use tenancy_common::memory::MemoryAuditSink;

    struct Fixture {
        checker: Arc<IntegrityChecker>,
        provider: Arc<StaticDataProvider>,
        sink: Arc<MemoryAuditSink>,
    }

    fn fixture(config: IntegrityConfig) -> Fixture {
        let provider = Arc::new(StaticDataProvider::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let validation = Arc::new(ValidationEngine::with_builtin_schemas(ValidationConfig::default()).unwrap());
        let checker = Arc::new(IntegrityChecker::new(config, validation, provider.clone(), sink.clone()));
        Fixture {
            checker,
            provider,
            sink,
        }
    }

    fn acme() -> TenantId {
        TenantId::from("acme")
    }

    #[test]
    fn test_register_rejects_incomplete_checks() {
        let f = fixture(IntegrityConfig::default());
        let bare = IntegrityCheck::new("sum", CheckType::Checksum, CheckPriority::Low);
        assert!(matches!(f.checker.register_check(bare), Err(TenancyError::InvalidInput(_))));

        let unknown = IntegrityCheck::new("rules", CheckType::Constraint, CheckPriority::Low).with_schema("nope");
        assert!(matches!(
            f.checker.register_check(unknown),
            Err(TenancyError::SchemaNotFound(_))
        ));

        f.checker.register_default_checks().unwrap();
        let ids: Vec<_> = f.checker.list_checks().into_iter().map(|c| c.id).collect();
        assert_eq!(ids[0], "cache_isolation");
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_checksum_round_trip_and_mismatch() {
        let f = fixture(IntegrityConfig::default());
        let mut state = json!({"a": 1, "b": {"x": true}, "c": "three"});
        assert_eq!(f.checker.update_checksums(DataType::State, &state).unwrap(), 3);
        assert!(f.checker.verify_checksums(DataType::State, &state).unwrap().is_clean());

        state["b"]["x"] = json!(false);
        let outcome = f.checker.verify_checksums(DataType::State, &state).unwrap();
        assert_eq!(outcome.mismatches, vec!["b".to_string()]);

        assert!(matches!(
            f.checker.update_checksums(DataType::State, &json!([1, 2])),
            Err(TenancyError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_checksums_auto_resolve() {
        let f = fixture(IntegrityConfig::default());
        f.checker
            .register_check(IntegrityCheck::checksum("sum", DataType::Cache, CheckPriority::High))
            .unwrap();
        f.checker.update_checksums(DataType::Cache, &json!({"old": 1})).unwrap();
        f.provider.put("sum", None, json!({"new": 2}));

        let report = f.checker.run_all_checks(None).await.unwrap();
        assert_eq!(report.issues().count(), 2);
        assert_eq!(report.auto_resolved, 2);
        assert!(report.issues().all(|i| i.resolved));

        let clean = f.checker.verify_checksums(DataType::Cache, &json!({"new": 2})).unwrap();
        assert!(clean.is_clean());
    }

    #[tokio::test]
    async fn test_isolation_breach_corrupts_report() {
        let f = fixture(IntegrityConfig::default());
        f.checker
            .register_check(IntegrityCheck::new("iso", CheckType::Isolation, CheckPriority::Critical))
            .unwrap();
        f.checker
            .register_check(IntegrityCheck::new("cfg", CheckType::Constraint, CheckPriority::Low).with_schema(builtin::TENANT_CONFIG))
            .unwrap();
        f.provider.put(
            "iso",
            Some(&acme()),
            json!({"k1": {"tenant_id": "acme"}, "k2": {"tenant_id": "globex"}}),
        );
        f.provider.put("cfg", None, json!({"tenant_id": "acme", "isolation_level": "strict"}));

        let report = f.checker.run_all_checks(Some(&acme())).await.unwrap();
        assert_eq!(report.total_checks, 2);
        assert_eq!(report.successful_checks, 1);
        assert_eq!(report.issues_by_severity.critical, 1);
        assert_eq!(report.score, 40);
        assert_eq!(report.overall_status, IntegrityStatus::Corrupted);

        let events = f.sink.events();
        assert!(events
            .iter()
            .any(|e| e.event_type == AuditEventType::IsolationBreach && e.severity == EventSeverity::Critical));
        assert!(events.iter().any(|e| e.event_type == AuditEventType::IntegrityViolation));
        assert_eq!(f.checker.last_report().map(|r| r.id), Some(report.id));
    }

    #[tokio::test]
    async fn test_scheduled_run_skips_on_demand_checks() {
        let f = fixture(IntegrityConfig::default());
        f.checker
            .register_check(IntegrityCheck::checksum("state_sum", DataType::State, CheckPriority::Low))
            .unwrap();
        f.checker
            .register_check(IntegrityCheck::checksum("cache_sum", DataType::Cache, CheckPriority::High).on_demand())
            .unwrap();
        f.provider.put("state_sum", None, json!({}));
        f.provider.put("cache_sum", None, json!({}));

        let scheduled = f.checker.run_checks(None, true).await.unwrap();
        let ran: Vec<_> = scheduled.results.iter().map(|r| r.check_id.as_str()).collect();
        assert_eq!(ran, vec!["state_sum"]);

        let manual = f.checker.run_all_checks(None).await.unwrap();
        assert_eq!(manual.total_checks, 2);
    }

    struct SlowProvider;

    #[async_trait]
    impl IntegrityDataProvider for SlowProvider {
        async fn fetch(&self, _check: &IntegrityCheck, _tenant: Option<&TenantId>) -> TenancyResult<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn test_timeout_degrades_without_aborting() {
        let validation = Arc::new(ValidationEngine::new(ValidationConfig::default()));
        let checker = Arc::new(IntegrityChecker::new(
            IntegrityConfig::default(),
            validation,
            Arc::new(SlowProvider),
            Arc::new(MemoryAuditSink::new()),
        ));
        checker
            .register_check(
                IntegrityCheck::checksum("slow", DataType::State, CheckPriority::High)
                    .with_timeout(Duration::from_millis(20)),
            )
            .unwrap();

        let report = checker.run_all_checks(None).await.unwrap();
        let result = &report.results[0];
        assert!(!result.executed);
        assert_eq!(result.issues[0].issue_type, IssueType::Timeout);
        assert_eq!(report.score, 0);

        let err = checker.run_specific_check("slow", None, None).await.unwrap_err();
        assert!(matches!(err, TenancyError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_specific_check_errors_propagate() {
        let f = fixture(IntegrityConfig::default());
        assert!(matches!(
            f.checker.run_specific_check("ghost", None, None).await,
            Err(TenancyError::CheckNotFound(_))
        ));

        f.checker
            .register_check(IntegrityCheck::new("iso", CheckType::Isolation, CheckPriority::High))
            .unwrap();
        let err = f.checker.run_specific_check("iso", None, Some(&acme())).await.unwrap_err();
        assert!(matches!(err, TenancyError::CheckExecutionError { .. }));

        let ok = f
            .checker
            .run_specific_check("iso", Some(json!({"k": {"tenant_id": "acme"}})), Some(&acme()))
            .await
            .unwrap();
        assert!(ok.success);
    }

    #[tokio::test]
    async fn test_failed_fetch_counts_as_failed_check() {
        let f = fixture(IntegrityConfig::default());
        f.checker
            .register_check(IntegrityCheck::new("consistency", CheckType::Consistency, CheckPriority::High))
            .unwrap();
        let report = f.checker.run_all_checks(Some(&acme())).await.unwrap();
        assert_eq!(report.failed_checks, 1);
        assert_eq!(report.results[0].issues[0].issue_type, IssueType::CheckFailed);
    }

    #[tokio::test]
    async fn test_validation_backed_mapping() {
        let f = fixture(IntegrityConfig::default());
        f.checker
            .register_check(
                IntegrityCheck::new("sessions", CheckType::Business, CheckPriority::High)
                    .with_schema(builtin::SESSION_STATE),
            )
            .unwrap();
        let record = json!({
            "session_id": "8c5f1f9e-4a0b-4d8e-9b55-3f1e2f0c7a11",
            "tenant_id": "globex",
            "status": "active",
            "quota": {"allocated_memory_mb": 10, "max_memory_mb": 5},
        });
        let result = f
            .checker
            .run_specific_check("sessions", Some(json!([record])), Some(&acme()))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result
            .issues
            .iter()
            .all(|i| i.issue_type == IssueType::BusinessRuleViolation && i.severity == IssueSeverity::High));
        assert_eq!(result.issues.len(), 2);
    }

    #[tokio::test]
    async fn test_periodic_lifecycle() {
        let f = fixture(IntegrityConfig::default());
        f.checker.start().unwrap();
        assert!(f.checker.is_running());
        assert!(matches!(f.checker.start(), Err(TenancyError::AlreadyRunning(_))));
        f.checker.shutdown().await;
        assert!(!f.checker.is_running());
        assert!(f.checker.status().last_run.is_none());
    }
}
