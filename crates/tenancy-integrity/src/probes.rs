//! Isolation, consistency and validation-backed probes

use crate::model::{CheckType, IntegrityCheck, IntegrityIssue, IntegrityResult, IssueType, Resolution};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tenancy_common::{IssueSeverity, TenancyError, TenancyResult, TenantId};
use tenancy_validation::{codes, RuleSeverity, ValidationContext, ValidationEngine};

pub(crate) fn as_object<'a>(data: &'a Value, what: &str) -> TenancyResult<&'a Map<String, Value>> {
    data.as_object()
        .ok_or_else(|| TenancyError::InvalidInput(format!("{what} payload must be a JSON object")))
}

fn embedded_tenant(entry: &Value) -> Option<&str> {
    entry.get("tenant_id").and_then(Value::as_str)
}

/// Issues for every entry of `data` not owned by `target`
pub(crate) fn isolation_issues(data: &Map<String, Value>, target: &TenantId) -> Vec<IntegrityIssue> {
    data.iter()
        .filter_map(|(key, entry)| match embedded_tenant(entry) {
            None => Some(
                IntegrityIssue::new(
                    IssueType::MissingTenantId,
                    IssueSeverity::High,
                    format!("entry {key} carries no tenant id"),
                )
                .for_key(key.clone())
                .for_tenant(target)
                .resolvable(Resolution::External),
            ),
            Some(owner) if owner != target.as_str() => Some(
                IntegrityIssue::new(
                    IssueType::IsolationBreach,
                    IssueSeverity::Critical,
                    format!("entry {key} owned by {owner} found in namespace of {target}"),
                )
                .for_key(key.clone())
                .for_tenant(target),
            ),
            Some(_) => None,
        })
        .collect()
}

pub(crate) fn client_isolation(check_id: &str, data: &Value, target: &TenantId) -> TenancyResult<IntegrityResult> {
    let entries = as_object(data, "isolation")?;
    Ok(IntegrityResult::completed(
        check_id,
        CheckType::Isolation,
        Some(target),
        isolation_issues(entries, target),
        entries.len(),
    ))
}

/// `{tenant: {key: entry}}`, each namespace checked against its own tenant
pub(crate) fn namespace_isolation(check_id: &str, data: &Value) -> TenancyResult<IntegrityResult> {
    let namespaces = as_object(data, "isolation")?;
    let mut issues = Vec::new();
    let mut items = 0;
    for (tenant, entries) in namespaces {
        let entries = as_object(entries, "namespace")?;
        items += entries.len();
        issues.extend(isolation_issues(entries, &TenantId::from(tenant.as_str())));
    }
    Ok(IntegrityResult::completed(check_id, CheckType::Isolation, None, issues, items))
}

fn timestamp(layer: &Value) -> Option<DateTime<Utc>> {
    layer
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Compare state, cache and optional sync layers of one record
pub(crate) fn state_consistency(
    check_id: &str,
    state: &Value,
    cache: &Value,
    sync: Option<&Value>,
    tenant: &TenantId,
    tolerance_secs: i64,
) -> IntegrityResult {
    let mut issues = Vec::new();
    let mut layers = vec![("state", state), ("cache", cache)];
    if let Some(sync) = sync {
        layers.push(("sync", sync));
    }

    for (name, layer) in &layers {
        if let Some(owner) = embedded_tenant(layer) {
            if owner != tenant.as_str() {
                issues.push(
                    IntegrityIssue::new(
                        IssueType::IsolationBreach,
                        IssueSeverity::Critical,
                        format!("{name} layer belongs to {owner}, expected {tenant}"),
                    )
                    .for_key(*name)
                    .for_tenant(tenant),
                );
            }
        }
    }

    if let (Some(a), Some(b)) = (state.get("id"), cache.get("id")) {
        if a != b {
            issues.push(
                IntegrityIssue::new(IssueType::IdMismatch, IssueSeverity::High, format!("state id {a} != cache id {b}"))
                    .for_key("id")
                    .for_tenant(tenant)
                    .resolvable(Resolution::External),
            );
        }
    }

    if let (Some(a), Some(b)) = (timestamp(state), timestamp(cache)) {
        let skew = (a - b).num_seconds().abs();
        if skew > tolerance_secs {
            issues.push(
                IntegrityIssue::new(
                    IssueType::TimestampSkew,
                    IssueSeverity::Medium,
                    format!("state and cache differ by {skew}s (tolerance {tolerance_secs}s)"),
                )
                .for_key("updated_at")
                .for_tenant(tenant)
                .resolvable(Resolution::External),
            );
        }
    }

    if let Some(expected) = state.get("version") {
        for (name, layer) in layers.iter().skip(1) {
            if let Some(found) = layer.get("version") {
                if found != expected {
                    issues.push(
                        IntegrityIssue::new(
                            IssueType::VersionMismatch,
                            IssueSeverity::High,
                            format!("{name} version {found} != state version {expected}"),
                        )
                        .for_key(format!("{name}.version"))
                        .for_tenant(tenant),
                    );
                }
            }
        }
    }

    IntegrityResult::completed(check_id, CheckType::Consistency, Some(tenant), issues, layers.len())
}

/// Validate the payload's records against the check's schema
pub(crate) fn validation_backed(
    engine: &ValidationEngine,
    check: &IntegrityCheck,
    data: &Value,
    tenant: Option<&TenantId>,
) -> TenancyResult<IntegrityResult> {
    let schema_id = check
        .schema_id
        .as_deref()
        .ok_or_else(|| TenancyError::InvalidInput(format!("check {} has no schema", check.id)))?;

    let (records, references): (Vec<&Value>, HashMap<String, Vec<Value>>) = match data {
        Value::Array(items) => (items.iter().collect(), HashMap::new()),
        Value::Object(map) if map.contains_key("records") => {
            let records = map
                .get("records")
                .and_then(Value::as_array)
                .map(|items| items.iter().collect())
                .unwrap_or_default();
            let references = map
                .get("references")
                .and_then(Value::as_object)
                .map(|refs| {
                    refs.iter()
                        .map(|(name, ids)| (name.clone(), ids.as_array().cloned().unwrap_or_default()))
                        .collect()
                })
                .unwrap_or_default();
            (records, references)
        }
        other => (vec![other], HashMap::new()),
    };

    let ctx = ValidationContext {
        tenant_id: tenant.cloned(),
        references,
        ..Default::default()
    };

    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let result = engine.validate(record, schema_id, &ctx)?;
        let label = record
            .get("id")
            .map(|id| id.to_string().trim_matches('"').to_string())
            .unwrap_or_else(|| index.to_string());

        for failed in result.errors.iter().chain(result.warnings.iter()) {
            let issue_type = match failed.code.as_str() {
                codes::REFERENCE_NOT_FOUND => IssueType::BrokenReference,
                codes::BUSINESS_RULE_VIOLATION => IssueType::BusinessRuleViolation,
                _ => IssueType::ConstraintViolation,
            };
            let severity = match failed.severity {
                RuleSeverity::Error => IssueSeverity::High,
                RuleSeverity::Warning => IssueSeverity::Medium,
                RuleSeverity::Info => IssueSeverity::Low,
            };
            let mut issue = IntegrityIssue::new(issue_type, severity, failed.message.clone())
                .for_key(format!("{label}.{}", failed.field));
            if let Some(t) = tenant {
                issue = issue.for_tenant(t);
            }
            if failed.auto_fixable {
                issue = issue.resolvable(Resolution::External);
            }
            issues.push(issue);
        }
    }

    Ok(IntegrityResult::completed(
        &check.id,
        check.check_type,
        tenant,
        issues,
        records.len(),
    ))
}
