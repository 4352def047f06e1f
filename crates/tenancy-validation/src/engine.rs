//! Validation Engine

use crate::builtin;
use crate::result::{AutoFixOutcome, ValidationContext, ValidationIssue, ValidationMetrics, ValidationResult};
use crate::rules::{self, RuleInput, RuleOutcome, ValidationHook};
use crate::schema::{codes, Remediation, RuleKind, RuleSeverity, ValidationRule, ValidationSchema, ValueType};
use crate::path;
use chrono::Utc;
use dashmap::DashMap;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tenancy_common::config::ValidationConfig;
use tenancy_common::digest::fingerprint_all;
use tenancy_common::{run_windowed, TenancyError, TenancyResult};

/// (schema id, schema generation, content fingerprint)
type CacheKey = (String, u64, String);

struct RegisteredSchema {
    schema: ValidationSchema,
    /// Bumped on every registration so replaced schemas miss the cache
    generation: u64,
    patterns: HashMap<String, Regex>,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    evaluated: AtomicU64,
    evaluated_us: AtomicU64,
}

/// One unit of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub data: Value,
    pub schema_id: String,
    pub context: ValidationContext,
}

impl BatchItem {
    pub fn new(data: Value, schema_id: impl Into<String>) -> Self {
        Self {
            data,
            schema_id: schema_id.into(),
            context: ValidationContext::default(),
        }
    }

    pub fn with_context(mut self, context: ValidationContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub parallel: bool,
    pub stop_on_first_failure: bool,
    /// Window size; engine default when `None`
    pub max_concurrency: Option<usize>,
}

#[derive(Debug)]
pub struct BatchReport {
    /// Input order; only units that ran
    pub results: Vec<TenancyResult<ValidationResult>>,
    pub total_items: usize,
    pub valid: usize,
    pub invalid: usize,
    pub stopped_early: bool,
}

fn is_failure(result: &TenancyResult<ValidationResult>) -> bool {
    result.as_ref().map(|r| !r.valid).unwrap_or(true)
}

/// Schema-driven validation with a fingerprint-keyed result cache
pub struct ValidationEngine {
    schemas: DashMap<String, Arc<RegisteredSchema>>,
    hooks: DashMap<String, ValidationHook>,
    cache: Cache<CacheKey, ValidationResult>,
    generation: AtomicU64,
    counters: Counters,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(config: ValidationConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_max_entries)
            .time_to_live(config.cache_ttl())
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            schemas: DashMap::new(),
            hooks: DashMap::new(),
            cache,
            generation: AtomicU64::new(0),
            counters: Counters::default(),
            config,
        }
    }

    /// Engine preloaded with `session_state`, `cache_entry` and `tenant_config`
    pub fn with_builtin_schemas(config: ValidationConfig) -> TenancyResult<Self> {
        let engine = Self::new(config);
        for schema in builtin::schemas() {
            engine.register_schema(schema)?;
        }
        Ok(engine)
    }

    /// Register or replace a schema. Pattern rules are compiled here, so a
    /// bad regex is rejected up front.
    pub fn register_schema(&self, schema: ValidationSchema) -> TenancyResult<()> {
        let mut patterns = HashMap::new();
        for rule in &schema.rules {
            if let RuleKind::Format { format } = &rule.kind {
                if let Some(source) = rules::format_pattern(format) {
                    let re = Regex::new(source).map_err(|e| {
                        TenancyError::InvalidInput(format!("rule {}: {e}", rule.id))
                    })?;
                    patterns.insert(rule.id.clone(), re);
                }
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let id = schema.id.clone();
        let replaced = self
            .schemas
            .insert(
                id.clone(),
                Arc::new(RegisteredSchema {
                    schema,
                    generation,
                    patterns,
                }),
            )
            .is_some();

        tracing::info!(schema = %id, replaced, "validation schema registered");
        Ok(())
    }

    pub fn get_schema(&self, id: &str) -> Option<ValidationSchema> {
        self.schemas.get(id).map(|s| s.schema.clone())
    }

    pub fn list_schemas(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.schemas.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn remove_schema(&self, id: &str) -> bool {
        self.schemas.remove(id).is_some()
    }

    /// Register a named hook for `custom` rules
    pub fn register_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Value, &ValidationContext) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    pub fn validate(&self, data: &Value, schema_id: &str, ctx: &ValidationContext) -> TenancyResult<ValidationResult> {
        let registered = self
            .schemas
            .get(schema_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TenancyError::SchemaNotFound(schema_id.to_string()))?;

        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let key = (registered.schema.cache_enabled && !ctx.skip_cache).then(|| {
            let ctx_value = serde_json::to_value(ctx).unwrap_or(Value::Null);
            (
                schema_id.to_string(),
                registered.generation,
                fingerprint_all([data, &ctx_value]),
            )
        });

        if let Some(key) = &key {
            if let Some(mut cached) = self.cache.get(key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                cached.cache_hit = true;
                return Ok(cached);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        let started = Instant::now();
        let mut result = self.evaluate(&registered, data, ctx);
        result.duration_us = started.elapsed().as_micros() as u64;

        self.counters.evaluated.fetch_add(1, Ordering::Relaxed);
        self.counters.evaluated_us.fetch_add(result.duration_us, Ordering::Relaxed);
        if !result.valid {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(schema = %schema_id, errors = result.errors.len(), "validation failed");
        }

        if let Some(key) = key {
            self.cache.insert(key, result.clone());
        }
        Ok(result)
    }

    fn evaluate(&self, registered: &RegisteredSchema, data: &Value, ctx: &ValidationContext) -> ValidationResult {
        let schema = &registered.schema;
        let mut result = ValidationResult {
            schema_id: schema.id.clone(),
            schema_version: schema.version,
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
            rules_evaluated: 0,
            duration_us: 0,
            cache_hit: false,
            validated_at: Utc::now(),
        };

        for rule in schema.rules.iter().filter(|r| r.active) {
            let hook = match &rule.kind {
                RuleKind::Custom { hook } => self.hooks.get(hook).map(|h| Arc::clone(h.value())),
                _ => None,
            };
            let input = RuleInput {
                root: data,
                ctx,
                pattern: registered.patterns.get(&rule.id),
                hook,
            };
            result.rules_evaluated += 1;

            let issue = match rules::evaluate(rule, &input) {
                RuleOutcome::Pass => continue,
                RuleOutcome::Fail(detail) => issue_for(rule, rule.kind.failure_code(), detail, rule.severity),
                RuleOutcome::Error(detail) => {
                    tracing::warn!(schema = %schema.id, rule = %rule.id, error = %detail, "rule execution failed");
                    issue_for(rule, codes::RULE_EXECUTION_ERROR, detail, RuleSeverity::Error)
                }
            };

            match issue.severity {
                RuleSeverity::Error => result.errors.push(issue),
                RuleSeverity::Warning => result.warnings.push(issue),
                RuleSeverity::Info => result.info.push(issue),
            }
            if ctx.stop_on_first_error && !result.errors.is_empty() {
                break;
            }
        }

        result.valid = result.errors.is_empty();
        result
    }

    /// Validate many payloads in windows of `max_concurrency`
    pub async fn batch_validate(self: &Arc<Self>, items: Vec<BatchItem>, options: BatchOptions) -> BatchReport {
        let total_items = items.len();
        let window = options
            .max_concurrency
            .unwrap_or(self.config.default_max_concurrency)
            .max(1);

        let results: Vec<TenancyResult<ValidationResult>> = if options.parallel {
            let engine = Arc::clone(self);
            let stop = options.stop_on_first_failure;
            run_windowed(
                items,
                window,
                move |item: BatchItem| {
                    let engine = Arc::clone(&engine);
                    async move { engine.validate(&item.data, &item.schema_id, &item.context) }
                },
                move |r| stop && is_failure(r),
            )
            .await
            .into_iter()
            .map(|joined| {
                // the pool already logged the panic
                joined.unwrap_or(Err(TenancyError::ValidationFailure { errors: 1, warnings: 0 }))
            })
            .collect()
        } else {
            let mut out = Vec::with_capacity(total_items);
            for item in items {
                let result = self.validate(&item.data, &item.schema_id, &item.context);
                let failed = is_failure(&result);
                out.push(result);
                if failed && options.stop_on_first_failure {
                    break;
                }
            }
            out
        };

        let valid = results.iter().filter(|r| !is_failure(r)).count();
        let report = BatchReport {
            total_items,
            valid,
            invalid: results.len() - valid,
            stopped_early: results.len() < total_items,
            results,
        };
        tracing::debug!(
            total = report.total_items,
            valid = report.valid,
            invalid = report.invalid,
            stopped_early = report.stopped_early,
            "batch validation complete"
        );
        report
    }

    /// Apply remediations for fixable errors and warnings in `result`
    pub fn auto_fix(&self, data: &Value, result: &ValidationResult) -> TenancyResult<AutoFixOutcome> {
        let registered = self
            .schemas
            .get(&result.schema_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TenancyError::SchemaNotFound(result.schema_id.clone()))?;

        let mut fixed_data = data.clone();
        let mut fixed = Vec::new();
        let mut unfixable = Vec::new();

        for issue in result.errors.iter().chain(result.warnings.iter()) {
            let remediation = registered
                .schema
                .rule(&issue.rule_id)
                .and_then(|rule| rule.remediation.as_ref().map(|r| (rule, r)));

            let applied = match remediation {
                Some((rule, remediation))
                    if issue.auto_fixable && codes::FIXABLE.contains(&issue.code.as_str()) =>
                {
                    apply_remediation(&mut fixed_data, rule, remediation)
                }
                _ => false,
            };

            if applied {
                fixed.push(issue.clone());
            } else {
                unfixable.push(issue.clone());
            }
        }

        tracing::debug!(
            schema = %result.schema_id,
            fixed = fixed.len(),
            unfixable = unfixable.len(),
            "auto-fix applied"
        );
        Ok(AutoFixOutcome {
            data: fixed_data,
            fixed,
            unfixable,
        })
    }

    pub fn metrics(&self) -> ValidationMetrics {
        let evaluated = self.counters.evaluated.load(Ordering::Relaxed);
        let evaluated_us = self.counters.evaluated_us.load(Ordering::Relaxed);
        ValidationMetrics {
            total_validations: self.counters.total.load(Ordering::Relaxed),
            cache_hits: self.counters.hits.load(Ordering::Relaxed),
            cache_misses: self.counters.misses.load(Ordering::Relaxed),
            failed_validations: self.counters.failures.load(Ordering::Relaxed),
            average_duration_us: if evaluated == 0 {
                0.0
            } else {
                evaluated_us as f64 / evaluated as f64
            },
            cached_results: self.cache.entry_count(),
            registered_schemas: self.schemas.len(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

fn issue_for(rule: &ValidationRule, code: &str, detail: String, severity: RuleSeverity) -> ValidationIssue {
    ValidationIssue {
        rule_id: rule.id.clone(),
        field: rule.field.clone(),
        code: code.to_string(),
        message: rule.message.clone().unwrap_or(detail),
        severity,
        auto_fixable: code != codes::RULE_EXECUTION_ERROR && rule.remediation.is_some(),
    }
}

fn apply_remediation(doc: &mut Value, rule: &ValidationRule, remediation: &Remediation) -> bool {
    match remediation {
        Remediation::SetDefault(value) => path::assign(doc, &rule.field, value.clone()),
        Remediation::Remove => path::remove(doc, &rule.field).is_some(),
        Remediation::Trim | Remediation::Lowercase => match path::lookup_mut(doc, &rule.field) {
            Some(Value::String(s)) => {
                *s = if matches!(remediation, Remediation::Trim) {
                    s.trim().to_string()
                } else {
                    s.to_lowercase()
                };
                true
            }
            _ => false,
        },
        Remediation::Clamp => {
            let RuleKind::Range { min, max } = &rule.kind else {
                return false;
            };
            let Some(target) = path::lookup_mut(doc, &rule.field) else {
                return false;
            };
            let Some(n) = target.as_f64() else {
                return false;
            };
            let clamped = n.max(min.unwrap_or(f64::MIN)).min(max.unwrap_or(f64::MAX));
            *target = if clamped.fract() == 0.0 && (target.is_i64() || target.is_u64()) {
                Value::from(clamped as i64)
            } else {
                Value::from(clamped)
            };
            true
        }
        Remediation::Truncate => {
            let RuleKind::Length { max: Some(max), .. } = &rule.kind else {
                return false;
            };
            match path::lookup_mut(doc, &rule.field) {
                Some(Value::String(s)) => {
                    *s = s.chars().take(*max).collect();
                    true
                }
                Some(Value::Array(items)) => {
                    items.truncate(*max);
                    true
                }
                _ => false,
            }
        }
        Remediation::Coerce => {
            let RuleKind::Type { expected } = &rule.kind else {
                return false;
            };
            let Some(target) = path::lookup_mut(doc, &rule.field) else {
                return false;
            };
            match coerce(target, *expected) {
                Some(value) => {
                    *target = value;
                    true
                }
                None => false,
            }
        }
    }
}

fn coerce(value: &Value, expected: ValueType) -> Option<Value> {
    match (expected, value) {
        (ValueType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ValueType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ValueType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ValueType::Integer, Value::Number(n)) => n.as_f64().filter(|f| f.fract() == 0.0).map(|f| Value::from(f as i64)),
        (ValueType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
        (ValueType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FormatKind, ValidationRule};
    use serde_json::json;
    use tenancy_common::TenantId;

    fn engine() -> Arc<ValidationEngine> {
        Arc::new(ValidationEngine::new(ValidationConfig::default()))
    }

    fn user_schema() -> ValidationSchema {
        ValidationSchema::new("user", "User")
            .with_rule(ValidationRule::required("email"))
            .with_rule(ValidationRule::format("email", FormatKind::Email).with_remediation(Remediation::Trim))
            .with_rule(
                ValidationRule::range("age", Some(0.0), Some(150.0)).with_remediation(Remediation::Clamp),
            )
            .with_rule(
                ValidationRule::one_of("role", vec![json!("admin"), json!("viewer")])
                    .with_severity(RuleSeverity::Warning)
                    .with_remediation(Remediation::SetDefault(json!("viewer"))),
            )
    }

    #[test]
    fn test_unknown_schema() {
        let result = engine().validate(&json!({}), "missing", &ValidationContext::default());
        assert_eq!(result, Err(TenancyError::SchemaNotFound("missing".into())));
    }

    #[test]
    fn test_second_call_hits_cache_with_same_issues() {
        let engine = engine();
        engine.register_schema(user_schema()).unwrap();
        let data = json!({"email": "nope", "age": 200});
        let ctx = ValidationContext::default();

        let first = engine.validate(&data, "user", &ctx).unwrap();
        let second = engine.validate(&data, "user", &ctx).unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.warnings, second.warnings);

        let metrics = engine.metrics();
        assert_eq!(metrics.total_validations, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
    }

    #[test]
    fn test_reregistering_schema_invalidates_cached_results() {
        let engine = engine();
        engine.register_schema(user_schema()).unwrap();
        let data = json!({"email": "ops@acme.io"});
        engine.validate(&data, "user", &ValidationContext::default()).unwrap();

        engine
            .register_schema(user_schema().with_rule(ValidationRule::required("age")))
            .unwrap();
        let result = engine.validate(&data, "user", &ValidationContext::default()).unwrap();
        assert!(!result.cache_hit);
        assert!(result.has_error(codes::REQUIRED));
    }

    #[test]
    fn test_cached_result_expires_after_ttl() {
        let engine = ValidationEngine::new(ValidationConfig {
            cache_ttl_secs: 1,
            ..Default::default()
        });
        engine.register_schema(user_schema()).unwrap();
        let data = json!({"email": "ops@acme.io"});
        let ctx = ValidationContext::default();

        engine.validate(&data, "user", &ctx).unwrap();
        assert!(engine.validate(&data, "user", &ctx).unwrap().cache_hit);

        std::thread::sleep(std::time::Duration::from_millis(1_200));
        assert!(!engine.validate(&data, "user", &ctx).unwrap().cache_hit);
    }

    #[test]
    fn test_cache_trimmed_to_max_entries() {
        let engine = ValidationEngine::new(ValidationConfig {
            cache_max_entries: 3,
            ..Default::default()
        });
        engine.register_schema(user_schema()).unwrap();
        for n in 0..20 {
            let data = json!({"email": format!("user{n}@acme.io")});
            engine.validate(&data, "user", &ValidationContext::default()).unwrap();
        }

        engine.cache.run_pending_tasks();
        assert!(engine.metrics().cached_results <= 3);
    }

    #[test]
    fn test_uncached_schema_never_hits() {
        let engine = engine();
        engine.register_schema(user_schema().without_cache()).unwrap();
        let data = json!({"email": "ops@acme.io"});
        engine.validate(&data, "user", &ValidationContext::default()).unwrap();
        let again = engine.validate(&data, "user", &ValidationContext::default()).unwrap();
        assert!(!again.cache_hit);
    }

    #[test]
    fn test_stop_on_first_error() {
        let engine = engine();
        engine.register_schema(user_schema()).unwrap();
        let data = json!({"age": -1});
        let all = engine.validate(&data, "user", &ValidationContext::default()).unwrap();
        assert_eq!(all.error_codes(), vec![codes::REQUIRED, codes::OUT_OF_RANGE]);

        let first = engine
            .validate(&data, "user", &ValidationContext::default().stop_on_first_error())
            .unwrap();
        assert_eq!(first.error_codes(), vec![codes::REQUIRED]);
    }

    #[test]
    fn test_hook_errors_become_issues() {
        let engine = engine();
        engine.register_hook("even", |v, _| match v.as_i64() {
            Some(n) => Ok(n % 2 == 0),
            None => Err("not an integer".to_string()),
        });
        engine
            .register_schema(ValidationSchema::new("nums", "Numbers").with_rule(ValidationRule::custom("n", "even")))
            .unwrap();

        let ctx = ValidationContext::default();
        assert!(engine.validate(&json!({"n": 4}), "nums", &ctx).unwrap().valid);
        assert!(engine.validate(&json!({"n": 3}), "nums", &ctx).unwrap().has_error(codes::CUSTOM_FAILED));
        assert!(engine
            .validate(&json!({"n": "x"}), "nums", &ctx)
            .unwrap()
            .has_error(codes::RULE_EXECUTION_ERROR));
    }

    #[test]
    fn test_bad_pattern_rejected_at_registration() {
        let schema = ValidationSchema::new("bad", "Bad")
            .with_rule(ValidationRule::format("x", FormatKind::Pattern("(".into())));
        assert!(matches!(engine().register_schema(schema), Err(TenancyError::InvalidInput(_))));
    }

    #[test]
    fn test_auto_fix() {
        let engine = engine();
        engine
            .register_schema(user_schema().with_rule(ValidationRule::custom("email", "unregistered")))
            .unwrap();
        let data = json!({"email": "  ops@acme.io ", "age": 200, "role": "root"});
        let result = engine.validate(&data, "user", &ValidationContext::default()).unwrap();

        let outcome = engine.auto_fix(&data, &result).unwrap();
        assert_eq!(outcome.data, json!({"email": "ops@acme.io", "age": 150, "role": "viewer"}));
        assert_eq!(outcome.fixed.len(), 3);
        assert_eq!(outcome.unfixable.len(), 1);
        assert_eq!(outcome.unfixable[0].code, codes::RULE_EXECUTION_ERROR);

        let recheck = engine
            .validate(&outcome.data, "user", &ValidationContext::default().skip_cache())
            .unwrap();
        assert_eq!(recheck.error_codes(), vec![codes::RULE_EXECUTION_ERROR]);
    }

    #[test]
    fn test_context_is_part_of_cache_key() {
        let engine = ValidationEngine::with_builtin_schemas(ValidationConfig::default()).unwrap();
        let entry = json!({"key": "k", "tenant_id": "acme", "value": 1});
        let acme = ValidationContext::for_tenant(&TenantId::from("acme"));
        let globex = ValidationContext::for_tenant(&TenantId::from("globex"));

        assert!(engine.validate(&entry, "cache_entry", &acme).unwrap().valid);
        let other = engine.validate(&entry, "cache_entry", &globex).unwrap();
        assert!(!other.cache_hit);
        assert!(other.has_error(codes::BUSINESS_RULE_VIOLATION));
    }

    #[tokio::test]
    async fn test_sequential_batch_stops_at_first_failure() {
        let engine = engine();
        engine.register_schema(user_schema()).unwrap();
        let items = vec![
            BatchItem::new(json!({"email": "a@b.io"}), "user"),
            BatchItem::new(json!({}), "user"),
            BatchItem::new(json!({"email": "c@d.io"}), "user"),
        ];
        let report = engine
            .batch_validate(
                items,
                BatchOptions {
                    stop_on_first_failure: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(report.results.len(), 2);
        assert!(report.stopped_early);
        assert_eq!((report.valid, report.invalid), (1, 1));
    }

    #[tokio::test]
    async fn test_parallel_batch_isolates_unit_failures() {
        let engine = engine();
        engine.register_schema(user_schema()).unwrap();
        let items = (0..10)
            .map(|i| {
                let schema = if i == 3 { "missing" } else { "user" };
                BatchItem::new(json!({"email": format!("u{i}@acme.io")}), schema)
            })
            .collect();
        let report = engine
            .batch_validate(
                items,
                BatchOptions {
                    parallel: true,
                    max_concurrency: Some(4),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(report.results.len(), 10);
        assert_eq!(report.invalid, 1);
        assert!(matches!(report.results[3], Err(TenancyError::SchemaNotFound(_))));
        assert!(!report.stopped_early);
    }

    #[tokio::test]
    async fn test_parallel_batch_stops_after_failing_window() {
        let engine = engine();
        engine.register_schema(user_schema()).unwrap();
        let items = (0..9)
            .map(|i| {
                let data = if i == 1 { json!({}) } else { json!({"email": "a@b.io"}) };
                BatchItem::new(data, "user")
            })
            .collect();
        let report = engine
            .batch_validate(
                items,
                BatchOptions {
                    parallel: true,
                    stop_on_first_failure: true,
                    max_concurrency: Some(3),
                },
            )
            .await;
        assert_eq!(report.results.len(), 3);
        assert!(report.stopped_early);
    }
}
