//! Per-rule evaluation

use crate::path;
use crate::result::ValidationContext;
use crate::schema::{BusinessRule, FormatKind, RuleKind, ValidationRule, ValueType};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Named custom check. `Ok(false)` fails the rule; `Err` is reported as a
/// rule execution error.
pub type ValidationHook = Arc<dyn Fn(&Value, &ValidationContext) -> Result<bool, String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuleOutcome {
    Pass,
    Fail(String),
    /// Rule itself could not run
    Error(String),
}

pub(crate) struct RuleInput<'a> {
    pub root: &'a Value,
    pub ctx: &'a ValidationContext,
    /// Compiled regex for format rules
    pub pattern: Option<&'a Regex>,
    pub hook: Option<ValidationHook>,
}

pub(crate) const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$";
pub(crate) const URL_PATTERN: &str = r"^https?://[^\s/$.?#][^\s]*$";

/// Regex source for format kinds that are matched by pattern
pub(crate) fn format_pattern(format: &FormatKind) -> Option<&str> {
    match format {
        FormatKind::Email => Some(EMAIL_PATTERN),
        FormatKind::Url => Some(URL_PATTERN),
        FormatKind::Pattern(p) => Some(p.as_str()),
        FormatKind::Uuid | FormatKind::Iso8601 => None,
    }
}

pub(crate) fn evaluate(rule: &ValidationRule, input: &RuleInput<'_>) -> RuleOutcome {
    let value = path::lookup(input.root, &rule.field);
    let present = value.filter(|v| !v.is_null());

    match &rule.kind {
        RuleKind::Required => match present {
            Some(_) => RuleOutcome::Pass,
            None => RuleOutcome::Fail(format!("{} is required", rule.field)),
        },
        RuleKind::Type { expected } => match value {
            None => RuleOutcome::Pass,
            Some(v) if expected.matches(v) => RuleOutcome::Pass,
            Some(v) => RuleOutcome::Fail(format!(
                "{} must be {:?}, found {:?}",
                rule.field,
                expected,
                ValueType::of(v)
            )),
        },
        _ => match present {
            None => RuleOutcome::Pass,
            Some(v) => evaluate_present(rule, v, input),
        },
    }
}

fn evaluate_present(rule: &ValidationRule, value: &Value, input: &RuleInput<'_>) -> RuleOutcome {
    match &rule.kind {
        RuleKind::Required | RuleKind::Type { .. } => RuleOutcome::Pass,
        RuleKind::Format { format } => check_format(&rule.field, format, value, input.pattern),
        RuleKind::Enum { values } => {
            if values.contains(value) {
                RuleOutcome::Pass
            } else {
                RuleOutcome::Fail(format!("{} must be one of {:?}", rule.field, values))
            }
        }
        RuleKind::Range { min, max } => {
            let Some(n) = value.as_f64() else {
                return RuleOutcome::Fail(format!("{} is not numeric", rule.field));
            };
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                RuleOutcome::Fail(format!("{} = {n} outside [{min:?}, {max:?}]", rule.field))
            } else {
                RuleOutcome::Pass
            }
        }
        RuleKind::Length { min, max } => {
            let len = match value {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                _ => return RuleOutcome::Fail(format!("{} has no length", rule.field)),
            };
            if min.is_some_and(|m| len < m) || max.is_some_and(|m| len > m) {
                RuleOutcome::Fail(format!("{} length {len} outside [{min:?}, {max:?}]", rule.field))
            } else {
                RuleOutcome::Pass
            }
        }
        RuleKind::Custom { hook } => match &input.hook {
            None => RuleOutcome::Error(format!("hook '{hook}' is not registered")),
            Some(f) => match f(value, input.ctx) {
                Ok(true) => RuleOutcome::Pass,
                Ok(false) => RuleOutcome::Fail(format!("{} failed '{hook}'", rule.field)),
                Err(e) => RuleOutcome::Error(format!("hook '{hook}' failed: {e}")),
            },
        },
        RuleKind::Reference { collection } => match input.ctx.references.get(collection) {
            None => RuleOutcome::Error(format!("reference collection '{collection}' not supplied")),
            Some(ids) if ids.contains(value) => RuleOutcome::Pass,
            Some(_) => RuleOutcome::Fail(format!("{} not found in '{collection}'", rule.field)),
        },
        RuleKind::Business { rule: business } => check_business(&rule.field, business, value, input),
    }
}

fn check_format(field: &str, format: &FormatKind, value: &Value, pattern: Option<&Regex>) -> RuleOutcome {
    let Some(s) = value.as_str() else {
        return RuleOutcome::Fail(format!("{field} must be a string"));
    };
    let ok = match format {
        FormatKind::Uuid => uuid::Uuid::parse_str(s).is_ok(),
        FormatKind::Iso8601 => DateTime::parse_from_rfc3339(s).is_ok(),
        FormatKind::Email | FormatKind::Url | FormatKind::Pattern(_) => match pattern {
            Some(re) => re.is_match(s),
            None => return RuleOutcome::Error(format!("no compiled pattern for {field}")),
        },
    };
    if ok {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Fail(format!("{field} is not a valid {format:?}"))
    }
}

fn check_business(field: &str, rule: &BusinessRule, value: &Value, input: &RuleInput<'_>) -> RuleOutcome {
    match rule {
        BusinessRule::MatchesContextTenant => match &input.ctx.tenant_id {
            None => RuleOutcome::Pass,
            Some(tenant) if value.as_str() == Some(tenant.as_str()) => RuleOutcome::Pass,
            Some(tenant) => RuleOutcome::Fail(format!("{field} does not belong to tenant {tenant}")),
        },
        BusinessRule::NotInFuture => {
            let parsed = value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            match parsed {
                None => RuleOutcome::Fail(format!("{field} is not a timestamp")),
                Some(ts) if ts.with_timezone(&Utc) <= Utc::now() => RuleOutcome::Pass,
                Some(_) => RuleOutcome::Fail(format!("{field} is in the future")),
            }
        }
        BusinessRule::NotGreaterThan(other) => {
            let Some(limit) = path::lookup(input.root, other).and_then(Value::as_f64) else {
                return RuleOutcome::Error(format!("{other} is missing or not numeric"));
            };
            match value.as_f64() {
                Some(n) if n <= limit => RuleOutcome::Pass,
                Some(n) => RuleOutcome::Fail(format!("{field} = {n} exceeds {other} = {limit}")),
                None => RuleOutcome::Fail(format!("{field} is not numeric")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(rule: &ValidationRule, root: &Value) -> RuleOutcome {
        let ctx = ValidationContext::default();
        let compiled = match &rule.kind {
            RuleKind::Format { format } => format_pattern(format).map(|p| Regex::new(p).unwrap()),
            _ => None,
        };
        evaluate(
            rule,
            &RuleInput {
                root,
                ctx: &ctx,
                pattern: compiled.as_ref(),
                hook: None,
            },
        )
    }

    #[test]
    fn test_missing_field_only_fails_required() {
        let doc = json!({});
        assert!(matches!(run(&ValidationRule::required("id"), &doc), RuleOutcome::Fail(_)));
        assert_eq!(run(&ValidationRule::range("n", Some(1.0), None), &doc), RuleOutcome::Pass);
        assert_eq!(run(&ValidationRule::format("e", FormatKind::Email), &doc), RuleOutcome::Pass);
    }

    #[test]
    fn test_formats() {
        let doc = json!({
            "email": "ops@acme.io",
            "id": "8c5f1f9e-4a0b-4d8e-9b55-3f1e2f0c7a11",
            "at": "2024-01-01T00:00:00Z",
            "url": "not a url",
        });
        assert_eq!(run(&ValidationRule::format("email", FormatKind::Email), &doc), RuleOutcome::Pass);
        assert_eq!(run(&ValidationRule::format("id", FormatKind::Uuid), &doc), RuleOutcome::Pass);
        assert_eq!(run(&ValidationRule::format("at", FormatKind::Iso8601), &doc), RuleOutcome::Pass);
        assert!(matches!(run(&ValidationRule::format("url", FormatKind::Url), &doc), RuleOutcome::Fail(_)));
    }

    #[test]
    fn test_range_and_length() {
        let doc = json!({"n": 12, "s": "abcdef", "list": [1, 2]});
        assert!(matches!(run(&ValidationRule::range("n", None, Some(10.0)), &doc), RuleOutcome::Fail(_)));
        assert!(matches!(run(&ValidationRule::length("s", None, Some(3)), &doc), RuleOutcome::Fail(_)));
        assert_eq!(run(&ValidationRule::length("list", Some(1), Some(2)), &doc), RuleOutcome::Pass);
    }

    #[test]
    fn test_missing_hook_is_execution_error() {
        let doc = json!({"x": 1});
        assert!(matches!(run(&ValidationRule::custom("x", "nope"), &doc), RuleOutcome::Error(_)));
    }

    #[test]
    fn test_not_greater_than() {
        let rule = ValidationRule::business("used", BusinessRule::NotGreaterThan("max".into()));
        assert_eq!(run(&rule, &json!({"used": 3, "max": 4})), RuleOutcome::Pass);
        assert!(matches!(run(&rule, &json!({"used": 5, "max": 4})), RuleOutcome::Fail(_)));
        assert!(matches!(run(&rule, &json!({"used": 5})), RuleOutcome::Error(_)));
    }
}
