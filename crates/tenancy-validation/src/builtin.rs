//! Built-in schemas for the isolation payloads this workspace produces

use crate::schema::{BusinessRule, FormatKind, Remediation, RuleSeverity, ValidationRule, ValidationSchema, ValueType};
use serde_json::json;

pub const SESSION_STATE: &str = "session_state";
pub const CACHE_ENTRY: &str = "cache_entry";
pub const TENANT_CONFIG: &str = "tenant_config";

pub fn schemas() -> Vec<ValidationSchema> {
    vec![session_state(), cache_entry(), tenant_config()]
}

/// Snapshot of a session record
pub fn session_state() -> ValidationSchema {
    ValidationSchema::new(SESSION_STATE, "Session state")
        .with_rule(ValidationRule::required("session_id"))
        .with_rule(ValidationRule::format("session_id", FormatKind::Uuid))
        .with_rule(ValidationRule::required("tenant_id"))
        .with_rule(ValidationRule::typed("tenant_id", ValueType::String))
        .with_rule(ValidationRule::business("tenant_id", BusinessRule::MatchesContextTenant))
        .with_rule(
            ValidationRule::one_of("status", vec![json!("active"), json!("paused"), json!("terminated")])
                .with_remediation(Remediation::Lowercase),
        )
        .with_rule(ValidationRule::format("created_at", FormatKind::Iso8601))
        .with_rule(
            ValidationRule::business("created_at", BusinessRule::NotInFuture).with_severity(RuleSeverity::Warning),
        )
        .with_rule(ValidationRule::range("quota.allocated_memory_mb", Some(0.0), None))
        .with_rule(ValidationRule::business(
            "quota.allocated_memory_mb",
            BusinessRule::NotGreaterThan("quota.max_memory_mb".into()),
        ))
}

/// Tenant-namespaced cache entry
pub fn cache_entry() -> ValidationSchema {
    ValidationSchema::new(CACHE_ENTRY, "Cache entry")
        .with_rule(ValidationRule::required("key"))
        .with_rule(ValidationRule::length("key", Some(1), Some(512)).with_remediation(Remediation::Truncate))
        .with_rule(ValidationRule::required("tenant_id"))
        .with_rule(ValidationRule::business("tenant_id", BusinessRule::MatchesContextTenant))
        .with_rule(ValidationRule::required("value"))
        .with_rule(ValidationRule::typed("ttl_secs", ValueType::Integer).with_remediation(Remediation::Coerce))
        .with_rule(ValidationRule::range("ttl_secs", Some(0.0), Some(86_400.0)).with_remediation(Remediation::Clamp))
        .with_rule(
            ValidationRule::one_of("tier", vec![json!("hot"), json!("warm"), json!("cold")])
                .with_severity(RuleSeverity::Warning)
                .with_remediation(Remediation::SetDefault(json!("warm"))),
        )
}

/// Tenant configuration document
pub fn tenant_config() -> ValidationSchema {
    ValidationSchema::new(TENANT_CONFIG, "Tenant configuration")
        .with_rule(ValidationRule::required("tenant_id"))
        .with_rule(ValidationRule::format(
            "tenant_id",
            FormatKind::Pattern("^[a-z0-9][a-z0-9_-]{0,63}$".into()),
        ))
        .with_rule(
            ValidationRule::one_of("isolation_level", vec![json!("strict"), json!("shared"), json!("readonly")])
                .with_remediation(Remediation::SetDefault(json!("strict"))),
        )
        .with_rule(
            ValidationRule::range("max_sessions", Some(1.0), Some(1000.0)).with_remediation(Remediation::Clamp),
        )
        .with_rule(
            ValidationRule::format("contact_email", FormatKind::Email)
                .with_severity(RuleSeverity::Warning)
                .with_remediation(Remediation::Trim),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ValidationEngine;
    use crate::result::ValidationContext;
    use crate::schema::codes;
    use tenancy_common::config::ValidationConfig;
    use tenancy_common::TenantId;

    #[test]
    fn test_session_state_schema() {
        let engine = ValidationEngine::with_builtin_schemas(ValidationConfig::default()).unwrap();
        let ctx = ValidationContext::for_tenant(&TenantId::from("acme"));
        let ok = json!({
            "session_id": "8c5f1f9e-4a0b-4d8e-9b55-3f1e2f0c7a11",
            "tenant_id": "acme",
            "status": "active",
            "created_at": "2024-05-01T12:00:00Z",
            "quota": {"allocated_memory_mb": 128, "max_memory_mb": 256},
        });
        assert!(engine.validate(&ok, SESSION_STATE, &ctx).unwrap().valid);

        let mut over = ok.clone();
        over["quota"]["allocated_memory_mb"] = json!(512);
        let result = engine.validate(&over, SESSION_STATE, &ctx).unwrap();
        assert_eq!(result.error_codes(), vec![codes::BUSINESS_RULE_VIOLATION]);
    }

    #[test]
    fn test_tenant_config_fixes() {
        let engine = ValidationEngine::with_builtin_schemas(ValidationConfig::default()).unwrap();
        let doc = json!({"tenant_id": "acme", "isolation_level": "open", "max_sessions": 5000});
        let result = engine.validate(&doc, TENANT_CONFIG, &ValidationContext::default()).unwrap();
        assert_eq!(result.errors.len(), 2);

        let fixed = engine.auto_fix(&doc, &result).unwrap();
        assert!(fixed.unfixable.is_empty());
        assert_eq!(fixed.data["isolation_level"], json!("strict"));
        assert_eq!(fixed.data["max_sessions"], json!(1000));
    }
}
