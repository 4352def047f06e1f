//! Schemas and Rules

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named, versioned rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSchema {
    pub id: String,
    pub name: String,
    pub version: u32,
    /// Evaluated in order
    pub rules: Vec<ValidationRule>,
    /// Cache results keyed by content fingerprint
    pub cache_enabled: bool,
}

impl ValidationSchema {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            rules: Vec::new(),
            cache_enabled: true,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn rule(&self, rule_id: &str) -> Option<&ValidationRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }
}

/// One check against one field path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    /// Dot-separated path; numeric segments index arrays
    pub field: String,
    pub kind: RuleKind,
    pub severity: RuleSeverity,
    pub message: Option<String>,
    pub active: bool,
    /// Fix applied by `auto_fix` when this rule fails
    pub remediation: Option<Remediation>,
}

impl ValidationRule {
    pub fn new(id: impl Into<String>, field: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            kind,
            severity: RuleSeverity::Error,
            message: None,
            active: true,
            remediation: None,
        }
    }

    pub fn required(field: &str) -> Self {
        Self::new(format!("{field}.required"), field, RuleKind::Required)
    }

    pub fn typed(field: &str, expected: ValueType) -> Self {
        Self::new(format!("{field}.type"), field, RuleKind::Type { expected })
    }

    pub fn format(field: &str, format: FormatKind) -> Self {
        Self::new(format!("{field}.format"), field, RuleKind::Format { format })
    }

    pub fn one_of(field: &str, values: Vec<Value>) -> Self {
        Self::new(format!("{field}.enum"), field, RuleKind::Enum { values })
    }

    pub fn range(field: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(format!("{field}.range"), field, RuleKind::Range { min, max })
    }

    pub fn length(field: &str, min: Option<usize>, max: Option<usize>) -> Self {
        Self::new(format!("{field}.length"), field, RuleKind::Length { min, max })
    }

    pub fn custom(field: &str, hook: &str) -> Self {
        Self::new(format!("{field}.{hook}"), field, RuleKind::Custom { hook: hook.to_string() })
    }

    pub fn reference(field: &str, collection: &str) -> Self {
        Self::new(
            format!("{field}.reference"),
            field,
            RuleKind::Reference {
                collection: collection.to_string(),
            },
        )
    }

    pub fn business(field: &str, rule: BusinessRule) -> Self {
        Self::new(format!("{field}.business"), field, RuleKind::Business { rule })
    }

    pub fn with_severity(mut self, severity: RuleSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = Some(remediation);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Rule type and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    Type { expected: ValueType },
    Format { format: FormatKind },
    Enum { values: Vec<Value> },
    Range { min: Option<f64>, max: Option<f64> },
    /// String length, array length or object size
    Length { min: Option<usize>, max: Option<usize> },
    /// Named hook registered on the engine
    Custom { hook: String },
    /// Value must appear in the context's reference collection
    Reference { collection: String },
    Business { rule: BusinessRule },
}

impl RuleKind {
    /// Issue code emitted when a rule of this kind fails
    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::Required => codes::REQUIRED,
            Self::Type { .. } => codes::TYPE_MISMATCH,
            Self::Format { .. } => codes::INVALID_FORMAT,
            Self::Enum { .. } => codes::NOT_IN_ENUM,
            Self::Range { .. } => codes::OUT_OF_RANGE,
            Self::Length { .. } => codes::INVALID_LENGTH,
            Self::Custom { .. } => codes::CUSTOM_FAILED,
            Self::Reference { .. } => codes::REFERENCE_NOT_FOUND,
            Self::Business { .. } => codes::BUSINESS_RULE_VIOLATION,
        }
    }
}

/// Issue codes
pub mod codes {
    pub const REQUIRED: &str = "required";
    pub const TYPE_MISMATCH: &str = "type_mismatch";
    pub const INVALID_FORMAT: &str = "invalid_format";
    pub const NOT_IN_ENUM: &str = "not_in_enum";
    pub const OUT_OF_RANGE: &str = "out_of_range";
    pub const INVALID_LENGTH: &str = "invalid_length";
    pub const CUSTOM_FAILED: &str = "custom_failed";
    pub const REFERENCE_NOT_FOUND: &str = "reference_not_found";
    pub const BUSINESS_RULE_VIOLATION: &str = "business_rule_violation";
    /// A rule could not be evaluated
    pub const RULE_EXECUTION_ERROR: &str = "rule_execution_error";

    /// Codes `auto_fix` knows how to remediate
    pub const FIXABLE: &[&str] = &[
        REQUIRED,
        TYPE_MISMATCH,
        INVALID_FORMAT,
        NOT_IN_ENUM,
        OUT_OF_RANGE,
        INVALID_LENGTH,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl ValueType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Null => value.is_null(),
        }
    }

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "snake_case")]
pub enum FormatKind {
    Email,
    Uuid,
    Url,
    /// RFC 3339 timestamp
    Iso8601,
    Pattern(String),
}

/// Cross-field and contextual rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arg", rename_all = "snake_case")]
pub enum BusinessRule {
    /// Field equals the validating tenant
    MatchesContextTenant,
    /// RFC 3339 timestamp not later than now
    NotInFuture,
    /// Numeric field not greater than the field at the given path
    NotGreaterThan(String),
}

/// How `auto_fix` repairs a failed rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum Remediation {
    SetDefault(Value),
    Trim,
    Lowercase,
    /// Clamp into the rule's range
    Clamp,
    /// Truncate to the rule's maximum length
    Truncate,
    /// Convert to the rule's expected type
    Coerce,
    Remove,
}
