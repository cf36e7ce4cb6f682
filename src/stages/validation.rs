//! Field presence, type and range checks.
//!
//! Reads `required_fields` (list of names) and `validation_rules` (field name
//! to [`FieldRule`]) from the record body and checks them against `payload`.
//! Every violation is reported in the same run; a missing field does not
//! stop the rule checks on the fields that are present.

use crate::{
    error::StageResult,
    exec_ctx::ExecCtx,
    record::Record,
    stage::{BoxFut, Stage},
    stages::value_text,
    types::RequestKind,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

const NAME: &str = "validation";

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("Invalid email regex")
});

/// US, Chinese mobile, and a loose international fallback.
static PHONE_REGEXES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"^\+?1?[-.\s]?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}$").expect("Invalid US phone regex"),
        Regex::new(r"^\+?86[-.\s]?1[0-9]{10}$").expect("Invalid CN phone regex"),
        Regex::new(r"^\+?[0-9]{1,4}[-.\s]?[0-9]{1,4}[-.\s]?[0-9]{1,4}[-.\s]?[0-9]{1,4}$")
            .expect("Invalid generic phone regex"),
    ]
});

/// Expected type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    /// Invalid address is an error.
    Email,
    /// Unrecognised format is only a warning.
    Phone,
    /// Any other type name; not checked.
    #[serde(other)]
    Any,
}

/// Per-field rule from `validation_rules`.
///
/// Lengths count characters of the value's text form, so they apply to
/// numbers too (`12345` has length 5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(rename = "type", default)]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    /// Regex matched at the start of the value.
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Checks `payload` against `required_fields` and `validation_rules`.
///
/// | Violation | Severity |
/// |-----------|----------|
/// | missing required field | error |
/// | wrong `string`/`number` type, invalid `email` | error |
/// | unrecognised `phone` | warning |
/// | shorter than `min_length` | warning |
/// | longer than `max_length` | error |
/// | outside `min_value`/`max_value` | error |
/// | `pattern` mismatch or invalid pattern | error |
#[derive(Debug, Clone, Default)]
pub struct ValidationStage;

impl ValidationStage {
    pub fn new() -> Self {
        Self
    }

    fn check_required(record: &mut Record, payload: &Map<String, Value>, required: &[String]) {
        for field in required {
            if !payload.contains_key(field) {
                record.add_error(NAME, format!("missing required field: {}", field));
            }
        }
    }

    fn check_type(record: &mut Record, field: &str, value: &Value, field_type: FieldType) {
        match field_type {
            FieldType::String if !value.is_string() => {
                record.add_error(NAME, format!("{} should be a string", field));
            }
            FieldType::Number if !value.is_number() => {
                record.add_error(NAME, format!("{} should be a number", field));
            }
            FieldType::Email if !is_valid_email(&value_text(value)) => {
                record.add_error(NAME, format!("{} is not a valid email address", field));
            }
            FieldType::Phone if !is_valid_phone(&value_text(value)) => {
                record.add_warning(NAME, format!("{} may not be a valid phone number", field));
            }
            _ => {}
        }
    }

    fn check_rule(record: &mut Record, field: &str, value: &Value, rule: &FieldRule) {
        if let Some(field_type) = rule.field_type {
            Self::check_type(record, field, value, field_type);
        }

        let text = value_text(value);
        let len = text.chars().count();
        if let Some(min) = rule.min_length {
            if len < min {
                record.add_warning(NAME, format!("{} below min_length {}", field, min));
            }
        }
        if let Some(max) = rule.max_length {
            if len > max {
                record.add_error(NAME, format!("{} exceeds max_length {}", field, max));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = rule.min_value {
                if n < min {
                    record.add_error(NAME, format!("{} below min_value {}", field, min));
                }
            }
            if let Some(max) = rule.max_value {
                if n > max {
                    record.add_error(NAME, format!("{} above max_value {}", field, max));
                }
            }
        }

        if let Some(pattern) = &rule.pattern {
            match Regex::new(&format!("^(?:{})", pattern)) {
                Ok(re) if re.is_match(&text) => {}
                Ok(_) => record.add_error(NAME, format!("{} does not match pattern {}", field, pattern)),
                Err(e) => record.add_error(NAME, format!("{} has an invalid pattern: {}", field, e)),
            }
        }
    }
}

impl Stage for ValidationStage {
    fn kind(&self) -> RequestKind {
        RequestKind::Validation
    }

    fn name(&self) -> &str {
        NAME
    }

    fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
        Box::pin(async move {
            let payload = record.business_payload().cloned().unwrap_or_default();
            let required: Vec<String> = match record.config("required_fields") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => Vec::new(),
            };
            let rules: Map<String, Value> = match record.config("validation_rules") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };

            Self::check_required(record, &payload, &required);

            for (field, rule) in &rules {
                let Some(value) = payload.get(field) else {
                    continue;
                };
                let rule: FieldRule = serde_json::from_value(rule.clone())?;
                Self::check_rule(record, field, value, &rule);
            }

            debug!(fields = payload.len(), rules = rules.len(), "validation done");
            record.info(NAME, format!("validated {} fields", payload.len()));
            Ok(())
        })
    }
}

pub(crate) fn is_valid_email(text: &str) -> bool {
    EMAIL_REGEX.is_match(text)
}

pub(crate) fn is_valid_phone(text: &str) -> bool {
    PHONE_REGEXES.iter().any(|re| re.is_match(text))
}
