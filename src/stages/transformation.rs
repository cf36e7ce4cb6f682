//! Per-field value transforms.
//!
//! `transformations` maps a payload field to a transform name. Names are
//! parsed into [`Transform`] once per field; parameterised transforms carry
//! their argument in the name (`multiply_1.5`, `substring_0_3`,
//! `replace_-_/`). Results land in `transformed_payload`, a copy of
//! `payload` with the changed fields replaced.

use crate::{
    error::{StageError, StageResult},
    exec_ctx::ExecCtx,
    record::{DerivedKey, Record},
    stage::{BoxFut, Stage},
    stages::value_text,
    types::RequestKind,
};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

const NAME: &str = "transformation";

static SPECIAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s]").expect("Invalid special-chars regex"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));
static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\-]").expect("Invalid slug regex"));
static DASH_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("Invalid dash regex"));

/// A single named transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Uppercase,
    Lowercase,
    Strip,
    TitleCase,
    Capitalize,
    /// Integer if the text has no `.`, float otherwise.
    ToNumber,
    ToString,
    ToBoolean,
    Multiply(f64),
    Divide(f64),
    Add(f64),
    Subtract(f64),
    Round(i32),
    RemoveSpaces,
    RemoveSpecialChars,
    ExtractNumbers,
    ExtractLetters,
    /// Character slice; negative bounds count from the end.
    Substring { start: i64, end: Option<i64> },
    Replace { from: String, to: String },
    Reverse,
    /// Every `{}` in the template is replaced by the value.
    Format(String),
    NormalizePhone,
    NormalizeEmail,
    GenerateSlug,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransformParseError {
    #[error("unknown transformation: {0}")]
    Unknown(String),
    #[error("malformed transformation '{name}': {reason}")]
    Malformed { name: String, reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot convert '{0}' to a number")]
    NotANumber(String),
    #[error("cannot convert '{0}' to a boolean")]
    NotABoolean(String),
    #[error("result is not a finite number")]
    NonFinite,
}

fn malformed(name: &str, reason: impl Into<String>) -> TransformParseError {
    TransformParseError::Malformed {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn parse_arg<T: FromStr>(name: &str, arg: &str) -> Result<T, TransformParseError> {
    arg.parse()
        .map_err(|_| malformed(name, format!("'{}' is not a valid argument", arg)))
}

impl FromStr for Transform {
    type Err = TransformParseError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let simple = match name {
            "uppercase" => Some(Transform::Uppercase),
            "lowercase" => Some(Transform::Lowercase),
            "strip" => Some(Transform::Strip),
            "title_case" => Some(Transform::TitleCase),
            "capitalize" => Some(Transform::Capitalize),
            "to_number" => Some(Transform::ToNumber),
            "to_string" => Some(Transform::ToString),
            "to_boolean" => Some(Transform::ToBoolean),
            "remove_spaces" => Some(Transform::RemoveSpaces),
            "remove_special_chars" => Some(Transform::RemoveSpecialChars),
            "extract_numbers" => Some(Transform::ExtractNumbers),
            "extract_letters" => Some(Transform::ExtractLetters),
            "reverse" => Some(Transform::Reverse),
            "normalize_phone" => Some(Transform::NormalizePhone),
            "normalize_email" => Some(Transform::NormalizeEmail),
            "generate_slug" => Some(Transform::GenerateSlug),
            _ => None,
        };
        if let Some(t) = simple {
            return Ok(t);
        }

        let Some((op, rest)) = name.split_once('_') else {
            return Err(TransformParseError::Unknown(name.to_string()));
        };
        // Numeric arguments stop at the next underscore.
        let first = rest.split('_').next().unwrap_or_default();
        match op {
            "multiply" => Ok(Transform::Multiply(parse_arg(name, first)?)),
            "divide" => Ok(Transform::Divide(parse_arg(name, first)?)),
            "add" => Ok(Transform::Add(parse_arg(name, first)?)),
            "subtract" => Ok(Transform::Subtract(parse_arg(name, first)?)),
            "round" => Ok(Transform::Round(parse_arg(name, first)?)),
            "substring" => {
                let mut parts = rest.split('_');
                let start = parse_arg(name, parts.next().unwrap_or_default())?;
                let end = parts.next().map(|e| parse_arg(name, e)).transpose()?;
                Ok(Transform::Substring { start, end })
            }
            "replace" => match rest.split_once('_') {
                Some((from, to)) => Ok(Transform::Replace {
                    from: from.to_string(),
                    to: to.to_string(),
                }),
                None => Err(malformed(name, "expected replace_<old>_<new>")),
            },
            "format" => Ok(Transform::Format(rest.to_string())),
            _ => Err(TransformParseError::Unknown(name.to_string())),
        }
    }
}

impl Transform {
    /// Apply to one value. Text transforms work on the value's text form.
    pub fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        let text = || value_text(value);
        let out = match self {
            Transform::Uppercase => Value::String(text().to_uppercase()),
            Transform::Lowercase => Value::String(text().to_lowercase()),
            Transform::Strip => Value::String(text().trim().to_string()),
            Transform::TitleCase => Value::String(title_case(&text())),
            Transform::Capitalize => Value::String(capitalize(&text())),
            Transform::ToNumber => to_number(&text())?,
            Transform::ToString => Value::String(text()),
            Transform::ToBoolean => Value::Bool(to_boolean(value)?),
            Transform::Multiply(f) => float(as_f64(value)? * f)?,
            Transform::Divide(d) => {
                if *d == 0.0 {
                    return Err(TransformError::DivisionByZero);
                }
                float(as_f64(value)? / d)?
            }
            Transform::Add(n) => float(as_f64(value)? + n)?,
            Transform::Subtract(n) => float(as_f64(value)? - n)?,
            Transform::Round(digits) => {
                let scale = 10f64.powi(*digits);
                float((as_f64(value)? * scale).round() / scale)?
            }
            Transform::RemoveSpaces => Value::String(text().replace(' ', "")),
            Transform::RemoveSpecialChars => Value::String(SPECIAL_CHARS.replace_all(&text(), "").into_owned()),
            Transform::ExtractNumbers => Value::String(text().chars().filter(char::is_ascii_digit).collect()),
            Transform::ExtractLetters => Value::String(text().chars().filter(char::is_ascii_alphabetic).collect()),
            Transform::Substring { start, end } => Value::String(slice_chars(&text(), *start, *end)),
            Transform::Replace { from, to } => Value::String(text().replace(from.as_str(), to)),
            Transform::Reverse => Value::String(text().chars().rev().collect()),
            Transform::Format(template) => Value::String(template.replace("{}", &text())),
            Transform::NormalizePhone => Value::String(normalize_phone(&text())),
            Transform::NormalizeEmail => Value::String(text().trim().to_lowercase()),
            Transform::GenerateSlug => Value::String(slugify(&text())),
        };
        Ok(out)
    }
}

fn as_f64(value: &Value) -> Result<f64, TransformError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| TransformError::NotANumber(n.to_string())),
        Value::String(s) => s.trim().parse().map_err(|_| TransformError::NotANumber(s.clone())),
        other => Err(TransformError::NotANumber(other.to_string())),
    }
}

fn float(n: f64) -> Result<Value, TransformError> {
    Number::from_f64(n).map(Value::Number).ok_or(TransformError::NonFinite)
}

fn to_number(text: &str) -> Result<Value, TransformError> {
    let trimmed = text.trim();
    if trimmed.contains('.') {
        let n: f64 = trimmed.parse().map_err(|_| TransformError::NotANumber(text.to_string()))?;
        float(n)
    } else {
        let n: i64 = trimmed.parse().map_err(|_| TransformError::NotANumber(text.to_string()))?;
        Ok(Value::from(n))
    }
}

fn to_boolean(value: &Value) -> Result<bool, TransformError> {
    if let Value::Bool(b) = value {
        return Ok(*b);
    }
    let text = value_text(value);
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(TransformError::NotABoolean(text)),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn slice_chars(text: &str, start: i64, end: Option<i64>) -> String {
    let len = text.chars().count() as i64;
    let clamp = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
    let from = clamp(start);
    let to = end.map(clamp).unwrap_or(len);
    if from >= to {
        return String::new();
    }
    text.chars().skip(from as usize).take((to - from) as usize).collect()
}

/// US 10/11-digit and Chinese `86`-prefixed numbers get a canonical layout;
/// anything else is returned untouched.
fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => {
            format!("+1 ({}) {}-{}", &digits[1..4], &digits[4..7], &digits[7..])
        }
        13 if digits.starts_with("86") => {
            format!("+86 {}-{}-{}", &digits[2..5], &digits[5..9], &digits[9..])
        }
        _ => phone.to_string(),
    }
}

fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let dashed = WHITESPACE_RUN.replace_all(&lower, "-");
    let cleaned = NON_SLUG.replace_all(&dashed, "");
    let collapsed = DASH_RUN.replace_all(&cleaned, "-");
    collapsed.trim_matches('-').to_string()
}

/// Applies `transformations` to `payload`, writing `transformed_payload`.
///
/// Unknown transform names are warnings and leave the field unchanged.
/// Malformed arguments and per-value failures (division by zero, text that
/// is not a number) are errors for that field only.
#[derive(Debug, Clone, Default)]
pub struct TransformationStage;

impl TransformationStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for TransformationStage {
    fn kind(&self) -> RequestKind {
        RequestKind::Transformation
    }

    fn name(&self) -> &str {
        NAME
    }

    fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
        Box::pin(async move {
            let mut transformed: Map<String, Value> = record.business_payload().cloned().unwrap_or_default();
            let transformations: Map<String, Value> = match record.config("transformations") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => Map::new(),
            };

            let mut changed = 0usize;
            for (field, requested) in &transformations {
                let Some(original) = transformed.get(field).cloned() else {
                    continue;
                };
                let Some(name) = requested.as_str() else {
                    record.add_error(NAME, StageError::field(field, "transformation name must be a string").to_string());
                    continue;
                };
                let transform = match name.parse::<Transform>() {
                    Ok(t) => t,
                    Err(e @ TransformParseError::Unknown(_)) => {
                        record.add_warning(NAME, e.to_string());
                        continue;
                    }
                    Err(e) => {
                        record.add_error(NAME, StageError::field(field, e.to_string()).to_string());
                        continue;
                    }
                };
                match transform.apply(&original) {
                    Ok(updated) if updated != original => {
                        record.info(
                            NAME,
                            format!("field {}: {} ({} -> {})", field, name, original, updated),
                        );
                        transformed.insert(field.clone(), updated);
                        changed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => record.add_error(NAME, StageError::field(field, e.to_string()).to_string()),
                }
            }

            debug!(changed, requested = transformations.len(), "transformation done");
            record.insert_derived(DerivedKey::Transformed, Value::Object(transformed));
            record.info(NAME, format!("transformed {} fields", changed));
            Ok(())
        })
    }
}
