//! Message templates and `{variable}` rendering.

use crate::stages::value_text;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// An escaped brace pair or a `{key}` placeholder.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("Invalid placeholder regex"));

/// Notification flavour. Selects the built-in template and channel colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Success,
    Error,
    Warning,
    #[default]
    Info,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Success => "success",
            NotificationType::Error => "error",
            NotificationType::Warning => "warning",
            NotificationType::Info => "info",
        }
    }

    /// Built-in subject/body pair.
    pub fn template(&self) -> MessageTemplate {
        let (subject, body) = match self {
            NotificationType::Success => (
                "Run succeeded - {run_id}",
                "Run {run_id} completed successfully.\n\nTime: {timestamp}\nRecords: {record_count}\nStages: {handlers_used}",
            ),
            NotificationType::Error => (
                "Run failed - {run_id}",
                "Run {run_id} failed.\n\nErrors: {error_count}\nLast error: {error_message}\nTime: {timestamp}",
            ),
            NotificationType::Warning => (
                "Run finished with warnings - {run_id}",
                "Run {run_id} completed with {warning_count} warning(s).\n\nTime: {timestamp}\nRecords: {record_count}\nCheck the processing log.",
            ),
            NotificationType::Info => (
                "Run update - {run_id}",
                "Run {run_id} status update.\n\nTime: {timestamp}\nStatus: {status}\nRecords: {record_count}",
            ),
        };
        MessageTemplate {
            subject: subject.to_string(),
            body: body.to_string(),
            html_body: String::new(),
        }
    }

    pub fn slack_color(&self) -> &'static str {
        match self {
            NotificationType::Success => "good",
            NotificationType::Error => "danger",
            NotificationType::Warning => "warning",
            NotificationType::Info => "#36a64f",
        }
    }

    pub fn discord_color(&self) -> u32 {
        match self {
            NotificationType::Success => 0x00ff00,
            NotificationType::Error => 0xff0000,
            NotificationType::Warning => 0xffa500,
            NotificationType::Info => 0x0099ff,
        }
    }

    pub fn teams_color(&self) -> &'static str {
        match self {
            NotificationType::Success => "00FF00",
            NotificationType::Error => "FF0000",
            NotificationType::Warning => "FFA500",
            NotificationType::Info => "0099FF",
        }
    }
}

/// Subject and body with `{variable}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub html_body: String,
}

/// Replace `{key}` placeholders with values from `vars`.
///
/// Strings are inserted bare, other values as compact JSON. Placeholders
/// without a matching variable are left as-is. Use `{{` and `}}` for
/// literal braces. Substituted values are not scanned again.
///
/// # Example
///
/// ```
/// use record_pipeline::stages::notification::template::render;
/// use serde_json::json;
///
/// let vars = json!({"name": "Ada", "count": 3});
/// let out = render("{name} sent {count} {{items}} to {nobody}", vars.as_object().unwrap());
/// assert_eq!(out, "Ada sent 3 {items} to {nobody}");
/// ```
pub fn render(template: &str, vars: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |c: &Captures| match (&c[0], c.get(1)) {
            ("{{", _) => "{".to_string(),
            ("}}", _) => "}".to_string(),
            (whole, Some(key)) => vars
                .get(key.as_str())
                .map(value_text)
                .unwrap_or_else(|| whole.to_string()),
            (whole, None) => whole.to_string(),
        })
        .into_owned()
}
