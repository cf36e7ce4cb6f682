//! The unit of work flowing through a chain.
//!
//! A [`Record`] owns the submitted data, caller metadata and the diagnostic
//! trail. The trail (`log`, `errors`, `warnings`) is append-only: the only
//! way to touch it is through the `add_*` methods. Stages write their output
//! through [`Record::insert_derived`], which cannot overwrite the submitted
//! `payload`, so the original submission stays reconstructible.

use crate::diagnostics::{Diagnostic, LogEntry, LogStatus};
use crate::types::RequestKind;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Keys a stage may write into the record's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedKey {
    Transformed,
    Enriched,
    ExportResult,
    ExportError,
    NotificationResult,
}

impl DerivedKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedKey::Transformed => "transformed_payload",
            DerivedKey::Enriched => "enriched_payload",
            DerivedKey::ExportResult => "export_result",
            DerivedKey::ExportError => "export_error",
            DerivedKey::NotificationResult => "notification_result",
        }
    }
}

/// A request travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct Record {
    kind: RequestKind,
    data: Map<String, Value>,
    /// Caller-supplied context; the orchestrator adds `processing_time`
    /// and `total_handlers` once the run completes.
    pub metadata: Map<String, Value>,
    log: Vec<LogEntry>,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    created_at: DateTime<Utc>,
}

/// Owned pieces of a finished record, used when packaging results.
pub(crate) struct RecordParts {
    pub log: Vec<LogEntry>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub metadata: Map<String, Value>,
}

impl Record {
    /// Create a record. `data` is the request body: the `payload` sub-key
    /// holds the business fields, sibling keys hold stage configuration
    /// (`required_fields`, `transformations`, `export_config`, ...).
    pub fn new(kind: RequestKind, data: Map<String, Value>) -> Self {
        Self {
            kind,
            data,
            metadata: Map::new(),
            log: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Build a record from a JSON value. Non-object values are wrapped as
    /// `{"payload": value}`.
    pub fn from_value(kind: RequestKind, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        Self::new(kind, data)
    }

    /// Attach caller metadata (builder style).
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The full request body, including any derived keys written so far.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// The submitted business fields (`data["payload"]`), if it is an object.
    pub fn business_payload(&self) -> Option<&Map<String, Value>> {
        self.data.get("payload").and_then(Value::as_object)
    }

    /// Read a configuration sibling of `payload` (e.g. `"export_config"`).
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn derived(&self, key: DerivedKey) -> Option<&Value> {
        self.data.get(key.as_str())
    }

    /// Write a stage output. Replaces a previous value under the same key.
    pub fn insert_derived(&mut self, key: DerivedKey, value: Value) {
        self.data.insert(key.as_str().to_string(), value);
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn add_log(&mut self, stage: &str, message: impl Into<String>, status: LogStatus) {
        self.log.push(LogEntry::new(stage, message, status));
    }

    /// Shorthand for an `INFO` log entry.
    pub fn info(&mut self, stage: &str, message: impl Into<String>) {
        self.add_log(stage, message, LogStatus::Info);
    }

    pub fn add_error(&mut self, stage: &str, text: impl Into<String>) {
        self.errors.push(Diagnostic::new(stage, text));
    }

    pub fn add_warning(&mut self, stage: &str, text: impl Into<String>) {
        self.warnings.push(Diagnostic::new(stage, text));
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn into_parts(self) -> RecordParts {
        RecordParts {
            log: self.log,
            errors: self.errors,
            warnings: self.warnings,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_wraps_non_object() {
        let record = Record::from_value(RequestKind::Export, json!([1, 2, 3]));
        assert_eq!(record.data()["payload"], json!([1, 2, 3]));
        assert!(record.business_payload().is_none());
    }

    #[test]
    fn test_business_payload() {
        let record = Record::from_value(
            RequestKind::Validation,
            json!({"payload": {"name": "Jo"}, "required_fields": ["name"]}),
        );
        assert_eq!(record.business_payload().unwrap()["name"], "Jo");
        assert_eq!(record.config("required_fields").unwrap(), &json!(["name"]));
    }

    #[test]
    fn test_insert_derived_keeps_payload() {
        let mut record = Record::from_value(RequestKind::Transformation, json!({"payload": {"a": 1}}));
        record.insert_derived(DerivedKey::Transformed, json!({"a": 2}));
        assert_eq!(record.data()["payload"], json!({"a": 1}));
        assert_eq!(record.derived(DerivedKey::Transformed).unwrap(), &json!({"a": 2}));
    }

    #[test]
    fn test_trail_appends_in_order() {
        let mut record = Record::from_value(RequestKind::Validation, json!({}));
        record.info("a", "first");
        record.add_log("b", "second", LogStatus::Success);
        record.add_warning("a", "careful");
        assert!(record.is_success());
        record.add_error("b", "broken");

        assert_eq!(record.log().len(), 2);
        assert_eq!(record.log()[0].message, "first");
        assert_eq!(record.log()[1].status, LogStatus::Success);
        assert_eq!(record.warnings()[0].stage_name, "a");
        assert!(!record.is_success());
    }
}
