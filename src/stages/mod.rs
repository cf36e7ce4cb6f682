//! Built-in stages.
//!
//! Every stage reads its configuration from siblings of `payload` in the
//! record body and writes its output through a [`DerivedKey`](crate::DerivedKey).
//! Stages hold no per-record state, so one instance serves a whole batch.

pub mod enrichment;
pub mod export;
pub mod notification;
pub mod transformation;
pub mod validation;

pub use enrichment::EnrichmentStage;
pub use export::{ExportFormat, ExportOptions, ExportStage};
pub use notification::{Channel, NotificationStage, NotificationType};
pub use transformation::{Transform, TransformationStage};
pub use validation::{FieldRule, FieldType, ValidationStage};

use serde_json::Value;

/// Plain-text rendering of a JSON value: strings unquoted, `null` empty,
/// everything else as compact JSON.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("Jo")), "Jo");
        assert_eq!(value_text(&json!(42)), "42");
        assert_eq!(value_text(&json!(null)), "");
        assert_eq!(value_text(&json!([1, 2])), "[1,2]");
    }
}
