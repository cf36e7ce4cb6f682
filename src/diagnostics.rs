//! Execution trail entries recorded on a [`Record`](crate::record::Record).
//!
//! [`LogEntry`] captures what a stage did, [`Diagnostic`] captures what went
//! wrong (errors) or looked suspicious (warnings). Both carry the emitting
//! stage's name and a UTC timestamp so the trace can be reconstructed after
//! the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status attached to a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Info,
    Success,
}

/// One line of the execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Name of the stage (or component) that wrote the entry.
    pub stage_name: String,
    pub message: String,
    pub status: LogStatus,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(stage_name: impl Into<String>, message: impl Into<String>, status: LogStatus) -> Self {
        Self {
            stage_name: stage_name.into(),
            message: message.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// An error or warning recorded by a stage.
///
/// Whether a diagnostic is an error or a warning is decided by which list
/// of the record it lives in; the entry itself is the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Name of the stage that raised it.
    pub stage_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(stage_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_status_serializes_uppercase() {
        let entry = LogEntry::new("validation", "stage started", LogStatus::Info);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "INFO");
        assert_eq!(json["stage_name"], "validation");

        let done = serde_json::to_value(LogStatus::Success).unwrap();
        assert_eq!(done, "SUCCESS");
    }

    #[test]
    fn test_diagnostic_keeps_stage_name() {
        let d = Diagnostic::new("export", "unsupported format: pdf");
        assert_eq!(d.stage_name, "export");
        assert_eq!(d.text, "unsupported format: pdf");
        assert!(d.timestamp <= Utc::now());
    }
}
