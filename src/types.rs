use crate::diagnostics::{Diagnostic, LogEntry};
use crate::record::{DerivedKey, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Processing intent carried by a [`Record`].
///
/// Decides which stage is willing to activate on the record: every built-in
/// stage activates only on its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "data_validation", alias = "validation")]
    Validation,
    #[serde(rename = "data_transformation", alias = "transformation")]
    Transformation,
    #[serde(rename = "data_enrichment", alias = "enrichment")]
    Enrichment,
    #[serde(rename = "data_export", alias = "export")]
    Export,
    #[serde(rename = "notification")]
    Notification,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::Validation,
        RequestKind::Transformation,
        RequestKind::Enrichment,
        RequestKind::Export,
        RequestKind::Notification,
    ];

    /// Wire name, as accepted by the submission layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Validation => "data_validation",
            RequestKind::Transformation => "data_transformation",
            RequestKind::Enrichment => "data_enrichment",
            RequestKind::Export => "data_export",
            RequestKind::Notification => "notification",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = crate::PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "data_validation" | "validation" => Ok(RequestKind::Validation),
            "data_transformation" | "transformation" => Ok(RequestKind::Transformation),
            "data_enrichment" | "enrichment" => Ok(RequestKind::Enrichment),
            "data_export" | "export" => Ok(RequestKind::Export),
            "notification" => Ok(RequestKind::Notification),
            other => Err(crate::PipelineError::InvalidConfig(format!(
                "unknown request kind '{}'",
                other
            ))),
        }
    }
}

/// Progress update emitted at coarse milestones of a run or batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Correlation id of the run or batch.
    pub run_id: String,
    pub current: usize,
    pub total: usize,
    /// Whole-number percentage, `current * 100 / total` (100 when `total` is 0).
    pub percent: u8,
    pub status: String,
}

impl RunProgress {
    pub fn new(run_id: impl Into<String>, current: usize, total: usize, status: impl Into<String>) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((current.min(total) * 100) / total) as u8
        };
        Self {
            run_id: run_id.into(),
            current,
            total,
            percent,
            status: status.into(),
        }
    }
}

/// The four derived keys stages write next to the submitted payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedPayloads {
    pub transformed_payload: Option<Value>,
    pub enriched_payload: Option<Value>,
    pub export_result: Option<Value>,
    pub notification_result: Option<Value>,
}

/// Outcome of driving one record through one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub request_kind: RequestKind,
    #[serde(with = "crate::serde_millis")]
    pub duration: Duration,
    /// Number of log entries written during the run.
    pub total_handlers: usize,
    /// `errors.is_empty()`; warnings never affect it.
    pub success: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub log: Vec<LogEntry>,
    /// The submitted `payload` sub-key, untouched by the run.
    pub original_payload: Option<Value>,
    pub derived_payloads: DerivedPayloads,
    pub metadata: Map<String, Value>,
}

impl RunResult {
    /// Package a finished record. Consumes it: the record has no life past the run.
    pub(crate) fn from_record(run_id: impl Into<String>, record: Record, duration: Duration) -> Self {
        let derived_payloads = DerivedPayloads {
            transformed_payload: record.derived(DerivedKey::Transformed).cloned(),
            enriched_payload: record.derived(DerivedKey::Enriched).cloned(),
            export_result: record.derived(DerivedKey::ExportResult).cloned(),
            notification_result: record.derived(DerivedKey::NotificationResult).cloned(),
        };
        let original_payload = record.data().get("payload").cloned();
        let request_kind = record.kind();
        let parts = record.into_parts();

        Self {
            run_id: run_id.into(),
            request_kind,
            duration,
            total_handlers: parts.log.len(),
            success: parts.errors.is_empty(),
            errors: parts.errors,
            warnings: parts.warnings,
            log: parts.log,
            original_payload,
            derived_payloads,
            metadata: parts.metadata,
        }
    }
}

/// Per-item outcome inside a [`BatchResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// The chain ran to the end; see `result.success` for the verdict.
    Completed { result: Box<RunResult> },
    /// A defect escaped stage containment (a panic) while running this item.
    Failed { error: String },
}

/// One batch entry, tagged with its position in the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

impl BatchItem {
    /// Whether this item completed with no error diagnostics.
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, BatchOutcome::Completed { result } if result.success)
    }

    pub fn result(&self) -> Option<&RunResult> {
        match &self.outcome {
            BatchOutcome::Completed { result } => Some(result),
            BatchOutcome::Failed { .. } => None,
        }
    }
}

/// Aggregate statistics over a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_errors: usize,
    pub total_warnings: usize,
    /// Mean run duration over items that completed; `None` if none did.
    pub average_duration_ms: Option<f64>,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: String,
    /// Number of records submitted.
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Set when the cancellation flag stopped the batch before every item started.
    pub cancelled: bool,
    /// Items in input order.
    pub items: Vec<BatchItem>,
    pub summary: BatchSummary,
}

impl BatchResult {
    pub(crate) fn from_items(run_id: impl Into<String>, total: usize, items: Vec<BatchItem>, cancelled: bool) -> Self {
        let successful = items.iter().filter(|i| i.is_success()).count();
        let failed = items.len() - successful;

        let mut summary = BatchSummary::default();
        let mut durations = Vec::new();
        for result in items.iter().filter_map(BatchItem::result) {
            summary.total_errors += result.errors.len();
            summary.total_warnings += result.warnings.len();
            durations.push(result.duration.as_secs_f64() * 1000.0);
        }
        if !durations.is_empty() {
            summary.average_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }

        Self {
            run_id: run_id.into(),
            total,
            successful,
            failed,
            cancelled,
            items,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_parses_wire_and_short_names() {
        assert_eq!("data_enrichment".parse::<RequestKind>().unwrap(), RequestKind::Enrichment);
        assert_eq!("Export".parse::<RequestKind>().unwrap(), RequestKind::Export);
        assert!("bogus".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_request_kind_serde_alias() {
        let kind: RequestKind = serde_json::from_str("\"validation\"").unwrap();
        assert_eq!(kind, RequestKind::Validation);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"data_validation\"");
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(RunProgress::new("r", 1, 4, "x").percent, 25);
        assert_eq!(RunProgress::new("r", 4, 4, "x").percent, 100);
        assert_eq!(RunProgress::new("r", 0, 0, "x").percent, 100);
    }

    #[test]
    fn test_batch_summary_skips_failed_items() {
        let items = vec![BatchItem {
            index: 0,
            outcome: BatchOutcome::Failed {
                error: "panic".into(),
            },
        }];
        let batch = BatchResult::from_items("b", 1, items, false);
        assert_eq!(batch.successful, 0);
        assert_eq!(batch.failed, 1);
        assert!(batch.summary.average_duration_ms.is_none());
    }
}
