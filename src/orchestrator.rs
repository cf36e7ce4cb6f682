//! Drives one record through one chain.
//!
//! The orchestrator walks a pre-built [`ChainLink`] from head to tail. Each
//! stage that activates gets an `INFO` "stage started" entry, its `apply`
//! call, and a `SUCCESS` "stage completed" entry -- completion means the
//! call returned, not that the stage was happy. A stage's `Err` becomes an
//! error diagnostic and the walk continues; the chain never short-circuits.
//! A stage that panics during [`Orchestrator::run`] is recorded the same way,
//! as "stage panicked: ..."; batch runs let the panic reach the item boundary
//! instead.

use crate::{
    chain::ChainLink,
    diagnostics::LogStatus,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    record::Record,
    types::{RunProgress, RunResult},
};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Executes chains against records.
///
/// Performs no chain-name resolution: callers build the chain with
/// [`ChainBuilder`](crate::ChainBuilder) and hand it in.
///
/// # Example
///
/// ```
/// use record_pipeline::{ChainBuilder, Orchestrator, Record, RequestKind};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let chain = ChainBuilder::new().build_named("validation_only").unwrap();
/// let record = Record::from_value(
///     RequestKind::Validation,
///     json!({"payload": {"name": "Ada"}, "required_fields": ["name"]}),
/// );
/// let result = Orchestrator::new().run(record, &chain).await;
/// assert!(result.success);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    ctx: ExecCtx,
}

impl Orchestrator {
    /// An orchestrator with a fresh default context (random run id).
    pub fn new() -> Self {
        Self::default()
    }

    /// An orchestrator bound to a caller-built context.
    pub fn with_ctx(ctx: ExecCtx) -> Self {
        Self { ctx }
    }

    pub fn ctx(&self) -> &ExecCtx {
        &self.ctx
    }

    /// Drive `record` through `chain` and package the result.
    pub async fn run(&self, record: Record, chain: &ChainLink) -> RunResult {
        self.run_in(&self.ctx, record, chain, true, |_| {}).await
    }

    /// Same as [`run`](Self::run), reporting progress at "chain built" and
    /// "chain executed".
    pub async fn run_with_progress<F>(&self, record: Record, chain: &ChainLink, on_progress: F) -> RunResult
    where
        F: FnMut(RunProgress),
    {
        self.run_in(&self.ctx, record, chain, true, on_progress).await
    }

    /// Walk the chain. With `contain_panics` off, a stage panic unwinds to
    /// the caller.
    pub(crate) async fn run_in<F>(
        &self,
        ctx: &ExecCtx,
        mut record: Record,
        chain: &ChainLink,
        contain_panics: bool,
        mut on_progress: F,
    ) -> RunResult
    where
        F: FnMut(RunProgress),
    {
        let run_id = ctx.run_id.as_str();
        on_progress(RunProgress::new(run_id, 1, 2, "chain built"));
        info!(run_id, kind = %record.kind(), chain = chain.name(), stages = chain.len(), "run started");
        emit(
            &ctx.event_handler,
            Event::RunStart {
                run_id: run_id.to_string(),
                kind: record.kind(),
                stages: chain.len(),
            },
        );

        let start = Instant::now();
        for stage in chain.iter() {
            let name = stage.name();
            if !stage.activates_on(&record) {
                debug!(run_id, stage = name, "stage skipped");
                emit(
                    &ctx.event_handler,
                    Event::StageSkipped {
                        run_id: run_id.to_string(),
                        stage: name.to_string(),
                    },
                );
                continue;
            }

            emit(
                &ctx.event_handler,
                Event::StageStart {
                    run_id: run_id.to_string(),
                    stage: name.to_string(),
                },
            );
            record.add_log(name, "stage started", LogStatus::Info);

            let errors_before = record.errors().len();
            match AssertUnwindSafe(stage.apply(ctx, &mut record)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(run_id, stage = name, error = %e, "stage failed");
                    record.add_error(name, format!("stage failed: {}", e));
                }
                Err(panic) if contain_panics => {
                    let message = panic_message(panic.as_ref());
                    error!(run_id, stage = name, error = %message, "stage panicked");
                    record.add_error(name, format!("stage panicked: {}", message));
                }
                Err(panic) => panic::resume_unwind(panic),
            }
            let ok = record.errors().len() == errors_before;

            record.add_log(name, "stage completed", LogStatus::Success);
            emit(
                &ctx.event_handler,
                Event::StageEnd {
                    run_id: run_id.to_string(),
                    stage: name.to_string(),
                    ok,
                },
            );
        }
        let duration = start.elapsed();

        record
            .metadata
            .insert("processing_time".to_string(), Value::from(duration.as_secs_f64()));
        record
            .metadata
            .insert("total_handlers".to_string(), Value::from(record.log().len()));

        let result = RunResult::from_record(run_id, record, duration);
        info!(
            run_id,
            success = result.success,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            elapsed_ms = duration.as_millis() as u64,
            "run finished"
        );
        emit(
            &ctx.event_handler,
            Event::RunEnd {
                run_id: run_id.to_string(),
                success: result.success,
                duration_ms: duration.as_millis() as u64,
            },
        );
        on_progress(RunProgress::new(run_id, 2, 2, "chain executed"));
        result
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StageError, StageResult};
    use crate::events::FnEventHandler;
    use crate::stage::{BoxFut, Stage};
    use crate::types::RequestKind;
    use crate::ChainBuilder;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Test stage: logs a line, optionally fails.
    struct Scripted {
        name: &'static str,
        kind: RequestKind,
        fail: bool,
    }

    impl Stage for Scripted {
        fn kind(&self) -> RequestKind {
            self.kind
        }
        fn name(&self) -> &str {
            self.name
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async move {
                if self.fail {
                    return Err(StageError::Other("exploded".into()));
                }
                record.info(self.name, "did work");
                Ok(())
            })
        }
    }

    fn scripted(name: &'static str, kind: RequestKind, fail: bool) -> Box<dyn Stage> {
        Box::new(Scripted { name, kind, fail })
    }

    #[tokio::test]
    async fn test_no_matching_stage_leaves_trail_empty() {
        let chain = ChainBuilder::new()
            .build(vec![
                scripted("a", RequestKind::Export, false),
                scripted("b", RequestKind::Notification, false),
            ])
            .unwrap();
        let record = Record::from_value(RequestKind::Enrichment, json!({"payload": {}}));
        let result = Orchestrator::new().run(record, &chain).await;

        assert!(result.log.is_empty());
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.total_handlers, 0);
        assert!(result.success);
        assert_eq!(result.metadata["total_handlers"], json!(0));
    }

    #[tokio::test]
    async fn test_single_match_counts_only_its_entries() {
        let chain = ChainBuilder::new()
            .build(vec![
                scripted("a", RequestKind::Export, false),
                scripted("b", RequestKind::Validation, false),
                scripted("c", RequestKind::Notification, false),
            ])
            .unwrap();
        let record = Record::from_value(RequestKind::Validation, json!({}));
        let result = Orchestrator::new().run(record, &chain).await;

        // started + "did work" + completed
        assert_eq!(result.total_handlers, 3);
        assert!(result.log.iter().all(|e| e.stage_name == "b"));
        assert_eq!(result.log[0].message, "stage started");
        assert_eq!(result.log[0].status, LogStatus::Info);
        assert_eq!(result.log[2].message, "stage completed");
        assert_eq!(result.log[2].status, LogStatus::Success);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_traversal() {
        let chain = ChainBuilder::new()
            .build(vec![
                scripted("s1", RequestKind::Export, true),
                scripted("s2", RequestKind::Export, false),
            ])
            .unwrap();
        let record = Record::from_value(RequestKind::Export, json!({}));
        let result = Orchestrator::new().run(record, &chain).await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage_name, "s1");
        assert!(result.errors[0].text.contains("exploded"));

        let stages: Vec<&str> = result.log.iter().map(|e| e.stage_name.as_str()).collect();
        assert_eq!(stages, vec!["s1", "s1", "s2", "s2", "s2"]);
    }

    #[tokio::test]
    async fn test_metadata_and_progress() {
        let chain = ChainBuilder::new()
            .build(vec![scripted("a", RequestKind::Export, false)])
            .unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), json!("test"));
        let record = Record::from_value(RequestKind::Export, json!({"payload": {"x": 1}})).with_metadata(metadata);

        let ctx = ExecCtx::builder().run_id("run-7").build();
        let mut seen = Vec::new();
        let result = Orchestrator::with_ctx(ctx)
            .run_with_progress(record, &chain, |p| seen.push(p))
            .await;

        assert_eq!(result.run_id, "run-7");
        assert_eq!(result.metadata["source"], "test");
        assert!(result.metadata["processing_time"].is_f64());
        assert_eq!(result.metadata["total_handlers"], json!(3));
        assert_eq!(result.original_payload, Some(json!({"x": 1})));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].status, "chain built");
        assert_eq!(seen[1].status, "chain executed");
        assert_eq!(seen[1].percent, 100);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let ctx = ExecCtx::builder()
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                let tag = match e {
                    Event::RunStart { .. } => "run_start".to_string(),
                    Event::StageStart { stage, .. } => format!("start:{stage}"),
                    Event::StageEnd { stage, ok, .. } => format!("end:{stage}:{ok}"),
                    Event::StageSkipped { stage, .. } => format!("skip:{stage}"),
                    Event::RunEnd { success, .. } => format!("run_end:{success}"),
                    _ => "other".to_string(),
                };
                sink.lock().unwrap().push(tag);
            })))
            .build();

        let chain = ChainBuilder::new()
            .build(vec![
                scripted("x", RequestKind::Notification, false),
                scripted("y", RequestKind::Export, true),
            ])
            .unwrap();
        let record = Record::from_value(RequestKind::Export, json!({}));
        Orchestrator::with_ctx(ctx).run(record, &chain).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["run_start", "skip:x", "start:y", "end:y:false", "run_end:false"]
        );
    }

    /// Panics on every call.
    struct Faulty;

    impl Stage for Faulty {
        fn kind(&self) -> RequestKind {
            RequestKind::Export
        }
        fn name(&self) -> &str {
            "faulty"
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, _record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async { panic!("index out of range") })
        }
    }

    #[tokio::test]
    async fn test_single_run_contains_stage_panic() {
        let chain = ChainBuilder::new()
            .build(vec![Box::new(Faulty), scripted("after", RequestKind::Export, false)])
            .unwrap();
        let record = Record::from_value(RequestKind::Export, json!({}));
        let result = Orchestrator::new().run(record, &chain).await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage_name, "faulty");
        assert_eq!(result.errors[0].text, "stage panicked: index out of range");
        assert!(result.log.iter().any(|e| e.stage_name == "after" && e.message == "did work"));
    }

    #[tokio::test]
    async fn test_identical_records_yield_identical_results() {
        let chain = ChainBuilder::new().build_standard().unwrap();
        let orchestrator = Orchestrator::new();
        let bodies = [
            (
                RequestKind::Transformation,
                json!({
                    "payload": {"n": "x", "name": "ada"},
                    "transformations": {"n": "multiply_2", "name": "uppercase"}
                }),
            ),
            (
                RequestKind::Validation,
                json!({
                    "payload": {"name": "Jo"},
                    "required_fields": ["name", "email"],
                    "validation_rules": {"name": {"min_length": 3}}
                }),
            ),
        ];

        for (kind, body) in bodies {
            let first = orchestrator.run(Record::from_value(kind, body.clone()), &chain).await;
            let second = orchestrator.run(Record::from_value(kind, body), &chain).await;

            let texts = |d: &[crate::diagnostics::Diagnostic]| -> Vec<String> {
                d.iter().map(|d| format!("{}: {}", d.stage_name, d.text)).collect()
            };
            assert!(!first.errors.is_empty());
            assert_eq!(texts(&first.errors[..]), texts(&second.errors[..]));
            assert_eq!(texts(&first.warnings[..]), texts(&second.warnings[..]));
            assert_eq!(first.derived_payloads, second.derived_payloads);
            assert_eq!(first.success, second.success);
        }
    }
}
