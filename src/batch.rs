//! Apply one chain to many independent records.
//!
//! Each record gets its own run. A panic escaping a stage is caught at the
//! item boundary and recorded as a failed item; the rest of the batch keeps
//! going. Results come back in input order regardless of concurrency.

use crate::{
    chain::{ChainBuilder, ChainConfig, ChainLink},
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    orchestrator::{panic_message, Orchestrator},
    record::Record,
    types::{BatchItem, BatchOutcome, BatchResult, RunProgress},
};
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

/// Runs a chain over a collection of records.
///
/// # Example
///
/// ```
/// use record_pipeline::{BatchRunner, ChainBuilder, Record, RequestKind};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let chain = ChainBuilder::new().build_named("validation_only").unwrap();
/// let records = vec![
///     Record::from_value(RequestKind::Validation, json!({"payload": {"a": 1}, "required_fields": ["a"]})),
///     Record::from_value(RequestKind::Validation, json!({"payload": {}, "required_fields": ["a"]})),
/// ];
/// let batch = BatchRunner::new().run(records, &chain).await;
/// assert_eq!(batch.successful, 1);
/// assert_eq!(batch.failed, 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct BatchRunner {
    orchestrator: Orchestrator,
    builder: ChainBuilder,
    concurrency: usize,
}

impl BatchRunner {
    /// A sequential runner with a default context.
    pub fn new() -> Self {
        Self::with_ctx(ExecCtx::default())
    }

    /// A sequential runner bound to `ctx`. Item run ids are `"{run_id}-{index}"`.
    pub fn with_ctx(ctx: ExecCtx) -> Self {
        Self {
            orchestrator: Orchestrator::with_ctx(ctx),
            builder: ChainBuilder::new(),
            concurrency: 1,
        }
    }

    /// Run up to `n` items at once (minimum 1). Output order is unaffected.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Use a custom builder for [`run_config`](Self::run_config).
    pub fn with_builder(mut self, builder: ChainBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn ctx(&self) -> &ExecCtx {
        self.orchestrator.ctx()
    }

    /// Build one chain from `config` and run every record through it.
    ///
    /// The build step is the only failure surfaced as an error.
    pub async fn run_config(&self, records: Vec<Record>, config: &ChainConfig) -> Result<BatchResult> {
        self.run_config_with_progress(records, config, |_| {}).await
    }

    /// [`run_config`](Self::run_config) with progress reporting.
    pub async fn run_config_with_progress<F>(
        &self,
        records: Vec<Record>,
        config: &ChainConfig,
        on_progress: F,
    ) -> Result<BatchResult>
    where
        F: FnMut(RunProgress),
    {
        let chain = self.builder.build_config(config)?;
        Ok(self.run_with_progress(records, &chain, on_progress).await)
    }

    /// Run every record through `chain`.
    pub async fn run(&self, records: Vec<Record>, chain: &ChainLink) -> BatchResult {
        self.run_with_progress(records, chain, |_| {}).await
    }

    /// Same as [`run`](Self::run), reporting "item N of M" as each item
    /// completes (in input order) and a final "batch finished".
    pub async fn run_with_progress<F>(&self, records: Vec<Record>, chain: &ChainLink, mut on_progress: F) -> BatchResult
    where
        F: FnMut(RunProgress),
    {
        let ctx = self.ctx();
        let run_id = ctx.run_id.as_str();
        let total = records.len();
        info!(run_id, total, chain = chain.name(), concurrency = self.concurrency, "batch started");

        // Progress is reported from the driving loop; items only report back
        // through their outcome so the callback never needs to be shared.
        let mut items = Vec::with_capacity(total);
        let mut cancelled = false;
        {
            let mut outcomes = futures::stream::iter(records.into_iter().enumerate())
                .map(|(index, record)| self.run_item(index, total, record, chain))
                .buffered(self.concurrency);

            while let Some(item) = outcomes.next().await {
                match item {
                    Some(item) => {
                        on_progress(RunProgress::new(
                            run_id,
                            item.index + 1,
                            total,
                            format!("item {} of {}", item.index + 1, total),
                        ));
                        items.push(item);
                    }
                    None => cancelled = true,
                }
            }
        }

        if cancelled {
            warn!(run_id, completed = items.len(), total, "batch cancelled");
            emit(
                &ctx.event_handler,
                Event::BatchCancelled {
                    run_id: run_id.to_string(),
                    completed: items.len(),
                },
            );
        }

        let result = BatchResult::from_items(run_id, total, items, cancelled);
        info!(
            run_id,
            successful = result.successful,
            failed = result.failed,
            total_errors = result.summary.total_errors,
            total_warnings = result.summary.total_warnings,
            "batch finished"
        );
        on_progress(RunProgress::new(run_id, result.items.len(), total, "batch finished"));
        result
    }

    /// Run one item. `None` means the cancellation flag was set before it started.
    async fn run_item(&self, index: usize, total: usize, record: Record, chain: &ChainLink) -> Option<BatchItem> {
        let ctx = self.ctx();
        if ctx.is_cancelled() {
            return None;
        }
        emit(
            &ctx.event_handler,
            Event::BatchItemStart {
                run_id: ctx.run_id.clone(),
                index,
                total,
            },
        );

        let item_ctx = ctx.for_item(index);
        let run = self.orchestrator.run_in(&item_ctx, record, chain, false, |_| {});
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => BatchOutcome::Completed {
                result: Box::new(result),
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(run_id = %ctx.run_id, index, error = %message, "batch item failed");
                emit(
                    &ctx.event_handler,
                    Event::BatchItemFailed {
                        run_id: ctx.run_id.clone(),
                        index,
                        error: message.clone(),
                    },
                );
                BatchOutcome::Failed { error: message }
            }
        };
        Some(BatchItem { index, outcome })
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageResult;
    use crate::stage::{BoxFut, Stage};
    use crate::types::RequestKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Panics when the payload carries `"explode": true`.
    struct Fragile;

    impl Stage for Fragile {
        fn kind(&self) -> RequestKind {
            RequestKind::Export
        }
        fn name(&self) -> &str {
            "fragile"
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async move {
                let explode = record
                    .business_payload()
                    .and_then(|p| p.get("explode"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if explode {
                    panic!("defect in fragile stage");
                }
                if record.business_payload().is_some_and(|p| p.contains_key("bad")) {
                    record.add_error("fragile", "bad input");
                }
                record.add_warning("fragile", "noted");
                Ok(())
            })
        }
    }

    /// Sets the cancel flag the first time it runs.
    struct Canceller(Arc<AtomicBool>, Arc<AtomicUsize>);

    impl Stage for Canceller {
        fn kind(&self) -> RequestKind {
            RequestKind::Export
        }
        fn name(&self) -> &str {
            "canceller"
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, _record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async move {
                self.1.fetch_add(1, Ordering::SeqCst);
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn record(payload: serde_json::Value) -> Record {
        Record::from_value(RequestKind::Export, json!({ "payload": payload }))
    }

    fn fragile_chain() -> ChainLink {
        ChainBuilder::new().build(vec![Box::new(Fragile)]).unwrap()
    }

    #[tokio::test]
    async fn test_panic_isolated_and_order_preserved() {
        let records = vec![
            record(json!({})),
            record(json!({"bad": 1})),
            record(json!({"explode": true})),
            record(json!({})),
            record(json!({"bad": 1})),
        ];
        let batch = BatchRunner::new().run(records, &fragile_chain()).await;

        assert_eq!(batch.total, 5);
        assert_eq!(batch.items.len(), 5);
        let indexes: Vec<usize> = batch.items.iter().map(|i| i.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);

        match &batch.items[2].outcome {
            BatchOutcome::Failed { error } => assert!(error.contains("defect")),
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert!(batch.items[0].is_success());
        assert!(!batch.items[1].is_success());
        assert!(batch.items[3].is_success());
        assert!(!batch.items[4].is_success());

        assert_eq!(batch.successful, 2);
        assert_eq!(batch.failed, 3);
        assert_eq!(batch.summary.total_errors, 2);
        assert_eq!(batch.summary.total_warnings, 4);
        assert!(batch.summary.average_duration_ms.is_some());
        assert!(!batch.cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_batch_keeps_order() {
        let records = (0..8).map(|i| record(json!({ "i": i }))).collect();
        let batch = BatchRunner::new()
            .with_concurrency(4)
            .run(records, &fragile_chain())
            .await;
        let indexes: Vec<usize> = batch.items.iter().map(|i| i.index).collect();
        assert_eq!(indexes, (0..8).collect::<Vec<_>>());
        assert_eq!(batch.successful, 8);
    }

    #[tokio::test]
    async fn test_item_run_ids_are_suffixed() {
        let ctx = ExecCtx::builder().run_id("batch-1").build();
        let batch = BatchRunner::with_ctx(ctx)
            .run(vec![record(json!({})), record(json!({}))], &fragile_chain())
            .await;
        assert_eq!(batch.run_id, "batch-1");
        assert_eq!(batch.items[1].result().unwrap().run_id, "batch-1-1");
    }

    #[tokio::test]
    async fn test_cancel_between_items() {
        let flag = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        let stage_flag = flag.clone();
        let stage_runs = runs.clone();
        let chain = ChainBuilder::new()
            .build(vec![Box::new(Canceller(stage_flag, stage_runs))])
            .unwrap();

        let ctx = ExecCtx::builder().cancellation(Some(flag)).build();
        let records = (0..3).map(|_| record(json!({}))).collect();
        let batch = BatchRunner::with_ctx(ctx).run(records, &chain).await;

        assert!(batch.cancelled);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.total, 3);
    }

    #[tokio::test]
    async fn test_progress_reports_each_item() {
        let mut seen = Vec::new();
        let records = (0..3).map(|_| record(json!({}))).collect();
        BatchRunner::new()
            .run_with_progress(records, &fragile_chain(), |p| seen.push(p.status))
            .await;
        assert_eq!(
            seen,
            vec!["item 1 of 3", "item 2 of 3", "item 3 of 3", "batch finished"]
        );
    }

    #[tokio::test]
    async fn test_run_config_surfaces_empty_chain() {
        let config = ChainConfig::Dynamic {
            stages: vec!["bogus".into()],
        };
        let result = BatchRunner::new().run_config(vec![record(json!({}))], &config).await;
        assert!(matches!(result, Err(crate::PipelineError::EmptyChain)));
    }
}
