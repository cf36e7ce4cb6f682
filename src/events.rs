//! Event system for run lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe chain execution.
//! The orchestrator and batch runner emit events when runs and stages start,
//! finish or are skipped. Implement [`EventHandler`] to feed dashboards,
//! progress bars or audit sinks.

use crate::types::RequestKind;
use std::sync::Arc;

/// Events emitted while driving records through a chain.
#[derive(Debug, Clone)]
pub enum Event {
    /// A record has entered a chain.
    RunStart {
        run_id: String,
        kind: RequestKind,
        /// Number of stages in the chain.
        stages: usize,
    },
    /// An activated stage is about to apply.
    StageStart { run_id: String, stage: String },
    /// An activated stage returned. `ok` is false when it reported an error.
    StageEnd {
        run_id: String,
        stage: String,
        ok: bool,
    },
    /// A stage did not activate on the record.
    StageSkipped { run_id: String, stage: String },
    /// The chain has been walked to the end.
    RunEnd {
        run_id: String,
        success: bool,
        duration_ms: u64,
    },
    /// A batch item is about to run.
    BatchItemStart {
        run_id: String,
        index: usize,
        total: usize,
    },
    /// A batch item escaped stage containment.
    BatchItemFailed {
        run_id: String,
        index: usize,
        error: String,
    },
    /// The batch stopped early on the cancellation flag.
    BatchCancelled { run_id: String, completed: usize },
}

/// Handler for run lifecycle events.
///
/// This is entirely optional -- chains run the same without a handler.
///
/// # Example
///
/// ```
/// use record_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::StageStart { stage, .. } => println!("[start] {}", stage),
///             Event::StageEnd { stage, ok, .. } => println!("[end] {} ok={}", stage, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the pipeline emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use record_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::StageSkipped { stage, .. } = event {
///         println!("skipped {}", stage);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(
            &None,
            Event::StageSkipped {
                run_id: "r".into(),
                stage: "export".into(),
            },
        );
    }

    #[test]
    fn test_fn_handler_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Option<Arc<dyn EventHandler>> = Some(Arc::new(FnEventHandler(move |e: Event| {
            if let Event::StageStart { stage, .. } = e {
                sink.lock().unwrap().push(stage);
            }
        })));

        emit(
            &handler,
            Event::StageStart {
                run_id: "r".into(),
                stage: "validation".into(),
            },
        );
        assert_eq!(*seen.lock().unwrap(), vec!["validation".to_string()]);
    }
}
