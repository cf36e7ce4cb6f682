//! Execution context shared across stage invocations.
//!
//! [`ExecCtx`] carries the run identifier handed down by the task layer,
//! template variables, the cancellation handle and an optional event
//! handler. It is constructed once per run (or batch) and borrowed by every
//! stage in the chain.

use crate::events::EventHandler;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use uuid::Uuid;

/// Shared execution context for stage invocations.
///
/// # Example
///
/// ```
/// use record_pipeline::ExecCtx;
///
/// let ctx = ExecCtx::builder()
///     .run_id("task-42")
///     .var("team", "billing")
///     .build();
/// assert_eq!(ctx.run_id, "task-42");
/// ```
#[derive(Clone)]
pub struct ExecCtx {
    /// Opaque correlation id attached to every result. Defaults to a v4 UUID.
    pub run_id: String,
    /// Extra variables made available to notification templates.
    pub vars: HashMap<String, String>,
    /// Optional cancellation flag; checked between batch items.
    pub cancellation: Option<Arc<AtomicBool>>,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder() -> ExecCtxBuilder {
        ExecCtxBuilder {
            run_id: None,
            vars: HashMap::new(),
            cancellation: None,
            event_handler: None,
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Derive a context for one batch item: same handlers, suffixed run id.
    pub(crate) fn for_item(&self, index: usize) -> ExecCtx {
        ExecCtx {
            run_id: format!("{}-{}", self.run_id, index),
            ..self.clone()
        }
    }
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("run_id", &self.run_id)
            .field("vars_count", &self.vars.len())
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    run_id: Option<String>,
    vars: HashMap<String, String>,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtxBuilder {
    /// Set the correlation id supplied by the task layer.
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Set all template variables at once.
    pub fn vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    /// Insert a single template variable.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Set the cancellation flag.
    pub fn cancellation(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancellation = cancel;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        ExecCtx {
            run_id: self
                .run_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            vars: self.vars,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        }
    }
}
