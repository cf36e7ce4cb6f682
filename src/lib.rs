//! # Record Pipeline
//!
//! A chain-of-responsibility engine for typed data-processing requests.
//!
//! A caller wraps a payload in a [`Record`] tagged with a [`RequestKind`],
//! picks a chain, and hands both to an [`Orchestrator`]. Each stage in the
//! chain decides whether it activates for the record's kind, then inspects
//! or annotates it. Stage failures never abort the run: they become error
//! diagnostics on the record, and the next stage carries on.
//!
//! Queueing, persistence and the HTTP surface belong to the caller. This
//! crate provides what runs *inside* one task.
//!
//! ## Core Concepts
//!
//! - **[`Stage`]**: object-safe async trait for one processing step.
//!   Activates on an exact kind match by default.
//! - **[`ChainLink`]**: an ordered sequence of stages, assembled by
//!   [`ChainBuilder`] from an explicit list, a [`Preset`], or a dynamic
//!   list of stage names.
//! - **[`Orchestrator`]**: drives one record through one chain and
//!   packages a [`RunResult`].
//! - **[`BatchRunner`]**: one chain over many records, with per-item panic
//!   isolation and an aggregate [`BatchResult`].
//! - **[`ExecCtx`]**: run id, template variables, cancellation flag and
//!   an optional event handler.
//!
//! The built-in stages live in [`stages`]: validation, transformation,
//! enrichment, export and notification.
//!
//! ## Quick Start
//!
//! ```
//! use record_pipeline::{ChainBuilder, ExecCtx, Orchestrator, Record, RequestKind};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let chain = ChainBuilder::new().build_named("validation_only").unwrap();
//! let record = Record::from_value(
//!     RequestKind::Validation,
//!     json!({
//!         "payload": {"name": "Jo"},
//!         "required_fields": ["name", "email"],
//!         "validation_rules": {"name": {"min_length": 3}}
//!     }),
//! );
//!
//! let orchestrator = Orchestrator::with_ctx(ExecCtx::builder().run_id("task-1").build());
//! let result = orchestrator.run(record, &chain).await;
//! assert!(!result.success);
//! assert_eq!(result.errors[0].text, "missing required field: email");
//! assert_eq!(result.warnings[0].text, "name below min_length 3");
//! # });
//! ```
//!
//! ## Dynamic chains
//!
//! ```
//! use record_pipeline::chain::ChainConfig;
//! use record_pipeline::ChainBuilder;
//!
//! let config: ChainConfig = serde_json::from_str(
//!     r#"{"mode": "dynamic", "stages": ["transformation", "nope", "export"]}"#,
//! ).unwrap();
//! let chain = ChainBuilder::new().build_config(&config).unwrap();
//! assert_eq!(chain.stage_names(), vec!["transformation", "export"]);
//! ```

pub mod batch;
pub mod chain;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod orchestrator;
pub mod record;
pub mod registry;
pub mod stage;
pub mod stages;
pub mod types;

mod serde_millis;

pub use batch::BatchRunner;
pub use chain::{ChainBuilder, ChainConfig, ChainLink, Preset};
pub use config::{EnrichmentSettings, NotificationSettings, PipelineConfig};
pub use diagnostics::{Diagnostic, LogEntry, LogStatus};
pub use error::{PipelineError, Result, StageError, StageResult};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use orchestrator::Orchestrator;
pub use record::{DerivedKey, Record};
pub use registry::{BuiltinStage, StageRegistry};
pub use stage::{BoxFut, Stage};
pub use types::{
    BatchItem, BatchOutcome, BatchResult, BatchSummary, DerivedPayloads, RequestKind, RunProgress,
    RunResult,
};
