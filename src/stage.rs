//! Core stage trait.
//!
//! Stages are the unit of domain logic in a chain. Each stage decides
//! whether it is relevant to a [`Record`] ([`Stage::activates_on`]) and, if
//! so, mutates it ([`Stage::apply`]). A failing `apply` hands back a
//! [`StageError`]; the orchestrator records it and keeps walking the chain.

use crate::error::StageResult;
use crate::exec_ctx::ExecCtx;
use crate::record::Record;
use crate::types::RequestKind;
use std::future::Future;
use std::pin::Pin;

/// A boxed, pinned, Send future -- the return type of [`Stage::apply`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe trait for processing stages.
///
/// Stages are stored as `Box<dyn Stage>` inside a [`ChainLink`](crate::chain::ChainLink)
/// and reused across records, so implementations must not carry per-record
/// state between invocations.
pub trait Stage: Send + Sync {
    /// The request kind this stage serves.
    fn kind(&self) -> RequestKind;

    /// Stable identifier, used in log entries, diagnostics and name lookups.
    fn name(&self) -> &str;

    /// Whether this stage should run on `record`. Must be side-effect free.
    ///
    /// The default gates on exact kind equality, so a chain mixing stages of
    /// different kinds runs only the stage(s) matching the record's kind.
    fn activates_on(&self, record: &Record) -> bool {
        record.kind() == self.kind()
    }

    /// Apply the stage to the record.
    ///
    /// Stages may append log entries, warnings and per-field errors as they
    /// go. Returning `Err` marks the whole stage as failed; the orchestrator
    /// records it as an error diagnostic under [`name`](Self::name).
    fn apply<'a>(&'a self, ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>>;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe;

    impl Stage for Probe {
        fn kind(&self) -> RequestKind {
            RequestKind::Export
        }
        fn name(&self) -> &str {
            "probe"
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async move {
                record.info("probe", "touched");
                Ok(())
            })
        }
    }

    #[test]
    fn test_default_activation_is_exact_kind() {
        let export = Record::from_value(RequestKind::Export, json!({}));
        let notify = Record::from_value(RequestKind::Notification, json!({}));
        assert!(Probe.activates_on(&export));
        assert!(!Probe.activates_on(&notify));
    }

    #[test]
    fn test_apply_mutates_record() {
        let mut record = Record::from_value(RequestKind::Export, json!({}));
        let ctx = ExecCtx::default();
        tokio_test::block_on(Probe.apply(&ctx, &mut record)).unwrap();
        assert_eq!(record.log()[0].message, "touched");
    }

    #[test]
    fn test_debug_names_stage() {
        let stage: Box<dyn Stage> = Box::new(Probe);
        let rendered = format!("{:?}", stage);
        assert!(rendered.contains("probe"));
    }
}
