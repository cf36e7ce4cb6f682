//! Name-to-stage resolution for dynamic chain assembly.
//!
//! [`BuiltinStage`] is the closed set of stages shipped with the crate.
//! [`StageRegistry`] maps name tokens to constructors; it starts with the
//! built-ins and accepts custom registrations. Names are resolved once,
//! when a chain is built, never per record.

use crate::stage::Stage;
use crate::stages::{EnrichmentStage, ExportStage, NotificationStage, TransformationStage, ValidationStage};
use crate::types::RequestKind;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Built-in stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinStage {
    Validation,
    Transformation,
    Enrichment,
    Export,
    Notification,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 5] = [
        BuiltinStage::Validation,
        BuiltinStage::Transformation,
        BuiltinStage::Enrichment,
        BuiltinStage::Export,
        BuiltinStage::Notification,
    ];

    /// Name token used by dynamic assembly (and as the stage's name).
    pub fn token(&self) -> &'static str {
        match self {
            BuiltinStage::Validation => "validation",
            BuiltinStage::Transformation => "transformation",
            BuiltinStage::Enrichment => "enrichment",
            BuiltinStage::Export => "export",
            BuiltinStage::Notification => "notification",
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            BuiltinStage::Validation => RequestKind::Validation,
            BuiltinStage::Transformation => RequestKind::Transformation,
            BuiltinStage::Enrichment => RequestKind::Enrichment,
            BuiltinStage::Export => RequestKind::Export,
            BuiltinStage::Notification => RequestKind::Notification,
        }
    }

    /// Fresh instance with default settings.
    pub fn instantiate(&self) -> Box<dyn Stage> {
        match self {
            BuiltinStage::Validation => Box::new(ValidationStage::new()),
            BuiltinStage::Transformation => Box::new(TransformationStage::new()),
            BuiltinStage::Enrichment => Box::new(EnrichmentStage::new()),
            BuiltinStage::Export => Box::new(ExportStage::new()),
            BuiltinStage::Notification => Box::new(NotificationStage::new()),
        }
    }
}

impl fmt::Display for BuiltinStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for BuiltinStage {
    type Err = crate::PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinStage::ALL
            .into_iter()
            .find(|b| b.token() == s)
            .ok_or_else(|| crate::PipelineError::InvalidConfig(format!("unknown stage '{}'", s)))
    }
}

/// Constructor stored in a [`StageRegistry`].
pub type StageFactory = Arc<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

/// Maps stage-name tokens to constructors.
///
/// # Example
///
/// ```
/// use record_pipeline::registry::StageRegistry;
///
/// let registry = StageRegistry::with_builtins();
/// assert!(registry.create("validation").is_some());
/// assert!(registry.create("bogus").is_none());
/// ```
#[derive(Clone)]
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry preloaded with the five built-in stages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for builtin in BuiltinStage::ALL {
            registry.register(builtin.token(), move || builtin.instantiate());
        }
        registry
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a fresh stage for `name`, or `None` if it is not registered.
    pub fn create(&self, name: &str) -> Option<Box<dyn Stage>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageResult;
    use crate::exec_ctx::ExecCtx;
    use crate::record::Record;
    use crate::stage::BoxFut;

    struct Audit;

    impl Stage for Audit {
        fn kind(&self) -> RequestKind {
            RequestKind::Notification
        }
        fn name(&self) -> &str {
            "audit"
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, _record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_builtins_registered_by_token() {
        let registry = StageRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["enrichment", "export", "notification", "transformation", "validation"]
        );
        for builtin in BuiltinStage::ALL {
            let stage = registry.create(builtin.token()).unwrap();
            assert_eq!(stage.name(), builtin.token());
            assert_eq!(stage.kind(), builtin.kind());
        }
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = StageRegistry::new();
        registry.register("audit", || Box::new(Audit));
        assert!(registry.contains("audit"));
        assert_eq!(registry.create("audit").unwrap().name(), "audit");
        assert!(registry.create("validation").is_none());
    }

    #[test]
    fn test_builtin_from_str() {
        assert_eq!("export".parse::<BuiltinStage>().unwrap(), BuiltinStage::Export);
        assert!("Export".parse::<BuiltinStage>().is_err());
    }
}
