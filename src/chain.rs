//! Ordered chains of stages and the builders that assemble them.
//!
//! [`ChainLink`] is a forward-only sequence of stages. [`ChainBuilder`]
//! produces one from an explicit list, a named [`Preset`], or a list of
//! stage-name tokens resolved against a [`StageRegistry`].

use crate::{
    error::Result,
    registry::{BuiltinStage, StageRegistry},
    stage::Stage,
    PipelineError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// An ordered sequence of stages.
///
/// Traversal order equals build order. The chain owns its stages; it is
/// shared by reference across runs and never relinked.
pub struct ChainLink {
    name: String,
    stages: Vec<Box<dyn Stage>>,
}

impl ChainLink {
    /// Name given by the builder (preset name, `"dynamic"`, or `"custom"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages in the chain. Never zero.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Iterate the stages from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Stage> {
        self.stages.iter().map(|s| s.as_ref())
    }

    /// Stage names in traversal order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLink")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Canonical stage sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Validation → Transformation → Enrichment → Export → Notification.
    Standard,
    /// Validation → Notification.
    ValidationOnly,
    /// Export → Notification.
    ExportOnly,
    /// Validation → Enrichment → Export → Notification.
    EnrichNotify,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Standard,
        Preset::ValidationOnly,
        Preset::ExportOnly,
        Preset::EnrichNotify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Standard => "standard",
            Preset::ValidationOnly => "validation_only",
            Preset::ExportOnly => "export_only",
            Preset::EnrichNotify => "enrich_notify",
        }
    }

    pub fn stages(&self) -> &'static [BuiltinStage] {
        use BuiltinStage::*;
        match self {
            Preset::Standard => &[Validation, Transformation, Enrichment, Export, Notification],
            Preset::ValidationOnly => &[Validation, Notification],
            Preset::ExportOnly => &[Export, Notification],
            Preset::EnrichNotify => &[Validation, Enrichment, Export, Notification],
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Preset {
    /// Look a preset up by its snake_case name.
    pub fn from_name(name: &str) -> Option<Preset> {
        Preset::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

/// Serializable description of which chain to build.
///
/// ```
/// use record_pipeline::chain::ChainConfig;
///
/// let cfg: ChainConfig = serde_json::from_str(
///     r#"{"mode": "dynamic", "stages": ["validation", "notification"]}"#,
/// ).unwrap();
/// assert_eq!(cfg, ChainConfig::Dynamic { stages: vec!["validation".into(), "notification".into()] });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChainConfig {
    Standard,
    Named { name: String },
    Dynamic { stages: Vec<String> },
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig::Standard
    }
}

/// Assembles [`ChainLink`]s.
///
/// # Example
///
/// ```
/// use record_pipeline::ChainBuilder;
///
/// let builder = ChainBuilder::new();
/// let chain = builder.build_dynamic(&["validation", "bogus", "notification"]).unwrap();
/// assert_eq!(chain.stage_names(), vec!["validation", "notification"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChainBuilder {
    registry: StageRegistry,
}

impl ChainBuilder {
    /// A builder resolving names against the built-in stages.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder resolving names against a custom registry.
    pub fn with_registry(registry: StageRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Link `stages` in the given order.
    pub fn build(&self, stages: Vec<Box<dyn Stage>>) -> Result<ChainLink> {
        Self::link("custom", stages)
    }

    /// The five-stage standard chain.
    pub fn build_standard(&self) -> Result<ChainLink> {
        self.build_preset(Preset::Standard)
    }

    /// Build a preset by name (`standard`, `validation_only`, `export_only`, `enrich_notify`).
    ///
    /// An unrecognised name builds the standard chain (logged at `warn`).
    pub fn build_named(&self, name: &str) -> Result<ChainLink> {
        let preset = Preset::from_name(name).unwrap_or_else(|| {
            warn!(name, "unknown chain preset, using standard");
            Preset::Standard
        });
        self.build_preset(preset)
    }

    pub fn build_preset(&self, preset: Preset) -> Result<ChainLink> {
        let stages = preset
            .stages()
            .iter()
            .map(|b| self.registry.create(b.token()).unwrap_or_else(|| b.instantiate()))
            .collect();
        Self::link(preset.as_str(), stages)
    }

    /// Resolve each token against the registry and link the hits in order.
    ///
    /// Unknown tokens are skipped (logged at `warn`), not rejected. If
    /// nothing resolves the build fails with [`PipelineError::EmptyChain`].
    pub fn build_dynamic<S: AsRef<str>>(&self, names: &[S]) -> Result<ChainLink> {
        let mut stages = Vec::with_capacity(names.len());
        for token in names {
            let token = token.as_ref();
            match self.registry.create(token) {
                Some(stage) => stages.push(stage),
                None => warn!(token, "skipping unknown stage name"),
            }
        }
        Self::link("dynamic", stages)
    }

    /// Build whatever `config` describes.
    pub fn build_config(&self, config: &ChainConfig) -> Result<ChainLink> {
        match config {
            ChainConfig::Standard => self.build_standard(),
            ChainConfig::Named { name } => self.build_named(name),
            ChainConfig::Dynamic { stages } => self.build_dynamic(stages),
        }
    }

    fn link(name: &str, stages: Vec<Box<dyn Stage>>) -> Result<ChainLink> {
        if stages.is_empty() {
            return Err(PipelineError::EmptyChain);
        }
        let chain = ChainLink {
            name: name.to_string(),
            stages,
        };
        debug!(chain = chain.name(), stages = ?chain.stage_names(), "chain built");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageResult;
    use crate::exec_ctx::ExecCtx;
    use crate::record::Record;
    use crate::stage::BoxFut;
    use crate::types::RequestKind;

    struct Named(&'static str);

    impl Stage for Named {
        fn kind(&self) -> RequestKind {
            RequestKind::Validation
        }
        fn name(&self) -> &str {
            self.0
        }
        fn apply<'a>(&'a self, _ctx: &'a ExecCtx, _record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_explicit_order_preserved() {
        let chain = ChainBuilder::new()
            .build(vec![Box::new(Named("c")), Box::new(Named("a")), Box::new(Named("b"))])
            .unwrap();
        assert_eq!(chain.stage_names(), vec!["c", "a", "b"]);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.name(), "custom");
    }

    #[test]
    fn test_empty_explicit_fails() {
        match ChainBuilder::new().build(Vec::new()) {
            Err(PipelineError::EmptyChain) => {}
            other => panic!("Expected EmptyChain, got {other:?}"),
        }
    }

    #[test]
    fn test_presets() {
        let builder = ChainBuilder::new();
        assert_eq!(
            builder.build_standard().unwrap().stage_names(),
            vec!["validation", "transformation", "enrichment", "export", "notification"]
        );
        assert_eq!(
            builder.build_named("validation_only").unwrap().stage_names(),
            vec!["validation", "notification"]
        );
        assert_eq!(
            builder.build_named("export_only").unwrap().stage_names(),
            vec!["export", "notification"]
        );
        assert_eq!(
            builder.build_named("enrich_notify").unwrap().stage_names(),
            vec!["validation", "enrichment", "export", "notification"]
        );
    }

    #[test]
    fn test_unknown_preset_falls_back_to_standard() {
        let chain = ChainBuilder::new().build_named("transform_export").unwrap();
        assert_eq!(chain.name(), "standard");
        assert_eq!(chain.len(), 5);

        let cfg = ChainConfig::Named {
            name: "everything".into(),
        };
        assert_eq!(ChainBuilder::new().build_config(&cfg).unwrap().name(), "standard");
        assert_eq!(Preset::from_name("export_only"), Some(Preset::ExportOnly));
        assert_eq!(Preset::from_name("Export_Only"), None);
    }

    #[test]
    fn test_dynamic_skips_unknown_tokens() {
        let chain = ChainBuilder::new()
            .build_dynamic(&["validation", "bogus", "notification"])
            .unwrap();
        assert_eq!(chain.stage_names(), vec!["validation", "notification"]);
    }

    #[test]
    fn test_dynamic_all_unknown_is_empty() {
        let result = ChainBuilder::new().build_dynamic(&["nope", "nada"]);
        assert!(matches!(result, Err(PipelineError::EmptyChain)));
    }

    #[test]
    fn test_dynamic_uses_custom_registry() {
        let mut registry = StageRegistry::new();
        registry.register("first", || Box::new(Named("first")));
        let chain = ChainBuilder::with_registry(registry)
            .build_dynamic(&["first", "validation", "first"])
            .unwrap();
        assert_eq!(chain.stage_names(), vec!["first", "first"]);
    }

    #[test]
    fn test_build_config() {
        let builder = ChainBuilder::new();
        let cfg: ChainConfig = serde_json::from_str(r#"{"mode":"named","name":"export_only"}"#).unwrap();
        assert_eq!(builder.build_config(&cfg).unwrap().name(), "export_only");
        assert_eq!(builder.build_config(&ChainConfig::default()).unwrap().len(), 5);
    }
}
