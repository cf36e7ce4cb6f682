//! Pipeline-wide settings.
//!
//! [`PipelineConfig`] is plain serde data, typically loaded from JSON. Every
//! field has a default, so `{}` is a valid configuration. Call
//! [`PipelineConfig::validate`] (or use [`PipelineConfig::from_json_str`],
//! which does) before wiring it into a builder or runner.

use crate::{
    batch::BatchRunner,
    chain::{ChainBuilder, ChainConfig, ChainLink},
    error::{PipelineError, Result},
    exec_ctx::ExecCtx,
    registry::StageRegistry,
    stages::{EnrichmentStage, NotificationStage},
};
use serde::{Deserialize, Serialize};

/// Settings for the notification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Channels used when a record does not name any.
    pub default_channels: Vec<String>,
    /// Probability that a simulated delivery fails.
    pub failure_rate: f64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            default_channels: vec!["email".to_string()],
            failure_rate: 0.0,
        }
    }
}

/// Settings for the enrichment stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    /// Year used to derive birth year and generation from `age`. `None`
    /// means the current year.
    pub reference_year: Option<i32>,
}

/// Top-level configuration.
///
/// # Example
///
/// ```
/// use record_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::from_json_str(
///     r#"{"default_chain": {"mode": "named", "name": "enrich_notify"}, "batch_concurrency": 4}"#,
/// ).unwrap();
/// let chain = config.build_default_chain().unwrap();
/// assert_eq!(chain.stage_names(), vec!["validation", "enrichment", "export", "notification"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_chain: ChainConfig,
    pub batch_concurrency: usize,
    pub notification: NotificationSettings,
    pub enrichment: EnrichmentSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_chain: ChainConfig::default(),
            batch_concurrency: 1,
            notification: NotificationSettings::default(),
            enrichment: EnrichmentSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        let rate = self.notification.failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(PipelineError::InvalidConfig(format!(
                "notification.failure_rate must be within 0.0..=1.0, got {}",
                rate
            )));
        }
        Ok(())
    }

    /// Built-in registry with the enrichment and notification stages
    /// constructed from these settings.
    pub fn registry(&self) -> StageRegistry {
        let mut registry = StageRegistry::with_builtins();
        let enrichment = self.enrichment.clone();
        registry.register("enrichment", move || {
            Box::new(EnrichmentStage::from_settings(&enrichment))
        });
        let notification = self.notification.clone();
        registry.register("notification", move || {
            Box::new(NotificationStage::from_settings(&notification))
        });
        registry
    }

    pub fn chain_builder(&self) -> ChainBuilder {
        ChainBuilder::with_registry(self.registry())
    }

    pub fn build_default_chain(&self) -> Result<ChainLink> {
        self.chain_builder().build_config(&self.default_chain)
    }

    /// A batch runner using these settings' builder and concurrency.
    pub fn batch_runner(&self, ctx: ExecCtx) -> BatchRunner {
        BatchRunner::with_ctx(ctx)
            .with_builder(self.chain_builder())
            .with_concurrency(self.batch_concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::types::RequestKind;
    use serde_json::json;

    #[test]
    fn test_empty_object_is_default() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.notification.default_channels, vec!["email"]);
        assert_eq!(config.default_chain, ChainConfig::Standard);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = PipelineConfig::from_json_str(r#"{"batch_concurrency": 0}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_bad_failure_rate() {
        let err = PipelineConfig::from_json_str(r#"{"notification": {"failure_rate": 1.5}}"#).unwrap_err();
        match err {
            PipelineError::InvalidConfig(msg) => assert!(msg.contains("failure_rate")),
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[tokio::test]
    async fn test_settings_reach_stages() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "default_chain": {"mode": "dynamic", "stages": ["enrichment"]},
                "enrichment": {"reference_year": 2000}
            }"#,
        )
        .unwrap();
        let chain = config.build_default_chain().unwrap();
        let record = Record::from_value(RequestKind::Enrichment, json!({"payload": {"age": 30}}));
        let result = crate::Orchestrator::new().run(record, &chain).await;
        let enriched = result.derived_payloads.enriched_payload.unwrap();
        assert_eq!(enriched["generation"], "Gen X");
    }

    #[tokio::test]
    async fn test_default_channels_reach_presets() {
        let config = PipelineConfig::from_json_str(
            r#"{"default_chain": {"mode": "named", "name": "enrich_notify"},
                "notification": {"default_channels": ["slack", "push"]}}"#,
        )
        .unwrap();
        let chain = config.build_default_chain().unwrap();
        let record = Record::from_value(RequestKind::Notification, json!({"payload": {}}));
        let result = crate::Orchestrator::new().run(record, &chain).await;
        let notified = result.derived_payloads.notification_result.unwrap();
        assert_eq!(notified["channels"], json!(["slack", "push"]));
        assert_eq!(notified["success_count"], 2);
    }
}
