//! Fan a rendered message out over several channels.
//!
//! `notification_config` selects the [`NotificationType`], the channel list
//! and optional template/variable overrides. Each channel succeeds or fails
//! on its own; a failed channel is a warning, never a stage error. The
//! per-channel outcomes land in `notification_result`.

pub mod channel;
pub mod template;

pub use channel::{builtin_channels, Channel, SimulatedChannel, SimulatedKind, WebhookChannel};
pub use template::{MessageTemplate, NotificationType};

use crate::{
    config::NotificationSettings,
    error::StageResult,
    exec_ctx::ExecCtx,
    record::{DerivedKey, Record},
    stage::{BoxFut, Stage},
    types::RequestKind,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const NAME: &str = "notification";

/// A rendered message, as handed to every channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationContent {
    #[serde(skip)]
    pub kind: NotificationType,
    pub subject: String,
    pub body: String,
    pub html_body: String,
    pub variables: Map<String, Value>,
    pub priority: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChannelList {
    One(String),
    Many(Vec<String>),
}

fn default_priority() -> String {
    "normal".to_string()
}

/// The `notification_config` block.
#[derive(Debug, Clone, Deserialize)]
struct NotificationConfig {
    #[serde(rename = "type", default)]
    kind: NotificationType,
    #[serde(default)]
    channels: Option<ChannelList>,
    #[serde(default)]
    template: Option<MessageTemplate>,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default = "default_priority")]
    priority: String,
}

/// Sends the record's notification over the configured channels.
///
/// Channels are looked up by name; the defaults are `email`, `sms`,
/// `webhook`, `slack`, `discord`, `teams` and `push`. A name with no
/// registered channel is recorded as a failed delivery.
///
/// # Example
///
/// ```
/// use record_pipeline::stages::NotificationStage;
/// use record_pipeline::stages::notification::WebhookChannel;
///
/// let stage = NotificationStage::new()
///     .with_default_channels(vec!["slack".into(), "webhook".into()])
///     .with_channel(WebhookChannel::with_client(reqwest::Client::new()));
/// assert!(stage.channel_names().contains(&"webhook"));
/// ```
#[derive(Clone)]
pub struct NotificationStage {
    channels: BTreeMap<String, Arc<dyn Channel>>,
    default_channels: Vec<String>,
}

impl NotificationStage {
    /// Built-in simulated channels, defaulting to `email` when a record names none.
    pub fn new() -> Self {
        Self::from_settings(&NotificationSettings::default())
    }

    pub fn from_settings(settings: &NotificationSettings) -> Self {
        let mut stage = Self {
            channels: BTreeMap::new(),
            default_channels: settings.default_channels.clone(),
        };
        for channel in builtin_channels(settings.failure_rate) {
            stage.channels.insert(channel.name().to_string(), channel);
        }
        stage
    }

    /// Add or replace a channel under its own name.
    pub fn with_channel(mut self, channel: impl Channel + 'static) -> Self {
        self.channels.insert(channel.name().to_string(), Arc::new(channel));
        self
    }

    /// Channels used when `notification_config.channels` is absent.
    pub fn with_default_channels(mut self, channels: Vec<String>) -> Self {
        self.default_channels = channels;
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    fn variables(ctx: &ExecCtx, record: &Record, extra: &Map<String, Value>) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("timestamp".into(), json!(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()));
        vars.insert("run_id".into(), json!(ctx.run_id));
        vars.insert(
            "status".into(),
            json!(if record.is_success() { "success" } else { "failed" }),
        );

        let (record_count, data_keys) = match record.data().get("payload") {
            Some(Value::Object(map)) => (1, map.keys().cloned().collect::<Vec<_>>()),
            Some(Value::Array(items)) => (
                items.len(),
                items
                    .first()
                    .and_then(Value::as_object)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default(),
            ),
            _ => (0, Vec::new()),
        };
        vars.insert("record_count".into(), json!(record_count));
        vars.insert("data_keys".into(), json!(data_keys));

        let mut handlers: Vec<&str> = Vec::new();
        for entry in record.log() {
            if !handlers.contains(&entry.stage_name.as_str()) {
                handlers.push(&entry.stage_name);
            }
        }
        vars.insert("log_count".into(), json!(record.log().len()));
        vars.insert("handlers_used".into(), json!(handlers));
        vars.insert("error_count".into(), json!(record.errors().len()));
        vars.insert("warning_count".into(), json!(record.warnings().len()));
        if let Some(last) = record.errors().last() {
            vars.insert("error_message".into(), json!(last.text));
        }

        for (k, v) in &ctx.vars {
            vars.insert(k.clone(), json!(v));
        }
        for (k, v) in extra {
            vars.insert(k.clone(), v.clone());
        }
        vars
    }
}

impl Default for NotificationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationStage")
            .field("channels", &self.channel_names())
            .field("default_channels", &self.default_channels)
            .finish()
    }
}

impl Stage for NotificationStage {
    fn kind(&self) -> RequestKind {
        RequestKind::Notification
    }

    fn name(&self) -> &str {
        NAME
    }

    fn apply<'a>(&'a self, ctx: &'a ExecCtx, record: &'a mut Record) -> BoxFut<'a, StageResult<()>> {
        Box::pin(async move {
            let raw: Map<String, Value> = match record.config("notification_config") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            let config: NotificationConfig = serde_json::from_value(Value::Object(raw.clone()))?;
            let channels = match config.channels {
                Some(ChannelList::One(name)) => vec![name],
                Some(ChannelList::Many(names)) => names,
                None => self.default_channels.clone(),
            };

            let template = config.template.unwrap_or_else(|| config.kind.template());
            let variables = Self::variables(ctx, record, &config.variables);
            let content = NotificationContent {
                kind: config.kind,
                subject: template::render(&template.subject, &variables),
                body: template::render(&template.body, &variables),
                html_body: template::render(&template.html_body, &variables),
                variables,
                priority: config.priority,
                timestamp: Utc::now().to_rfc3339(),
            };

            let mut results = Vec::with_capacity(channels.len());
            let mut sent = 0usize;
            for name in &channels {
                let outcome = match self.channels.get(name) {
                    Some(channel) => channel.send(&content, &raw).await,
                    None => Err(anyhow::anyhow!("unsupported channel: {}", name)),
                };
                let sent_at = Utc::now().to_rfc3339();
                match outcome {
                    Ok(result) => {
                        sent += 1;
                        record.info(NAME, format!("sent via {}", name));
                        results.push(json!({
                            "channel": name,
                            "status": "success",
                            "result": result,
                            "sent_at": sent_at,
                        }));
                    }
                    Err(e) => {
                        warn!(run_id = %ctx.run_id, channel = %name, error = %e, "notification channel failed");
                        record.add_warning(NAME, format!("{} delivery failed: {}", name, e));
                        results.push(json!({
                            "channel": name,
                            "status": "failed",
                            "error": e.to_string(),
                            "sent_at": sent_at,
                        }));
                    }
                }
            }

            let failed = results.len() - sent;
            debug!(sent, failed, "notification done");
            record.insert_derived(
                DerivedKey::NotificationResult,
                json!({
                    "type": config.kind.as_str(),
                    "channels": channels,
                    "results": results,
                    "success_count": sent,
                    "failed_count": failed,
                    "content": content,
                    "config": raw,
                }),
            );
            record.info(NAME, format!("notified via {} of {} channels", sent, channels.len()));
            Ok(())
        })
    }
}
