//! Delivery channels.
//!
//! A [`Channel`] takes a rendered [`NotificationContent`] plus the raw
//! `notification_config` block (for recipients, URLs and the like) and
//! reports what it delivered. Everything except a webhook with an HTTP
//! client attached is simulated: the result describes the message that
//! would have been sent.

use super::NotificationContent;
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_WEBHOOK_URL: &str = "https://example.com/webhook";
const SMS_LIMIT: usize = 160;
const PUSH_LIMIT: usize = 100;

/// A notification transport.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Channel>`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Token callers use in `channels` to pick this transport.
    fn name(&self) -> &str;

    /// Deliver one message. The returned value is stored verbatim in the
    /// per-channel result.
    async fn send(&self, content: &NotificationContent, config: &Map<String, Value>) -> anyhow::Result<Value>;
}

/// Transports that are simulated locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedKind {
    Email,
    Sms,
    Slack,
    Discord,
    Teams,
    Push,
}

impl SimulatedKind {
    pub const ALL: [SimulatedKind; 6] = [
        SimulatedKind::Email,
        SimulatedKind::Sms,
        SimulatedKind::Slack,
        SimulatedKind::Discord,
        SimulatedKind::Teams,
        SimulatedKind::Push,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimulatedKind::Email => "email",
            SimulatedKind::Sms => "sms",
            SimulatedKind::Slack => "slack",
            SimulatedKind::Discord => "discord",
            SimulatedKind::Teams => "teams",
            SimulatedKind::Push => "push",
        }
    }
}

fn config_or(config: &Map<String, Value>, key: &str, default: Value) -> Value {
    config.get(key).cloned().unwrap_or(default)
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn message_id(prefix: &str) -> String {
    format!("{}_{}_{}", prefix, Utc::now().timestamp(), fastrand::u32(1000..=9999))
}

/// Fail with probability `rate`.
fn inject_failure(rate: f64) -> anyhow::Result<()> {
    if rate > 0.0 && fastrand::f64() < rate {
        bail!("simulated delivery failure");
    }
    Ok(())
}

/// A locally simulated channel with an optional random failure rate.
#[derive(Debug, Clone)]
pub struct SimulatedChannel {
    kind: SimulatedKind,
    failure_rate: f64,
}

impl SimulatedChannel {
    pub fn new(kind: SimulatedKind) -> Self {
        Self { kind, failure_rate: 0.0 }
    }

    /// Probability in `0.0..=1.0` that a send fails.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn deliver(&self, content: &NotificationContent, config: &Map<String, Value>) -> Value {
        let now = Utc::now().to_rfc3339();
        let kind = content.kind;
        match self.kind {
            SimulatedKind::Email => json!({
                "message_id": message_id("email"),
                "recipients": config_or(config, "recipients", json!(["admin@example.com"])),
                "sender": config_or(config, "sender", json!("noreply@example.com")),
                "subject": content.subject,
                "delivery_status": "sent",
                "delivery_time": now,
            }),
            SimulatedKind::Sms => {
                let body = truncate(&content.body, SMS_LIMIT);
                json!({
                    "message_id": message_id("sms"),
                    "recipients": config_or(config, "phone_numbers", json!(["+1234567890"])),
                    "character_count": body.chars().count(),
                    "body": body,
                    "delivery_status": "sent",
                    "delivery_time": now,
                })
            }
            SimulatedKind::Slack => {
                let channel = config_or(config, "slack_channel", json!("#general"));
                json!({
                    "channel": channel,
                    "message": {
                        "channel": channel,
                        "username": config_or(config, "slack_username", json!("PipelineBot")),
                        "text": content.subject,
                        "attachments": [{
                            "color": kind.slack_color(),
                            "fields": [
                                {"title": "Message", "value": content.body, "short": false},
                                {"title": "Timestamp", "value": content.timestamp, "short": true},
                            ],
                        }],
                    },
                    "delivery_status": "sent",
                    "delivery_time": now,
                })
            }
            SimulatedKind::Discord => json!({
                "channel_id": config_or(config, "discord_channel_id", json!("123456789")),
                "embed": {
                    "title": content.subject,
                    "description": content.body,
                    "color": kind.discord_color(),
                    "timestamp": content.timestamp,
                    "footer": {"text": "record-pipeline"},
                },
                "delivery_status": "sent",
                "delivery_time": now,
                "message_id": message_id("discord"),
            }),
            SimulatedKind::Teams => json!({
                "webhook_url": config_or(config, "teams_webhook_url", json!("https://outlook.office.com/webhook/...")),
                "card": {
                    "@type": "MessageCard",
                    "@context": "http://schema.org/extensions",
                    "themeColor": kind.teams_color(),
                    "summary": content.subject,
                    "sections": [{
                        "activityTitle": content.subject,
                        "activitySubtitle": content.timestamp,
                        "text": content.body,
                        "facts": [
                            {"name": "Priority", "value": content.priority},
                            {"name": "Timestamp", "value": content.timestamp},
                        ],
                    }],
                },
                "delivery_status": "sent",
                "delivery_time": now,
            }),
            SimulatedKind::Push => json!({
                "device_tokens": config_or(config, "device_tokens", json!(["token1", "token2"])),
                "payload": {
                    "title": content.subject,
                    "body": truncate(&content.body, PUSH_LIMIT),
                    "badge": 1,
                    "sound": "default",
                    "data": {"timestamp": content.timestamp, "priority": content.priority},
                },
                "delivery_status": "sent",
                "delivery_time": now,
                "push_id": message_id("push"),
            }),
        }
    }
}

#[async_trait]
impl Channel for SimulatedChannel {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn send(&self, content: &NotificationContent, config: &Map<String, Value>) -> anyhow::Result<Value> {
        inject_failure(self.failure_rate)?;
        Ok(self.deliver(content, config))
    }
}

/// Posts the notification as JSON to `webhook_url`.
///
/// Without a client the request is simulated (a `200` response is
/// reported). The URL must be `http(s)` either way.
#[derive(Debug, Clone, Default)]
pub struct WebhookChannel {
    client: Option<Client>,
    failure_rate: f64,
}

impl WebhookChannel {
    /// Simulated webhook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live webhook using `client`.
    pub fn with_client(client: Client) -> Self {
        Self {
            client: Some(client),
            failure_rate: 0.0,
        }
    }

    /// Probability that a simulated send fails. Ignored for live sends.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn is_live(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, content: &NotificationContent, config: &Map<String, Value>) -> anyhow::Result<Value> {
        let url = config
            .get("webhook_url")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_WEBHOOK_URL);
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("invalid webhook url '{}'", url);
        }

        let body = json!({
            "notification": content,
            "timestamp": Utc::now().to_rfc3339(),
            "source": "record-pipeline",
        });

        let start = Instant::now();
        let status = match &self.client {
            Some(client) => {
                let resp = client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .with_context(|| format!("failed to reach webhook at {}", url))?;
                let status = resp.status().as_u16();
                if !resp.status().is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    bail!("webhook returned HTTP {}: {}", status, text);
                }
                status
            }
            None => {
                inject_failure(self.failure_rate)?;
                200
            }
        };

        Ok(json!({
            "webhook_url": url,
            "payload": body,
            "response_code": status,
            "response_time_ms": start.elapsed().as_millis() as u64,
            "delivery_status": "success",
            "delivery_time": Utc::now().to_rfc3339(),
        }))
    }
}

/// The default channel set: six simulated transports plus a simulated webhook.
pub fn builtin_channels(failure_rate: f64) -> Vec<Arc<dyn Channel>> {
    let mut channels: Vec<Arc<dyn Channel>> = SimulatedKind::ALL
        .into_iter()
        .map(|kind| Arc::new(SimulatedChannel::new(kind).with_failure_rate(failure_rate)) as Arc<dyn Channel>)
        .collect();
    channels.push(Arc::new(WebhookChannel::new().with_failure_rate(failure_rate)));
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::notification::NotificationType;

    fn content(body: &str) -> NotificationContent {
        NotificationContent {
            kind: NotificationType::Error,
            subject: "Subject".into(),
            body: body.into(),
            html_body: String::new(),
            variables: Map::new(),
            priority: "high".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_sms_truncates_body() {
        let long = "x".repeat(300);
        let out = SimulatedChannel::new(SimulatedKind::Sms)
            .send(&content(&long), &Map::new())
            .await
            .unwrap();
        assert_eq!(out["character_count"], 160);
        assert_eq!(out["recipients"], json!(["+1234567890"]));
    }

    #[tokio::test]
    async fn test_slack_uses_type_colour_and_config() {
        let mut config = Map::new();
        config.insert("slack_channel".into(), json!("#ops"));
        let out = SimulatedChannel::new(SimulatedKind::Slack)
            .send(&content("body"), &config)
            .await
            .unwrap();
        assert_eq!(out["channel"], "#ops");
        assert_eq!(out["message"]["attachments"][0]["color"], "danger");
    }

    #[tokio::test]
    async fn test_certain_failure_rate() {
        let err = SimulatedChannel::new(SimulatedKind::Email)
            .with_failure_rate(1.0)
            .send(&content("body"), &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "simulated delivery failure");
    }

    #[tokio::test]
    async fn test_webhook_simulated_and_bad_url() {
        let hook = WebhookChannel::new();
        assert!(!hook.is_live());
        let out = hook.send(&content("body"), &Map::new()).await.unwrap();
        assert_eq!(out["response_code"], 200);
        assert_eq!(out["webhook_url"], DEFAULT_WEBHOOK_URL);

        let mut config = Map::new();
        config.insert("webhook_url".into(), json!("ftp://nowhere"));
        let err = hook.send(&content("body"), &config).await.unwrap_err();
        assert!(err.to_string().contains("invalid webhook url"));
    }

    #[test]
    fn test_builtin_channel_names() {
        let names: Vec<String> = builtin_channels(0.0).iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["email", "sms", "slack", "discord", "teams", "push", "webhook"]);
    }
}
