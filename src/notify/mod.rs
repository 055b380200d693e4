//! Outbound incident alerts.

use crate::config::AlertConfig;
use crate::detect::incident::Incident;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Delivers an alert for a newly opened incident.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, incident: &Incident) -> Result<()>;
}

/// Attachment colour for a severity label.
pub fn severity_color(severity: &str) -> &'static str {
    match severity.to_lowercase().as_str() {
        "high" => "#FF0000",
        "critical" => "#8B0000",
        "medium" => "#FFA500",
        "low" => "#FFFF00",
        _ => "#808080",
    }
}

/// Posts Slack block-kit messages to an incoming webhook.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: Option<String>,
    dashboard_url: String,
    api_base_url: String,
}

impl WebhookNotifier {
    pub fn new(config: &AlertConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone().filter(|u| !u.is_empty()),
            dashboard_url: config.dashboard_url.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn payload(&self, incident: &Incident) -> Value {
        let severity = incident.severity.as_str();
        json!({
            "text": format!("New Incident Detected: #{}", incident.id),
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": format!("Incident #{} Detected", incident.id),
                        "emoji": true
                    }
                },
                {
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*Severity:*\n{}", severity.to_uppercase()) },
                        { "type": "mrkdwn", "text": "*Status:*\nOpen" }
                    ]
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Description:*\n{}", incident.description) }
                },
                {
                    "type": "context",
                    "elements": [
                        {
                            "type": "mrkdwn",
                            "text": format!(
                                "<{}|View in Dashboard> | <{}/api/summary/{}|Get AI Analysis>",
                                self.dashboard_url, self.api_base_url, incident.id
                            )
                        }
                    ]
                }
            ],
            "attachments": [
                {
                    "color": severity_color(severity),
                    "footer": "logpulse incident monitoring",
                    "ts": incident.created_at.timestamp()
                }
            ]
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, incident: &Incident) -> Result<()> {
        let Some(url) = self.webhook_url.as_deref() else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&self.payload(incident))
            .send()
            .await
            .context("Alert webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Alert webhook returned {}", status);
        }
        tracing::debug!(incident = %incident.id, "Alert delivered");
        Ok(())
    }
}
