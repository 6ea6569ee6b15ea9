//! Slack webhook notification channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

use super::{config_str, AlertChannel, ChannelKind};
use crate::error::ChannelError;
use crate::render::RenderedAlert;

/// Slack webhook channel. The webhook URL comes from the stored channel
/// config, not the environment; one transport serves every Slack channel row.
pub struct SlackChannel {
    client: Client,
}

impl SlackChannel {
    pub fn new() -> Result<Self, ChannelError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client })
    }

    fn format_payload(alert: &RenderedAlert) -> SlackPayload {
        let color = if alert.relevance_score >= 80 {
            "danger"
        } else {
            "warning"
        };

        SlackPayload {
            text: format!("*{}*", alert.title),
            attachments: vec![SlackAttachment {
                color: color.to_string(),
                fields: vec![
                    SlackField {
                        title: "Message".to_string(),
                        value: alert.summary.clone(),
                        short: false,
                    },
                    SlackField {
                        title: "Relevance".to_string(),
                        value: format!("{}/100", alert.relevance_score),
                        short: true,
                    },
                    SlackField {
                        title: "Source".to_string(),
                        value: format!("<{}|View Source>", alert.source_url),
                        short: true,
                    },
                    SlackField {
                        title: "Time".to_string(),
                        value: alert.timestamp.clone(),
                        short: true,
                    },
                    SlackField {
                        title: "Dashboard".to_string(),
                        value: format!("<{}|Open Dashboard>", alert.dashboard_url),
                        short: true,
                    },
                ],
            }],
        }
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn deliver(
        &self,
        alert: &RenderedAlert,
        config: &JsonValue,
    ) -> Result<(), ChannelError> {
        let webhook_url = config_str(config, "webhook_url")?;
        let payload = Self::format_payload(alert);

        debug!(channel = "slack", title = %alert.title, "Sending notification");

        let response = self.client.post(&webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(channel = "slack", status = %status, body = %body, "Slack webhook request failed");
            Err(ChannelError::Rejected(format!(
                "Slack returned {status}: {body}"
            )))
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    fields: Vec<SlackField>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> RenderedAlert {
        RenderedAlert {
            title: "Q3 beat".to_string(),
            subject: "Monitoring Alert: Q3 beat".to_string(),
            summary: "Revenue up 12%".to_string(),
            source_url: "https://a.test/x".to_string(),
            relevance_score: 82,
            timestamp: "2026-01-02 03:04:05 UTC".to_string(),
            acknowledge_url: "http://api.test/alerts/x/acknowledge?token=t".to_string(),
            dashboard_url: "http://dash.test".to_string(),
            text_body: String::new(),
            html_body: String::new(),
        }
    }

    #[test]
    fn payload_carries_required_fields() {
        let payload = SlackChannel::format_payload(&sample_alert());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["text"], "*Q3 beat*");
        assert_eq!(json["attachments"][0]["color"], "danger");

        let fields = json["attachments"][0]["fields"].as_array().unwrap();
        let titles: Vec<_> = fields.iter().map(|f| f["title"].as_str().unwrap()).collect();
        assert_eq!(
            titles,
            ["Message", "Relevance", "Source", "Time", "Dashboard"]
        );
    }

    #[test]
    fn lower_scores_use_warning_color() {
        let mut alert = sample_alert();
        alert.relevance_score = 76;
        let payload = SlackChannel::format_payload(&alert);
        assert_eq!(payload.attachments[0].color, "warning");
    }
}
