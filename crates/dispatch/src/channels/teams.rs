//! Microsoft Teams webhook notification channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

use super::{config_str, AlertChannel, ChannelKind};
use crate::error::ChannelError;
use crate::render::RenderedAlert;

/// Teams webhook channel delivering MessageCard payloads.
pub struct TeamsChannel {
    client: Client,
}

impl TeamsChannel {
    pub fn new() -> Result<Self, ChannelError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client })
    }

    fn format_payload(alert: &RenderedAlert) -> MessageCard {
        MessageCard {
            card_type: "MessageCard".to_string(),
            context: "https://schema.org/extensions".to_string(),
            summary: alert.title.clone(),
            theme_color: "FF6B35".to_string(),
            sections: vec![CardSection {
                activity_title: "Monitoring Alert".to_string(),
                activity_subtitle: alert.title.clone(),
                activity_text: alert.summary.clone(),
                facts: vec![
                    CardFact {
                        name: "Relevance".to_string(),
                        value: format!("{}/100", alert.relevance_score),
                    },
                    CardFact {
                        name: "Source".to_string(),
                        value: alert.source_url.clone(),
                    },
                    CardFact {
                        name: "Time".to_string(),
                        value: alert.timestamp.clone(),
                    },
                ],
            }],
            potential_action: vec![
                CardAction {
                    action_type: "OpenUri".to_string(),
                    name: "View Source".to_string(),
                    targets: vec![ActionTarget {
                        os: "default".to_string(),
                        uri: alert.source_url.clone(),
                    }],
                },
                CardAction {
                    action_type: "OpenUri".to_string(),
                    name: "Open Dashboard".to_string(),
                    targets: vec![ActionTarget {
                        os: "default".to_string(),
                        uri: alert.dashboard_url.clone(),
                    }],
                },
            ],
        }
    }
}

#[async_trait]
impl AlertChannel for TeamsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Teams
    }

    async fn deliver(
        &self,
        alert: &RenderedAlert,
        config: &JsonValue,
    ) -> Result<(), ChannelError> {
        let webhook_url = config_str(config, "webhook_url")?;
        let payload = Self::format_payload(alert);

        debug!(channel = "teams", title = %alert.title, "Sending notification");

        let response = self.client.post(&webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "teams", "Notification sent");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(channel = "teams", status = %status, body = %body, "Teams webhook request failed");
            Err(ChannelError::Rejected(format!(
                "Teams returned {status}: {body}"
            )))
        }
    }
}

// =============================================================================
// Teams MessageCard types
// =============================================================================

#[derive(Debug, Serialize)]
struct MessageCard {
    #[serde(rename = "@type")]
    card_type: String,
    #[serde(rename = "@context")]
    context: String,
    summary: String,
    #[serde(rename = "themeColor")]
    theme_color: String,
    sections: Vec<CardSection>,
    #[serde(rename = "potentialAction")]
    potential_action: Vec<CardAction>,
}

#[derive(Debug, Serialize)]
struct CardSection {
    #[serde(rename = "activityTitle")]
    activity_title: String,
    #[serde(rename = "activitySubtitle")]
    activity_subtitle: String,
    #[serde(rename = "activityText")]
    activity_text: String,
    facts: Vec<CardFact>,
}

#[derive(Debug, Serialize)]
struct CardFact {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct CardAction {
    #[serde(rename = "@type")]
    action_type: String,
    name: String,
    targets: Vec<ActionTarget>,
}

#[derive(Debug, Serialize)]
struct ActionTarget {
    os: String,
    uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_is_channel_native() {
        let alert = RenderedAlert {
            title: "Q3 beat".to_string(),
            subject: "Monitoring Alert: Q3 beat".to_string(),
            summary: "Revenue up 12%".to_string(),
            source_url: "https://a.test/x".to_string(),
            relevance_score: 82,
            timestamp: "2026-01-02 03:04:05 UTC".to_string(),
            acknowledge_url: String::new(),
            dashboard_url: "http://dash.test".to_string(),
            text_body: String::new(),
            html_body: String::new(),
        };

        let json = serde_json::to_value(TeamsChannel::format_payload(&alert)).unwrap();
        assert_eq!(json["@type"], "MessageCard");
        assert_eq!(json["@context"], "https://schema.org/extensions");
        assert_eq!(json["sections"][0]["activitySubtitle"], "Q3 beat");
        assert_eq!(json["potentialAction"][0]["@type"], "OpenUri");
    }
}
