//! Email delivery through the mail-API collaborator.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

use super::{config_str, AlertChannel, ChannelKind};
use crate::config::MailConfig;
use crate::error::ChannelError;
use crate::render::RenderedAlert;

/// Email channel backed by an HTTP mail API.
pub struct EmailChannel {
    config: MailConfig,
    client: Client,
}

impl EmailChannel {
    /// Create an email channel with the given mail settings.
    pub fn new(config: MailConfig) -> Result<Self, ChannelError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { config, client })
    }

    fn build_payload(&self, alert: &RenderedAlert, to_email: &str) -> MailSendRequest {
        MailSendRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: to_email.to_string(),
                }],
            }],
            from: EmailAddress {
                email: self.config.from_email.clone(),
            },
            subject: alert.subject.clone(),
            content: vec![
                MailContent {
                    content_type: "text/plain".to_string(),
                    value: alert.text_body.clone(),
                },
                MailContent {
                    content_type: "text/html".to_string(),
                    value: alert.html_body.clone(),
                },
            ],
        }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn deliver(
        &self,
        alert: &RenderedAlert,
        config: &JsonValue,
    ) -> Result<(), ChannelError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("MAIL_API_KEY".to_string()))?;
        let to_email = config_str(config, "email")?;

        let payload = self.build_payload(alert, &to_email);

        debug!(channel = "email", to = %to_email, "Sending notification");

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.config.api_base))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(channel = "email", to = %to_email, "Notification sent");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(channel = "email", status = %status, body = %body, "Mail API request failed");
            Err(ChannelError::Rejected(format!(
                "mail API returned {status}: {body}"
            )))
        }
    }
}

// =============================================================================
// Mail API types
// =============================================================================

#[derive(Debug, Serialize)]
struct MailSendRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<MailContent>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
}

#[derive(Debug, Serialize)]
struct MailContent {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}
