//! Notification channels.
//!
//! Each channel kind implements [`AlertChannel`] against the per-channel
//! `config` record stored with the user's channel row. Delivery is judged
//! independently per channel; the dispatcher counts successes and failures
//! and never retries within a single dispatch.

pub mod email;
pub mod slack;
pub mod teams;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ChannelError;
use crate::render::RenderedAlert;

/// The channel kinds in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Email,
    Teams,
    Slack,
}

impl ChannelKind {
    /// Parse the `channel_type` column value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email" => Some(Self::Email),
            "teams" => Some(Self::Teams),
            "slack" => Some(Self::Slack),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Teams => "teams",
            Self::Slack => "slack",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery transport for one channel kind.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// The kind this transport serves.
    fn kind(&self) -> ChannelKind;

    /// Deliver a rendered alert using the channel's stored config record.
    async fn deliver(&self, alert: &RenderedAlert, config: &JsonValue)
        -> Result<(), ChannelError>;
}

/// Extract a required string field from a channel config record.
pub(crate) fn config_str(config: &JsonValue, field: &str) -> Result<String, ChannelError> {
    config
        .get(field)
        .and_then(JsonValue::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| ChannelError::InvalidConfig(format!("missing `{field}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_kinds() {
        assert_eq!(ChannelKind::parse("email"), Some(ChannelKind::Email));
        assert_eq!(ChannelKind::parse("teams"), Some(ChannelKind::Teams));
        assert_eq!(ChannelKind::parse("slack"), Some(ChannelKind::Slack));
        assert_eq!(ChannelKind::parse("discord"), None);
    }

    #[test]
    fn config_str_reports_missing_fields() {
        let config = serde_json::json!({ "webhook_url": "https://hooks.test/x" });
        assert_eq!(
            config_str(&config, "webhook_url").unwrap(),
            "https://hooks.test/x"
        );
        assert!(config_str(&config, "email").is_err());
    }
}
