//! Error types for notification delivery.

use thiserror::Error;

/// Errors that can occur when delivering an alert through a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("channel not configured: {0}")]
    NotConfigured(String),

    /// The stored channel config is missing a required field
    #[error("invalid channel config: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The remote service rejected the delivery
    #[error("{0}")]
    Rejected(String),
}
