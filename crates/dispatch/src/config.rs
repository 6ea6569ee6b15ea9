//! Dispatcher configuration from the environment.

/// Configuration for alert delivery.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Base URL of the user-facing API, used for acknowledgement links.
    pub api_url: String,
    /// Base URL of the dashboard, linked from every notification.
    pub dashboard_url: String,
    /// Mail API settings.
    pub mail: MailConfig,
}

/// Mail-API collaborator settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// API key; email delivery is disabled when unset.
    pub api_key: Option<String>,
    /// Base URL of the mail API.
    pub api_base: String,
    /// Sender address.
    pub from_email: String,
}

impl DispatchConfig {
    /// Build from environment variables, with local-stack defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_url: env_or("API_URL", "http://localhost:8000"),
            dashboard_url: env_or("DASHBOARD_URL", "http://localhost:3000"),
            mail: MailConfig::from_env(),
        }
    }
}

impl MailConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("MAIL_API_KEY").ok(),
            api_base: env_or("MAIL_API_BASE", "https://api.sendgrid.com"),
            from_email: env_or("MAIL_FROM_EMAIL", "alerts@localhost"),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
