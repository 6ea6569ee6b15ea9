//! Alert payload rendering.
//!
//! One render per dispatch: the email bodies come from embedded Handlebars
//! templates, the webhook channels build their card payloads from the same
//! [`RenderedAlert`] fields.

use anyhow::Result;
use handlebars::Handlebars;
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::payload::AlertPayload;

/// A channel-independent rendering of one alert delivery.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedAlert {
    pub title: String,
    pub subject: String,
    pub summary: String,
    pub source_url: String,
    pub relevance_score: i32,
    pub timestamp: String,
    pub acknowledge_url: String,
    pub dashboard_url: String,
    pub text_body: String,
    pub html_body: String,
}

/// Renders queue payloads into deliverable content.
pub struct AlertRenderer {
    handlebars: Handlebars<'static>,
    api_url: String,
    dashboard_url: String,
}

impl AlertRenderer {
    /// Create a renderer with the embedded templates registered.
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_template_string("alert_text", TEXT_TEMPLATE)?;
        handlebars.register_template_string("alert_html", HTML_TEMPLATE)?;

        Ok(Self {
            handlebars,
            api_url: config.api_url.clone(),
            dashboard_url: config.dashboard_url.clone(),
        })
    }

    /// Render an alert payload for delivery.
    pub fn render(&self, payload: &AlertPayload, ack_token: &str) -> Result<RenderedAlert> {
        let acknowledge_url = format!(
            "{}/alerts/{}/acknowledge?token={ack_token}",
            self.api_url, payload.alert_id
        );
        let timestamp = payload.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string();

        let data = serde_json::json!({
            "title": payload.title,
            "summary": payload.content,
            "source_url": payload.source_url,
            "relevance_score": payload.relevance_score,
            "timestamp": timestamp,
            "acknowledge_url": acknowledge_url,
            "dashboard_url": self.dashboard_url,
        });

        let text_body = self.handlebars.render("alert_text", &data)?;
        let html_body = self.handlebars.render("alert_html", &data)?;

        Ok(RenderedAlert {
            title: payload.title.clone(),
            subject: format!("Monitoring Alert: {}", payload.title),
            summary: payload.content.clone(),
            source_url: payload.source_url.clone(),
            relevance_score: payload.relevance_score,
            timestamp,
            acknowledge_url,
            dashboard_url: self.dashboard_url.clone(),
            text_body,
            html_body,
        })
    }
}

/// Plain-text email body.
const TEXT_TEMPLATE: &str = r"MONITORING ALERT - {{title}}

Relevance score: {{relevance_score}}/100
Source: {{source_url}}
Time: {{timestamp}}

{{summary}}

Acknowledge this alert:
{{acknowledge_url}}

Dashboard: {{dashboard_url}}

This alert was generated by your monitoring jobs. Manage sources,
thresholds, and notification channels from the dashboard.
";

/// HTML email body.
const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; color: #1f2937; background-color: #f8f9fa; padding: 20px;">
  <div style="max-width: 600px; margin: 0 auto; background-color: white; border-radius: 8px; padding: 24px;">
    <h1 style="margin: 0 0 4px 0; font-size: 22px; color: #111827;">Monitoring Alert</h1>
    <p style="margin: 0 0 16px 0; color: #6b7280;">{{title}}</p>

    <p style="margin: 16px 0;">
      <span style="display: inline-block; background-color: #2563eb; color: white; padding: 6px 16px; border-radius: 16px; font-weight: bold;">
        Relevance: {{relevance_score}}/100
      </span>
    </p>

    <table style="width: 100%; border-collapse: collapse; margin: 16px 0;">
      <tr>
        <td style="padding: 6px 0; color: #6b7280; width: 30%;">Source</td>
        <td style="padding: 6px 0;"><a href="{{source_url}}" style="color: #2563eb;">{{source_url}}</a></td>
      </tr>
      <tr>
        <td style="padding: 6px 0; color: #6b7280;">Time</td>
        <td style="padding: 6px 0;">{{timestamp}}</td>
      </tr>
    </table>

    <div style="background-color: #f3f4f6; border-left: 4px solid #2563eb; border-radius: 4px; padding: 14px; margin: 16px 0;">
      <p style="margin: 0; line-height: 1.6;">{{summary}}</p>
    </div>

    <p style="text-align: center; margin: 24px 0;">
      <a href="{{acknowledge_url}}"
         style="display: inline-block; background-color: #16a34a; color: white; padding: 12px 28px; border-radius: 22px; text-decoration: none; font-weight: bold;">
        Acknowledge Alert
      </a>
    </p>

    <p style="color: #6b7280; font-size: 12px; text-align: center; margin: 16px 0 0 0;">
      <a href="{{dashboard_url}}" style="color: #2563eb;">Dashboard</a> ·
      generated by your monitoring jobs
    </p>
  </div>
</body>
</html>
"#;
