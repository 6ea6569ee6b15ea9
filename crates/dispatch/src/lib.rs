//! Alert dispatcher.
//!
//! Consumes committed alerts from the `alert_queue` FIFO and delivers them
//! across the owning user's configured notification channels. Delivery is
//! at-least-once: the dedup shield set at commit time protects first
//! deliveries against pipeline races, repeats bypass it deliberately, and a
//! failed channel is never retried within a single dispatch (the re-notifier
//! loop resurfaces acknowledgement-required alerts instead).

pub mod channels;
pub mod config;
pub mod error;
pub mod payload;
pub mod render;

pub use channels::{AlertChannel, ChannelKind};
pub use config::{DispatchConfig, MailConfig};
pub use error::ChannelError;
pub use payload::{generate_acknowledgment_token, AlertPayload};
pub use render::{AlertRenderer, RenderedAlert};

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use channels::{email::EmailChannel, slack::SlackChannel, teams::TeamsChannel};
use store::{Database, Kv};

/// Name of the dispatch FIFO in the KV store.
pub const ALERT_QUEUE: &str = "alert_queue";

/// Per-channel delivery counts for one dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub email: u32,
    pub teams: u32,
    pub slack: u32,
    pub failed: u32,
}

impl DeliveryCounts {
    fn record(&mut self, kind: ChannelKind) {
        match kind {
            ChannelKind::Email => self.email += 1,
            ChannelKind::Teams => self.teams += 1,
            ChannelKind::Slack => self.slack += 1,
        }
    }

    #[must_use]
    pub const fn total_sent(&self) -> u32 {
        self.email + self.teams + self.slack
    }
}

/// The dispatcher loop.
pub struct Dispatcher {
    kv: Kv,
    db: Database,
    renderer: AlertRenderer,
    transports: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
}

impl Dispatcher {
    /// Build a dispatcher with the standard channel transports.
    pub fn new(kv: Kv, db: Database, config: &DispatchConfig) -> Result<Self> {
        let renderer = AlertRenderer::new(config)?;

        let mut transports: HashMap<ChannelKind, Arc<dyn AlertChannel>> = HashMap::new();
        transports.insert(
            ChannelKind::Email,
            Arc::new(EmailChannel::new(config.mail.clone())?),
        );
        transports.insert(ChannelKind::Teams, Arc::new(TeamsChannel::new()?));
        transports.insert(ChannelKind::Slack, Arc::new(SlackChannel::new()?));

        Ok(Self {
            kv,
            db,
            renderer,
            transports,
        })
    }

    /// Consume the alert queue until shutdown. In-flight dispatches complete;
    /// the 1-second queue timeout bounds how long shutdown takes to observe.
    pub async fn run_forever(&self, shutdown: CancellationToken) {
        info!("Alert dispatcher started");

        while !shutdown.is_cancelled() {
            let raw = match self.kv.pop_blocking(ALERT_QUEUE, Duration::from_secs(1)).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to read alert queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let payload: AlertPayload = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "Discarding malformed alert payload");
                    continue;
                }
            };

            if let Err(e) = self.dispatch(&payload).await {
                error!(
                    alert_id = %payload.alert_id,
                    job_id = %payload.job_id,
                    error = %e,
                    "Failed to dispatch alert"
                );
            }
        }

        info!("Alert dispatcher stopped");
    }

    /// Process one queue payload end to end.
    pub async fn dispatch(&self, payload: &AlertPayload) -> Result<DeliveryCounts> {
        info!(
            alert_id = %payload.alert_id,
            job_id = %payload.job_id,
            title = %payload.title,
            repeat = payload.repeat,
            "Processing alert"
        );

        // Reuse the row's token or mint one so the acknowledgement link is
        // stable across deliveries.
        let token = match &payload.acknowledgment_token {
            Some(token) => token.clone(),
            None => {
                let token = generate_acknowledgment_token();
                self.db
                    .set_acknowledgment_token(payload.alert_id, &token)
                    .await
                    .context("Failed to persist acknowledgment token")?;
                token
            }
        };

        // Resolve the job's channel set, restricted to the user's active rows.
        let Some(job) = self.db.job_dispatch_info(payload.job_id).await? else {
            warn!(job_id = %payload.job_id, "No job found for alert, skipping");
            return Ok(DeliveryCounts::default());
        };
        let channel_rows = self
            .db
            .active_channels(job.user_id, &job.notification_channel_ids)
            .await?;
        if channel_rows.is_empty() {
            warn!(
                job_id = %payload.job_id,
                user_id = %job.user_id,
                "No active notification channels configured, skipping"
            );
            return Ok(DeliveryCounts::default());
        }

        // Duplicate shield. The dedup key is written at commit time with the
        // committed alert's id as its value; a key held by a different alert
        // means this (job, source, hour) tuple was already processed. Mark
        // such payloads processed without re-delivering. Repeats are
        // deliberate re-sends and skip the check.
        if !payload.repeat {
            let hour = payload.timestamp.format("%Y-%m-%d-%H");
            let shield_key = format!(
                "content_dedup:{}:{}:{hour}",
                payload.job_id, payload.source_url
            );
            let duplicate = match self.kv.get(&shield_key).await {
                Ok(Some(holder)) => holder != payload.alert_id.to_string(),
                Ok(None) => false,
                Err(e) => {
                    warn!(error = %e, "Dedup shield unavailable, delivering anyway");
                    false
                }
            };
            if duplicate {
                debug!(alert_id = %payload.alert_id, "Duplicate alert, marking processed");
                self.db.mark_alert_sent(payload.alert_id).await?;
                return Ok(DeliveryCounts::default());
            }
        }

        let rendered = self.renderer.render(payload, &token)?;

        // Deliver per channel; each delivery is judged independently.
        let mut counts = DeliveryCounts::default();
        for row in &channel_rows {
            let Some(kind) = ChannelKind::parse(&row.channel_type) else {
                warn!(channel_type = %row.channel_type, "Unknown channel type, skipping");
                continue;
            };
            let Some(transport) = self.transports.get(&kind) else {
                continue;
            };

            match transport.deliver(&rendered, &row.config).await {
                Ok(()) => counts.record(kind),
                Err(e) => {
                    counts.failed += 1;
                    warn!(
                        channel = %kind,
                        alert_id = %payload.alert_id,
                        error = %e,
                        "Channel delivery failed"
                    );
                }
            }
        }

        // "Sent" means processed: any successful channel flips the flag.
        if counts.total_sent() > 0 {
            self.db.mark_alert_sent(payload.alert_id).await?;
        }

        self.record_processed(payload, &counts).await;

        info!(
            alert_id = %payload.alert_id,
            email = counts.email,
            teams = counts.teams,
            slack = counts.slack,
            failed = counts.failed,
            "Alert processed"
        );

        Ok(counts)
    }

    /// Operational record of the dispatch outcome, keyed by run.
    async fn record_processed(&self, payload: &AlertPayload, counts: &DeliveryCounts) {
        let key = format!("processed_alert:{}", payload.job_run_id);
        let fields = [
            ("job_id", payload.job_id.to_string()),
            ("title", payload.title.clone()),
            ("processed_at", Utc::now().to_rfc3339()),
            ("email_sent", counts.email.to_string()),
            ("teams_sent", counts.teams.to_string()),
            ("slack_sent", counts.slack.to_string()),
            ("relevance_score", payload.relevance_score.to_string()),
        ];
        if let Err(e) = self.kv.put_hash(&key, &fields).await {
            warn!(error = %e, "Could not store processed alert record");
        }
    }
}
