//! Stage telemetry for the live dashboard.
//!
//! Fire-and-forget: every stage transition spawns a short-lived POST and the
//! task moves on. A broadcast failure is logged at debug level and never
//! surfaced to the pipeline.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::stage::{AnalysisRecord, TaskStage};

/// One stage-transition event as consumed by the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub run_id: String,
    pub job_id: Uuid,
    pub job_name: String,
    pub source_url: String,
    pub current_stage: TaskStage,
    pub completion_percentage: u8,
    pub stage_data: JsonValue,
    pub sources_processed: u32,
    pub sources_total: u32,
    pub alerts_generated: u32,
    /// At most the 10 most recent per-source results.
    pub analysis_details: Vec<AnalysisRecord>,
    pub user_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Broadcasts stage events to the dashboard endpoint.
#[derive(Clone, Debug)]
pub struct TelemetryBroadcaster {
    endpoint: Option<String>,
    client: Client,
}

impl TelemetryBroadcaster {
    /// Create a broadcaster; a `None` dashboard URL disables broadcasting.
    #[must_use]
    pub fn new(dashboard_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: dashboard_url.map(|base| format!("{base}/internal/broadcast")),
            client,
        }
    }

    /// A broadcaster that drops every event (tests, telemetry disabled).
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Emit one event. Returns immediately; the POST happens on a spawned
    /// task and its outcome never propagates.
    pub fn emit(&self, event: StageEvent) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            match client.post(&endpoint).json(&event).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    debug!(
                        status = %response.status(),
                        stage = %event.current_stage,
                        "Telemetry broadcast rejected"
                    );
                }
                Err(e) => {
                    debug!(error = %e, stage = %event.current_stage, "Telemetry broadcast failed");
                }
            }
        });
    }
}
