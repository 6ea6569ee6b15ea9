//! Job definitions as observed from the registry.
//!
//! The scheduler is a read-only observer of jobs: definitions are created and
//! mutated through the external API, and decoded here with serde defaults for
//! the policy knobs older definitions predate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-defined monitoring job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Ordered source URLs; duplicates tolerated.
    pub sources: Vec<String>,
    pub prompt: String,
    pub frequency_minutes: u32,
    pub threshold_score: i32,
    pub is_active: bool,
    #[serde(default)]
    pub notification_channel_ids: Vec<Uuid>,
    #[serde(default = "default_cooldown_minutes")]
    pub alert_cooldown_minutes: u32,
    #[serde(default = "default_max_alerts_per_hour")]
    pub max_alerts_per_hour: u32,
    #[serde(default = "default_repeat_frequency_minutes")]
    pub repeat_frequency_minutes: u32,
    #[serde(default = "default_max_repeats")]
    pub max_repeats: u32,
    #[serde(default = "default_require_acknowledgment")]
    pub require_acknowledgment: bool,
}

const fn default_cooldown_minutes() -> u32 {
    60
}
const fn default_max_alerts_per_hour() -> u32 {
    5
}
const fn default_repeat_frequency_minutes() -> u32 {
    60
}
const fn default_max_repeats() -> u32 {
    5
}
const fn default_require_acknowledgment() -> bool {
    true
}

impl Job {
    /// Threshold clamped to the valid score range.
    #[must_use]
    pub fn threshold(&self) -> i32 {
        self.threshold_score.clamp(0, 100)
    }

    /// Derive one task per source for a run.
    #[must_use]
    pub fn tasks(&self, run_id: &str) -> Vec<SourceTask> {
        self.sources
            .iter()
            .map(|source_url| SourceTask {
                run_id: run_id.to_string(),
                job_id: self.id,
                job_name: self.name.clone(),
                user_id: self.user_id,
                source_url: source_url.clone(),
                prompt: self.prompt.clone(),
                threshold_score: self.threshold(),
                alert_cooldown_minutes: self.alert_cooldown_minutes,
                max_alerts_per_hour: self.max_alerts_per_hour,
            })
            .collect()
    }
}

/// A single (run, source) unit of work. Lives only for the duration of the
/// run; never persisted.
#[derive(Debug, Clone)]
pub struct SourceTask {
    pub run_id: String,
    pub job_id: Uuid,
    pub job_name: String,
    pub user_id: Uuid,
    pub source_url: String,
    pub prompt: String,
    pub threshold_score: i32,
    pub alert_cooldown_minutes: u32,
    pub max_alerts_per_hour: u32,
}

/// Entry shape of the immediate-run queue (`job_queue`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImmediateRunRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub action: String,
}

/// Mint a fresh run id.
#[must_use]
pub fn new_run_id(job_id: Uuid) -> String {
    format!("run_{job_id}_{}", Utc::now().timestamp())
}
