//! Row types for the relational store.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// A committed alert row.
#[derive(Debug, Clone, FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_run_id: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub relevance_score: i32,
    pub is_sent: bool,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledgment_token: Option<String>,
    pub repeat_count: i32,
    pub next_repeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to commit a new alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub job_id: Uuid,
    pub job_run_id: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub relevance_score: i32,
}

/// Status of a job run as stored in `job_runs.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification channel row.
#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel_type: String,
    pub config: JsonValue,
    pub is_active: bool,
}

/// The job fields the dispatcher needs to resolve delivery targets.
#[derive(Debug, Clone, FromRow)]
pub struct JobDispatchInfo {
    pub user_id: Uuid,
    pub name: String,
    pub notification_channel_ids: Vec<Uuid>,
}

/// An unacknowledged, sent alert joined with its job's repeat policy.
#[derive(Debug, Clone, FromRow)]
pub struct RepeatCandidate {
    pub alert_id: Uuid,
    pub job_id: Uuid,
    pub job_run_id: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub relevance_score: i32,
    pub acknowledgment_token: Option<String>,
    pub repeat_count: i32,
    pub user_id: Uuid,
    pub repeat_frequency_minutes: i32,
    pub max_repeats: i32,
}
