//! The per-task stage machine.
//!
//! Stages form a closed set with a fixed completion-percentage table consumed
//! by the live dashboard. Telemetry payloads are records over this enum, not
//! free-form strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One named step of the per-task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Initializing,
    Scraping,
    ScrapingComplete,
    Analyzing,
    AnalysisComplete,
    AlertEvaluation,
    CreatingAlert,
    AlertCreated,
    AlertSuppressed,
    BelowThreshold,
    Finalizing,
    Completed,
    Failed,
}

impl TaskStage {
    /// Dashboard completion percentage for this stage.
    #[must_use]
    pub const fn percentage(self) -> u8 {
        match self {
            Self::Initializing => 10,
            Self::Scraping => 25,
            Self::ScrapingComplete => 40,
            Self::Analyzing => 55,
            Self::AnalysisComplete => 70,
            Self::AlertEvaluation => 80,
            Self::CreatingAlert => 85,
            Self::AlertCreated | Self::AlertSuppressed | Self::BelowThreshold => 90,
            Self::Finalizing => 95,
            Self::Completed | Self::Failed => 100,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Scraping => "scraping",
            Self::ScrapingComplete => "scraping_complete",
            Self::Analyzing => "analyzing",
            Self::AnalysisComplete => "analysis_complete",
            Self::AlertEvaluation => "alert_evaluation",
            Self::CreatingAlert => "creating_alert",
            Self::AlertCreated => "alert_created",
            Self::AlertSuppressed => "alert_suppressed",
            Self::BelowThreshold => "below_threshold",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one source task.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    AlertCreated { alert_id: Uuid, score: i32 },
    Suppressed { reason: &'static str, score: i32 },
    BelowThreshold { score: i32 },
    Failed { stage: TaskStage, error: String },
}

impl SourceOutcome {
    /// Whether this outcome committed an alert.
    #[must_use]
    pub const fn generated_alert(&self) -> bool {
        matches!(self, Self::AlertCreated { .. })
    }

    /// Build the analysis-summary entry for this outcome.
    #[must_use]
    pub fn to_record(&self, source_url: &str, title: Option<String>) -> AnalysisRecord {
        let mut record = AnalysisRecord {
            source_url: source_url.to_string(),
            score: None,
            title,
            outcome: String::new(),
            suppressed_reason: None,
            below_threshold: false,
            error: None,
            recorded_at: Utc::now(),
        };

        match self {
            Self::AlertCreated { score, .. } => {
                record.score = Some(*score);
                record.outcome = "alert_created".to_string();
            }
            Self::Suppressed { reason, score } => {
                record.score = Some(*score);
                record.outcome = "alert_suppressed".to_string();
                record.suppressed_reason = Some((*reason).to_string());
            }
            Self::BelowThreshold { score } => {
                record.score = Some(*score);
                record.outcome = "below_threshold".to_string();
                record.below_threshold = true;
            }
            Self::Failed { stage, error } => {
                record.outcome = "failed".to_string();
                record.error = Some(format!("{stage}: {error}"));
            }
        }

        record
    }
}

/// One entry of a run's analysis summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed_reason: Option<String>,
    #[serde(default)]
    pub below_threshold: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
