//! The per-source task pipeline.
//!
//! Drives one (run, source) task through the stage machine: scrape →
//! analyze → decide → persist → enqueue, broadcasting telemetry after every
//! transition. Each task is purely sequential; concurrency lives in the
//! scheduler's fan-out. A failure at any stage lands the task in `failed`
//! with the stage annotated, without aborting sibling tasks.

use anyhow::anyhow;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value as JsonValue};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use dispatch::{AlertPayload, ALERT_QUEUE};
use store::db::models::NewAlert;
use store::docs::{AnalysisDocument, SourceDocument};
use store::{Database, DocumentStore, Kv};

use crate::analyze::{Analysis, AnalyzerClient};
use crate::job::SourceTask;
use crate::policy::PolicyEngine;
use crate::scrape::ScraperClient;
use crate::stage::{SourceOutcome, TaskStage};
use crate::telemetry::{StageEvent, TelemetryBroadcaster};
use crate::tracker::RunTracker;

/// Content preview length broadcast after scraping.
const PREVIEW_CHARS: usize = 500;

/// Delay before scraping, for dashboard visibility and source-friendly
/// back-off.
const SCRAPE_JITTER_MS: RangeInclusive<u64> = 3000..=5000;

/// Delay before analysis.
const ANALYZE_JITTER_MS: RangeInclusive<u64> = 2000..=4000;

/// A stage-attributed task failure.
struct StageFailure {
    stage: TaskStage,
    error: anyhow::Error,
}

fn fail(stage: TaskStage) -> impl FnOnce(anyhow::Error) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Executes source tasks.
pub struct TaskPipeline {
    scraper: ScraperClient,
    analyzer: AnalyzerClient,
    policy: PolicyEngine,
    db: Database,
    docs: DocumentStore,
    telemetry: TelemetryBroadcaster,
    kv: Kv,
    tracker: Arc<RunTracker>,
    jitter_enabled: bool,
}

impl TaskPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        scraper: ScraperClient,
        analyzer: AnalyzerClient,
        policy: PolicyEngine,
        db: Database,
        docs: DocumentStore,
        telemetry: TelemetryBroadcaster,
        kv: Kv,
        tracker: Arc<RunTracker>,
    ) -> Self {
        Self {
            scraper,
            analyzer,
            policy,
            db,
            docs,
            telemetry,
            kv,
            tracker,
            jitter_enabled: true,
        }
    }

    /// Disable the pre-stage jitter delays (tests).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    /// Run one task to a terminal state. Never panics the run: every failure
    /// becomes a `failed` outcome with its stage recorded.
    pub async fn run_task(&self, task: &SourceTask) -> SourceOutcome {
        match self.drive(task).await {
            Ok((outcome, title)) => {
                let record = outcome.to_record(&task.source_url, title);
                self.tracker
                    .record_outcome(&task.run_id, record, outcome.generated_alert())
                    .await;
                self.emit(task, TaskStage::Finalizing, json!({})).await;
                self.emit(task, TaskStage::Completed, json!({})).await;
                outcome
            }
            Err(failure) => self.record_failure(task, failure).await,
        }
    }

    async fn drive(
        &self,
        task: &SourceTask,
    ) -> Result<(SourceOutcome, Option<String>), StageFailure> {
        info!(
            run_id = %task.run_id,
            job_name = %task.job_name,
            source_url = %task.source_url,
            "Processing task"
        );
        self.emit(task, TaskStage::Initializing, json!({})).await;

        // Scrape.
        self.sleep_jitter(SCRAPE_JITTER_MS).await;
        self.emit(task, TaskStage::Scraping, json!({ "url": task.source_url }))
            .await;
        let scrape = self
            .scraper
            .scrape(&task.source_url)
            .await
            .map_err(fail(TaskStage::Scraping))?;
        if scrape.content.trim().is_empty() {
            return Err(fail(TaskStage::Scraping)(anyhow!(
                "scrape returned empty content"
            )));
        }

        let preview: String = scrape.content.chars().take(PREVIEW_CHARS).collect();
        self.emit(
            task,
            TaskStage::ScrapingComplete,
            json!({ "preview": preview, "content_length": scrape.content.len() }),
        )
        .await;
        self.archive_source(task, &scrape.content, scrape.status_code.unwrap_or(200));

        // Analyze.
        self.sleep_jitter(ANALYZE_JITTER_MS).await;
        self.emit(task, TaskStage::Analyzing, json!({})).await;
        let analysis = self
            .analyzer
            .analyze(&scrape.content, &task.prompt)
            .await
            .map_err(fail(TaskStage::Analyzing))?;
        let score = analysis.relevance_score;
        let title = Some(analysis.title.clone());
        self.emit(
            task,
            TaskStage::AnalysisComplete,
            json!({
                "relevance_score": score,
                "threshold": task.threshold_score,
                "title": analysis.title,
            }),
        )
        .await;

        // Decide.
        if score < task.threshold_score {
            debug!(
                run_id = %task.run_id,
                score,
                threshold = task.threshold_score,
                "Below relevance threshold"
            );
            self.emit(
                task,
                TaskStage::BelowThreshold,
                json!({ "relevance_score": score, "threshold": task.threshold_score }),
            )
            .await;
            self.archive_analysis(task, &analysis, "below_threshold");
            return Ok((SourceOutcome::BelowThreshold { score }, title));
        }

        self.emit(
            task,
            TaskStage::AlertEvaluation,
            json!({ "relevance_score": score }),
        )
        .await;
        let decision = self
            .policy
            .should_create_alert(task, &analysis)
            .await
            .map_err(fail(TaskStage::AlertEvaluation))?;

        if let Some(reason) = decision.suppressed_reason() {
            info!(
                run_id = %task.run_id,
                job_id = %task.job_id,
                source_url = %task.source_url,
                reason,
                "Alert suppressed"
            );
            self.emit(task, TaskStage::AlertSuppressed, json!({ "reason": reason }))
                .await;
            self.archive_analysis(task, &analysis, "alert_suppressed");
            return Ok((SourceOutcome::Suppressed { reason, score }, title));
        }

        // Commit.
        self.emit(
            task,
            TaskStage::CreatingAlert,
            json!({ "relevance_score": score }),
        )
        .await;
        let new_alert = NewAlert {
            job_id: task.job_id,
            job_run_id: task.run_id.clone(),
            source_url: task.source_url.clone(),
            title: analysis.title.clone(),
            content: analysis.summary.clone(),
            relevance_score: score,
        };
        let row = self
            .db
            .insert_alert(&new_alert)
            .await
            .map_err(|e| fail(TaskStage::CreatingAlert)(e.into()))?;

        // The alert is committed; suppression bookkeeping failure must not
        // undo it.
        if let Err(e) = self.policy.record_created(task, &analysis, row.id).await {
            warn!(alert_id = %row.id, error = %e, "Failed to record suppression state");
        }

        self.enqueue_dispatch(task, &analysis, row.id).await;

        info!(
            run_id = %task.run_id,
            job_id = %task.job_id,
            source_url = %task.source_url,
            score,
            alert_id = %row.id,
            "Alert generated"
        );
        self.emit(
            task,
            TaskStage::AlertCreated,
            json!({ "alert_id": row.id, "relevance_score": score }),
        )
        .await;
        self.archive_analysis(task, &analysis, "alert_created");

        Ok((
            SourceOutcome::AlertCreated {
                alert_id: row.id,
                score,
            },
            title,
        ))
    }

    async fn record_failure(&self, task: &SourceTask, failure: StageFailure) -> SourceOutcome {
        let outcome = SourceOutcome::Failed {
            stage: failure.stage,
            error: failure.error.to_string(),
        };
        warn!(
            run_id = %task.run_id,
            source_url = %task.source_url,
            stage = %failure.stage,
            error = %failure.error,
            "Task failed"
        );

        let context = json!({
            "job_name": task.job_name,
            "user_id": task.user_id,
            "threshold_score": task.threshold_score,
        });
        if let Err(e) = self
            .db
            .record_failed_task(
                task.job_id,
                &task.run_id,
                &task.source_url,
                failure.stage.as_str(),
                &failure.error.to_string(),
                &context,
            )
            .await
        {
            warn!(run_id = %task.run_id, error = %e, "Could not write failed-task log");
        }

        let record = outcome.to_record(&task.source_url, None);
        self.tracker.record_outcome(&task.run_id, record, false).await;
        self.emit(
            task,
            TaskStage::Failed,
            json!({ "stage": failure.stage.as_str(), "error": failure.error.to_string() }),
        )
        .await;

        outcome
    }

    /// Archive the raw scrape payload off the task's critical path.
    fn archive_source(&self, task: &SourceTask, content: &str, status_code: u16) {
        let docs = self.docs.clone();
        let run_id = task.run_id.clone();
        let doc = SourceDocument {
            source_url: task.source_url.clone(),
            content: content.to_string(),
            status_code,
            content_length: content.len(),
            scraped_at: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = docs.record_source_data(&run_id, &doc).await {
                debug!(run_id = %run_id, error = %e, "Failed to archive source payload");
            }
        });
    }

    /// Archive the analysis result off the task's critical path.
    fn archive_analysis(&self, task: &SourceTask, analysis: &Analysis, outcome: &str) {
        let docs = self.docs.clone();
        let run_id = task.run_id.clone();
        let doc = AnalysisDocument {
            source_url: task.source_url.clone(),
            relevance_score: analysis.relevance_score,
            title: analysis.title.clone(),
            summary: analysis.summary.clone(),
            reasoning: analysis.reasoning.clone(),
            outcome: outcome.to_string(),
            analyzed_at: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = docs.record_analysis(&run_id, &doc).await {
                debug!(run_id = %run_id, error = %e, "Failed to archive analysis");
            }
        });
    }

    async fn enqueue_dispatch(&self, task: &SourceTask, analysis: &Analysis, alert_id: uuid::Uuid) {
        let payload = AlertPayload {
            alert_id,
            job_id: task.job_id,
            job_run_id: task.run_id.clone(),
            source_url: task.source_url.clone(),
            title: analysis.title.clone(),
            content: analysis.summary.clone(),
            relevance_score: analysis.relevance_score,
            user_id: task.user_id,
            acknowledgment_token: None,
            repeat: false,
            timestamp: Utc::now(),
        };
        match serde_json::to_string(&payload) {
            Ok(raw) => {
                // The alert row exists either way; if the enqueue fails the
                // re-notifier resurfaces acknowledgement-required alerts.
                if let Err(e) = self.kv.push(ALERT_QUEUE, &raw).await {
                    warn!(%alert_id, error = %e, "Failed to enqueue alert for dispatch");
                }
            }
            Err(e) => warn!(%alert_id, error = %e, "Failed to encode alert payload"),
        }
    }

    async fn emit(&self, task: &SourceTask, stage: TaskStage, stage_data: JsonValue) {
        let progress = self.tracker.snapshot(&task.run_id).await;
        let (sources_processed, sources_total, alerts_generated, analysis_details) = progress
            .map_or((0, 0, 0, Vec::new()), |p| {
                (
                    p.sources_processed,
                    p.sources_total,
                    p.alerts_generated,
                    p.records,
                )
            });

        self.telemetry.emit(StageEvent {
            run_id: task.run_id.clone(),
            job_id: task.job_id,
            job_name: task.job_name.clone(),
            source_url: task.source_url.clone(),
            current_stage: stage,
            completion_percentage: stage.percentage(),
            stage_data,
            sources_processed,
            sources_total,
            alerts_generated,
            analysis_details,
            user_id: task.user_id,
            timestamp: Utc::now(),
        });
    }

    async fn sleep_jitter(&self, range: RangeInclusive<u64>) {
        if !self.jitter_enabled {
            return;
        }
        let millis = rand::thread_rng().gen_range(range);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
