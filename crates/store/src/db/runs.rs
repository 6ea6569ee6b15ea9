//! Job-run lifecycle rows.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::models::RunStatus;
use super::Database;
use crate::error::StoreError;

impl Database {
    /// Create the initial `running` row for a run.
    pub async fn insert_run(&self, run_id: &str, job_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO job_runs \
                 (run_id, job_id, status, started_at, sources_processed, alerts_generated) \
             VALUES ($1, $2, $3, now(), 0, 0)",
        )
        .bind(run_id)
        .bind(job_id)
        .bind(RunStatus::Running.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Finalize a run. Guarded on `status = 'running'` so a run is finalized
    /// at most once even if a lease handoff races; returns whether this call
    /// performed the finalization. A row stranded in `running` keeps its
    /// `started_at`, which is what the orphan janitor keys on.
    pub async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        sources_processed: i32,
        alerts_generated: i32,
        analysis_summary: &JsonValue,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE job_runs \
             SET status = $2, completed_at = now(), sources_processed = $3, \
                 alerts_generated = $4, analysis_summary = $5, error_message = $6 \
             WHERE run_id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(sources_processed)
        .bind(alerts_generated)
        .bind(analysis_summary)
        .bind(error_message)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a task that failed before reaching a terminal pipeline state.
    pub async fn record_failed_task(
        &self,
        job_id: Uuid,
        run_id: &str,
        source_url: &str,
        stage: &str,
        error_message: &str,
        context: &JsonValue,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO failed_job_log \
                 (job_id, job_run_id, source_url, stage, error_message, context, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(job_id)
        .bind(run_id)
        .bind(source_url)
        .bind(stage)
        .bind(error_message)
        .bind(context)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
