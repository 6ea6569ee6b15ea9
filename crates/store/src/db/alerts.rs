//! Alert reads and writes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{AlertRow, NewAlert, RepeatCandidate};
use super::Database;
use crate::error::StoreError;

const ALERT_COLUMNS: &str = "id, job_id, job_run_id, source_url, title, content, \
     relevance_score, is_sent, is_acknowledged, acknowledged_at, \
     acknowledgment_token, repeat_count, next_repeat_at, created_at";

impl Database {
    /// Commit a new alert. Returns the stored row.
    pub async fn insert_alert(&self, alert: &NewAlert) -> Result<AlertRow, StoreError> {
        let query = format!(
            "INSERT INTO alerts \
                 (job_id, job_run_id, source_url, title, content, relevance_score, \
                  is_sent, is_acknowledged, repeat_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, false, false, 0, now()) \
             RETURNING {ALERT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AlertRow>(&query)
            .bind(alert.job_id)
            .bind(&alert.job_run_id)
            .bind(&alert.source_url)
            .bind(&alert.title)
            .bind(&alert.content)
            .bind(alert.relevance_score)
            .fetch_one(self.pool())
            .await?;
        Ok(row)
    }

    /// Mark an alert as processed by the dispatcher. Monotonic: the flag only
    /// ever moves false → true.
    pub async fn mark_alert_sent(&self, alert_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE alerts SET is_sent = true WHERE id = $1")
            .bind(alert_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Persist an acknowledgement token for a row that lacks one. Keeps an
    /// existing token untouched so links already delivered stay valid.
    pub async fn set_acknowledgment_token(
        &self,
        alert_id: Uuid,
        token: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE alerts SET acknowledgment_token = $2 \
             WHERE id = $1 AND acknowledgment_token IS NULL",
        )
        .bind(alert_id)
        .bind(token)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Alerts eligible for a repeat notification: sent, unacknowledged,
    /// belonging to an active job that requires acknowledgement, whose repeat
    /// window has elapsed and whose repeat budget is not exhausted.
    pub async fn repeat_candidates(&self, limit: i64) -> Result<Vec<RepeatCandidate>, StoreError> {
        let rows = sqlx::query_as::<_, RepeatCandidate>(
            "SELECT a.id AS alert_id, a.job_id, a.job_run_id, a.source_url, a.title, \
                    a.content, a.relevance_score, a.acknowledgment_token, a.repeat_count, \
                    j.user_id, j.repeat_frequency_minutes, j.max_repeats \
             FROM alerts a \
             JOIN jobs j ON j.id = a.job_id \
             WHERE a.is_acknowledged = false \
               AND a.is_sent = true \
               AND j.require_acknowledgment = true \
               AND j.is_active = true \
               AND (a.next_repeat_at IS NULL OR a.next_repeat_at <= now()) \
               AND a.repeat_count < j.max_repeats \
             ORDER BY a.created_at \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Advance an alert's repeat bookkeeping under a row-level guard: the
    /// update only lands if `repeat_count` still matches the pre-read value
    /// and the alert has not been acknowledged in the meantime. Returns
    /// whether the guard held.
    pub async fn record_repeat(
        &self,
        alert_id: Uuid,
        expected_repeat_count: i32,
        next_repeat_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE alerts \
             SET repeat_count = repeat_count + 1, next_repeat_at = $3 \
             WHERE id = $1 AND repeat_count = $2 AND is_acknowledged = false",
        )
        .bind(alert_id)
        .bind(expected_repeat_count)
        .bind(next_repeat_at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
