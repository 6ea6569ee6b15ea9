//! The re-notifier.
//!
//! Background loop resurfacing alerts that were delivered but never
//! acknowledged, per the owning job's repeat policy, up to `max_repeats`.
//! Repeats for one alert are strictly sequential: the repeat count is
//! pre-read and the row update is guarded on it, so a lost race (concurrent
//! acknowledgement or a sibling worker's repeat) skips the emission.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dispatch::{AlertPayload, ALERT_QUEUE};
use store::db::models::RepeatCandidate;
use store::{Database, Kv, StoreError};

use crate::policy::hour_bucket;

/// Per-job hourly cap on repeat emissions, independent of the new-alert cap.
const REPEAT_HOURLY_CAP: i64 = 10;

/// Candidates examined per tick.
const CANDIDATE_BATCH: i64 = 200;

/// Retry backoff when the relational store is unavailable.
const FETCH_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// Periodically re-enqueues unacknowledged alerts for dispatch.
pub struct ReNotifier {
    db: Database,
    kv: Kv,
    interval: Duration,
}

impl ReNotifier {
    #[must_use]
    pub fn new(db: Database, kv: Kv, interval: Duration) -> Self {
        Self { db, kv, interval }
    }

    /// Run ticks until shutdown. A schema mismatch is terminal: the loop
    /// logs loudly and stops instead of spamming partial updates.
    pub async fn run_forever(&self, shutdown: CancellationToken) {
        info!("Re-notifier started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(repeated) => debug!(repeated, "Re-notification tick complete"),
                        Err(e) if e.is_schema_mismatch() => {
                            error!(error = %e, "Alert schema is missing required columns; stopping re-notifier");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Re-notification tick failed"),
                    }
                }
            }
        }

        info!("Re-notifier stopped");
    }

    /// One pass over the eligible alerts. Returns the number of repeats
    /// enqueued.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let candidates = self.fetch_with_retry().await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        debug!(candidates = candidates.len(), "Evaluating repeat candidates");

        let mut repeated = 0;
        for candidate in candidates {
            match self.process(&candidate).await {
                Ok(true) => repeated += 1,
                Ok(false) => {}
                Err(e) if e.is_schema_mismatch() => return Err(e),
                Err(e) => warn!(
                    alert_id = %candidate.alert_id,
                    error = %e,
                    "Failed to process repeat candidate"
                ),
            }
        }

        Ok(repeated)
    }

    /// Fetch candidates, retrying transient store failures with exponential
    /// backoff before giving up on the tick. Schema mismatches are never
    /// retried.
    async fn fetch_with_retry(&self) -> Result<Vec<RepeatCandidate>, StoreError> {
        let mut last_error = None;

        for (attempt, backoff) in FETCH_BACKOFF.iter().enumerate() {
            match self.db.repeat_candidates(CANDIDATE_BATCH).await {
                Ok(candidates) => return Ok(candidates),
                Err(e) if e.is_schema_mismatch() => return Err(e),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Repeat candidate query failed, backing off"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(*backoff).await;
                }
            }
        }

        match self.db.repeat_candidates(CANDIDATE_BATCH).await {
            Ok(candidates) => Ok(candidates),
            Err(e) if e.is_schema_mismatch() => Err(e),
            Err(e) => Err(last_error.unwrap_or(e)),
        }
    }

    /// Emit one repeat if the hourly cap and the row-level guard both allow
    /// it. Returns whether a repeat was enqueued.
    async fn process(&self, candidate: &RepeatCandidate) -> Result<bool, StoreError> {
        let cap_key = format!(
            "repeat_rate_limit:{}:{}",
            candidate.job_id,
            hour_bucket(Utc::now())
        );
        let emitted_this_hour = self
            .kv
            .incr_with_ttl(&cap_key, Duration::from_secs(3600))
            .await?;
        if emitted_this_hour > REPEAT_HOURLY_CAP {
            debug!(
                job_id = %candidate.job_id,
                emitted_this_hour,
                "Repeat cap reached for job this hour"
            );
            return Ok(false);
        }

        let ordinal = candidate.repeat_count + 1;
        let next_repeat_at =
            Utc::now() + ChronoDuration::minutes(i64::from(candidate.repeat_frequency_minutes.max(1)));

        // Pre-increment guard: lose the race, skip the emission.
        let advanced = self
            .db
            .record_repeat(candidate.alert_id, candidate.repeat_count, next_repeat_at)
            .await?;
        if !advanced {
            debug!(
                alert_id = %candidate.alert_id,
                "Repeat skipped: alert acknowledged or count advanced concurrently"
            );
            return Ok(false);
        }

        let payload = AlertPayload {
            alert_id: candidate.alert_id,
            job_id: candidate.job_id,
            job_run_id: candidate.job_run_id.clone(),
            source_url: candidate.source_url.clone(),
            title: decorate_title(&candidate.title, ordinal, candidate.max_repeats),
            content: decorate_content(&candidate.content, ordinal, candidate.max_repeats),
            relevance_score: candidate.relevance_score,
            user_id: candidate.user_id,
            acknowledgment_token: candidate.acknowledgment_token.clone(),
            repeat: true,
            timestamp: Utc::now(),
        };

        match serde_json::to_string(&payload) {
            Ok(raw) => {
                // repeat_count already advanced; a failed enqueue costs one
                // emission and the next window picks the alert up again.
                self.kv.push(ALERT_QUEUE, &raw).await?;
                info!(
                    alert_id = %candidate.alert_id,
                    job_id = %candidate.job_id,
                    ordinal,
                    max_repeats = candidate.max_repeats,
                    "Repeat notification enqueued"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(alert_id = %candidate.alert_id, error = %e, "Failed to encode repeat payload");
                Ok(false)
            }
        }
    }
}

/// Decorate a repeat's title with its ordinal.
fn decorate_title(title: &str, ordinal: i32, max_repeats: i32) -> String {
    format!("[Repeat {ordinal}/{max_repeats}] {title}")
}

/// Prefix a repeat's content with its ordinal.
fn decorate_content(content: &str, ordinal: i32, max_repeats: i32) -> String {
    format!("Reminder {ordinal} of {max_repeats}: {content}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decorated_titles_carry_the_ordinal() {
        assert_eq!(
            decorate_title("Q3 beat", 1, 3),
            "[Repeat 1/3] Q3 beat"
        );
        assert_eq!(
            decorate_content("Revenue up 12%", 2, 3),
            "Reminder 2 of 3: Revenue up 12%"
        );
    }
}
