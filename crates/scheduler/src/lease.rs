//! Per-job distributed leases.
//!
//! Exactly-one-worker election over the shared KV store: a job is claimed
//! with an atomic set-if-absent whose TTL equals the job's frequency window,
//! so a crashed worker's claim reclaims itself no later than the next
//! scheduling window. Lease release is implicit through TTL; only the
//! decided-not-to-run path deletes eagerly.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use store::Kv;

/// TTL of the immediate-run lock.
const IMMEDIATE_LOCK_TTL: Duration = Duration::from_secs(300);

/// Manages `job_lock`, `job_last_run`, and `immediate_run_lock` keys.
#[derive(Clone, Debug)]
pub struct LeaseManager {
    kv: Kv,
    worker_id: String,
}

impl LeaseManager {
    #[must_use]
    pub fn new(kv: Kv, worker_id: String) -> Self {
        Self { kv, worker_id }
    }

    fn lock_value(&self) -> String {
        format!("{}:{}", self.worker_id, Utc::now().timestamp())
    }

    /// Try to claim the scheduling lease for a job. The expiration equals the
    /// job's frequency window.
    pub async fn try_acquire(&self, job_id: Uuid, frequency_minutes: u32) -> Result<bool> {
        let key = format!("job_lock:{job_id}");
        let ttl = Duration::from_secs(u64::from(frequency_minutes) * 60);
        let acquired = self.kv.set_if_absent(&key, &self.lock_value(), ttl).await?;
        if acquired {
            debug!(%job_id, worker_id = %self.worker_id, "Acquired job lease");
        }
        Ok(acquired)
    }

    /// Whether the job's frequency window has elapsed since its last run.
    /// A job with no recorded run is due.
    pub async fn is_due(&self, job_id: Uuid, frequency_minutes: u32) -> Result<bool> {
        let key = format!("job_last_run:{job_id}");
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(true);
        };

        let Ok(last_run) = raw.parse::<DateTime<Utc>>() else {
            // An unreadable timestamp never blocks scheduling.
            return Ok(true);
        };

        let next_run = last_run + ChronoDuration::minutes(i64::from(frequency_minutes));
        Ok(Utc::now() >= next_run)
    }

    /// Record that a run completed now.
    pub async fn record_run(&self, job_id: Uuid) -> Result<()> {
        let key = format!("job_last_run:{job_id}");
        self.kv.set(&key, &Utc::now().to_rfc3339()).await?;
        Ok(())
    }

    /// Drop the lease after deciding not to run after all.
    pub async fn release_if_not_due(&self, job_id: Uuid) -> Result<()> {
        let key = format!("job_lock:{job_id}");
        self.kv.delete(&key).await?;
        debug!(%job_id, "Released lease for job not yet due");
        Ok(())
    }

    /// Try to claim the immediate-run lock for a job. Prevents duplicate
    /// processing of queued immediate-run requests for five minutes.
    pub async fn try_acquire_immediate(&self, job_id: Uuid) -> Result<bool> {
        let key = format!("immediate_run_lock:{job_id}");
        let acquired = self
            .kv
            .set_if_absent(&key, &self.lock_value(), IMMEDIATE_LOCK_TTL)
            .await?;
        if acquired {
            debug!(%job_id, worker_id = %self.worker_id, "Acquired immediate-run lock");
        }
        Ok(acquired)
    }
}
