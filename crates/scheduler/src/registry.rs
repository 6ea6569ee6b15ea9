//! Job registry client.
//!
//! Read-through view of job definitions served by the internal jobs API.
//! Single-job lookups are cached in the KV store under `job_settings:{id}`
//! with a 300-second TTL; the active-jobs listing is never cached. Failures
//! surface as errors — an expired cache entry is never served in place of a
//! live answer.

use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use store::Kv;

use crate::job::Job;

const INTERNAL_KEY_HEADER: &str = "X-Internal-API-Key";

/// How long a cached job definition stays valid.
const JOB_SETTINGS_TTL: Duration = Duration::from_secs(300);

/// The policy knobs of a job, as consumed by the policy engine and
/// re-notifier.
#[derive(Debug, Clone)]
pub struct JobPolicy {
    pub threshold_score: i32,
    pub alert_cooldown_minutes: u32,
    pub max_alerts_per_hour: u32,
    pub repeat_frequency_minutes: u32,
    pub max_repeats: u32,
    pub require_acknowledgment: bool,
}

impl From<&Job> for JobPolicy {
    fn from(job: &Job) -> Self {
        Self {
            threshold_score: job.threshold(),
            alert_cooldown_minutes: job.alert_cooldown_minutes,
            max_alerts_per_hour: job.max_alerts_per_hour,
            repeat_frequency_minutes: job.repeat_frequency_minutes,
            max_repeats: job.max_repeats,
            require_acknowledgment: job.require_acknowledgment,
        }
    }
}

/// Client for the internal jobs API.
#[derive(Clone, Debug)]
pub struct JobRegistry {
    base_url: String,
    internal_api_key: String,
    client: Client,
    kv: Kv,
}

impl JobRegistry {
    /// Create a registry client.
    pub fn new(base_url: String, internal_api_key: String, kv: Kv) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base_url,
            internal_api_key,
            client,
            kv,
        })
    }

    /// All currently active jobs. Never cached.
    pub async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let response = self
            .client
            .get(format!("{}/internal/jobs/active", self.base_url))
            .header(INTERNAL_KEY_HEADER, &self.internal_api_key)
            .send()
            .await
            .map_err(|e| anyhow!("failed to fetch active jobs: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("jobs API returned {status} for active jobs"));
        }

        let jobs: Vec<Job> = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to decode active jobs: {e}"))?;
        debug!(count = jobs.len(), "Fetched active jobs");
        Ok(jobs)
    }

    /// A single job by id, served through the KV cache.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let cache_key = format!("job_settings:{job_id}");

        match self.kv.get_json::<Job>(&cache_key).await {
            Ok(Some(job)) => {
                debug!(%job_id, "Job served from cache");
                return Ok(Some(job));
            }
            Ok(None) => {}
            Err(e) => warn!(%job_id, error = %e, "Job cache read failed"),
        }

        let response = self
            .client
            .get(format!("{}/internal/jobs/{job_id}", self.base_url))
            .header(INTERNAL_KEY_HEADER, &self.internal_api_key)
            .send()
            .await
            .map_err(|e| anyhow!("failed to fetch job {job_id}: {e}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("jobs API returned {status} for job {job_id}"));
        }

        let job: Job = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to decode job {job_id}: {e}"))?;

        if let Err(e) = self
            .kv
            .set_json_with_ttl(&cache_key, &job, JOB_SETTINGS_TTL)
            .await
        {
            warn!(%job_id, error = %e, "Job cache write failed");
        }

        Ok(Some(job))
    }

    /// The policy knobs of a job, through the same cache as [`get_job`].
    ///
    /// [`get_job`]: JobRegistry::get_job
    pub async fn get_job_policy(&self, job_id: Uuid) -> Result<Option<JobPolicy>> {
        Ok(self.get_job(job_id).await?.map(|job| JobPolicy::from(&job)))
    }
}
