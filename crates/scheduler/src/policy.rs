//! Alert suppression policy.
//!
//! Three independent suppressions, evaluated in order with short-circuit:
//! content cooldown (re-alerting on unchanged content), the per-job hourly
//! rate cap (bounds user-visible noise), and the per-(job, source, hour)
//! dedup shield (the idempotence guard both the pipeline and re-notifier
//! honor, so the two cannot race).

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use store::Kv;

use crate::analyze::Analysis;
use crate::job::SourceTask;

/// TTL of the hourly rate-limit counter and the dedup shield.
const HOUR_TTL: Duration = Duration::from_secs(3600);

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    CooldownSuppressed,
    RateLimited,
    DuplicateSuppressed,
}

impl Decision {
    #[must_use]
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// The label recorded in analysis summaries for a suppression.
    #[must_use]
    pub const fn suppressed_reason(self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::CooldownSuppressed => Some("cooldown"),
            Self::RateLimited => Some("rate limiting"),
            Self::DuplicateSuppressed => Some("duplicate"),
        }
    }
}

/// First 16 hex characters of the MD5 of the analysis summary. Opaque beyond
/// determinism.
#[must_use]
pub fn content_hash(summary: &str) -> String {
    let digest = format!("{:x}", md5::compute(summary));
    digest[..16].to_string()
}

/// The hour bucket used by rate-limit and dedup keys.
#[must_use]
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}

/// Evaluates and records suppression state for candidate alerts.
#[derive(Clone, Debug)]
pub struct PolicyEngine {
    kv: Kv,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    /// Decide whether a threshold-crossing analysis may commit an alert.
    pub async fn should_create_alert(
        &self,
        task: &SourceTask,
        analysis: &Analysis,
    ) -> Result<Decision> {
        let hour = hour_bucket(Utc::now());

        let cooldown_key = format!(
            "alert_cooldown:{}:{}",
            task.job_id,
            content_hash(&analysis.summary)
        );
        if self.kv.exists(&cooldown_key).await? {
            debug!(job_id = %task.job_id, "Alert suppressed by cooldown");
            return Ok(Decision::CooldownSuppressed);
        }

        let rate_key = format!("alert_rate_limit:{}:{hour}", task.job_id);
        let sent_this_hour = self.kv.get_count(&rate_key).await?;
        if sent_this_hour >= i64::from(task.max_alerts_per_hour) {
            debug!(
                job_id = %task.job_id,
                sent_this_hour,
                cap = task.max_alerts_per_hour,
                "Alert suppressed by rate limit"
            );
            return Ok(Decision::RateLimited);
        }

        let dedup_key = format!("content_dedup:{}:{}:{hour}", task.job_id, task.source_url);
        if self.kv.exists(&dedup_key).await? {
            debug!(job_id = %task.job_id, source_url = %task.source_url, "Alert suppressed as duplicate");
            return Ok(Decision::DuplicateSuppressed);
        }

        Ok(Decision::Allow)
    }

    /// Record a committed alert: set the cooldown key, bump the hourly
    /// counter (atomically, refreshing its TTL), and plant the dedup shield
    /// holding the committed alert's id.
    pub async fn record_created(
        &self,
        task: &SourceTask,
        analysis: &Analysis,
        alert_id: Uuid,
    ) -> Result<()> {
        let hour = hour_bucket(Utc::now());

        let cooldown_key = format!(
            "alert_cooldown:{}:{}",
            task.job_id,
            content_hash(&analysis.summary)
        );
        let cooldown_ttl = Duration::from_secs(u64::from(task.alert_cooldown_minutes) * 60);
        self.kv.set_with_ttl(&cooldown_key, "1", cooldown_ttl).await?;

        let rate_key = format!("alert_rate_limit:{}:{hour}", task.job_id);
        self.kv.incr_with_ttl(&rate_key, HOUR_TTL).await?;

        let dedup_key = format!("content_dedup:{}:{}:{hour}", task.job_id, task.source_url);
        self.kv
            .set_with_ttl(&dedup_key, &alert_id.to_string(), HOUR_TTL)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn content_hash_is_deterministic_and_short() {
        let a = content_hash("Revenue up 12%");
        let b = content_hash("Revenue up 12%");
        let c = content_hash("Revenue up 13%");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn hour_bucket_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 9, 42, 0).unwrap();
        assert_eq!(hour_bucket(at), "2026-03-07-09");
    }

    #[test]
    fn suppression_reasons_match_summary_labels() {
        assert_eq!(Decision::Allow.suppressed_reason(), None);
        assert_eq!(
            Decision::CooldownSuppressed.suppressed_reason(),
            Some("cooldown")
        );
        assert_eq!(
            Decision::RateLimited.suppressed_reason(),
            Some("rate limiting")
        );
        assert_eq!(
            Decision::DuplicateSuppressed.suppressed_reason(),
            Some("duplicate")
        );
    }
}
