//! Active-run bookkeeping.
//!
//! A bare map from run id to progress counters, owned by the scheduler and
//! shared with the pipelines it drives. Entries are inserted when a run
//! starts and removed at finalization; tasks hold only their `run_id`, never
//! a reference back into the map.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::stage::AnalysisRecord;

/// The live dashboard shows at most this many per-source results per run.
pub const MAX_SUMMARY_ENTRIES: usize = 10;

/// Mutable progress of one run.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub job_id: Uuid,
    pub job_name: String,
    pub user_id: Uuid,
    pub sources_total: u32,
    pub sources_processed: u32,
    pub alerts_generated: u32,
    /// Most recent per-source results, bounded to [`MAX_SUMMARY_ENTRIES`].
    pub records: Vec<AnalysisRecord>,
}

impl RunProgress {
    #[must_use]
    pub fn new(job_id: Uuid, job_name: String, user_id: Uuid, sources_total: u32) -> Self {
        Self {
            job_id,
            job_name,
            user_id,
            sources_total,
            sources_processed: 0,
            alerts_generated: 0,
            records: Vec::new(),
        }
    }

    fn record_outcome(&mut self, record: AnalysisRecord, generated_alert: bool) {
        self.sources_processed += 1;
        if generated_alert {
            self.alerts_generated += 1;
        }
        if self.records.len() == MAX_SUMMARY_ENTRIES {
            self.records.remove(0);
        }
        self.records.push(record);
    }

    /// The stored `analysis_summary` representation.
    #[must_use]
    pub fn summary_json(&self) -> JsonValue {
        serde_json::to_value(&self.records).unwrap_or_else(|_| JsonValue::Array(Vec::new()))
    }
}

/// Shared map of in-flight runs.
#[derive(Debug, Default)]
pub struct RunTracker {
    runs: Mutex<HashMap<String, RunProgress>>,
}

impl RunTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run at construction time.
    pub async fn insert(&self, run_id: &str, progress: RunProgress) {
        self.runs.lock().await.insert(run_id.to_string(), progress);
    }

    /// Apply one task's terminal outcome to its run.
    pub async fn record_outcome(
        &self,
        run_id: &str,
        record: AnalysisRecord,
        generated_alert: bool,
    ) {
        if let Some(progress) = self.runs.lock().await.get_mut(run_id) {
            progress.record_outcome(record, generated_alert);
        }
    }

    /// Snapshot a run's progress for telemetry.
    pub async fn snapshot(&self, run_id: &str) -> Option<RunProgress> {
        self.runs.lock().await.get(run_id).cloned()
    }

    /// Remove a run at finalization, returning its final progress.
    pub async fn remove(&self, run_id: &str) -> Option<RunProgress> {
        self.runs.lock().await.remove(run_id)
    }

    /// Number of in-flight runs.
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}
