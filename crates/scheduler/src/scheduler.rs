//! The batch scheduler.
//!
//! Main control loop of a worker: every tick it drains the immediate-run
//! queue, otherwise fetches active jobs, elects this worker per job through
//! the lease manager, and fans the elected jobs' sources out through the
//! task pipeline under the two concurrency bounds. Each run is finalized
//! exactly once after all of its tasks reach a terminal state.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use store::db::models::RunStatus;
use store::docs::{RunComplete, RunStart};
use store::{Database, DocumentStore, Kv};

use crate::config::WorkerConfig;
use crate::job::{new_run_id, ImmediateRunRequest, Job};
use crate::lease::LeaseManager;
use crate::pipeline::TaskPipeline;
use crate::registry::JobRegistry;
use crate::stage::TaskStage;
use crate::telemetry::{StageEvent, TelemetryBroadcaster};
use crate::tracker::{RunProgress, RunTracker};

/// Name of the immediate-run FIFO in the KV store.
pub const JOB_QUEUE: &str = "job_queue";

/// Polls due jobs and drives batches of task pipelines.
pub struct BatchScheduler {
    worker_id: String,
    job_batch_size: usize,
    tick_interval: Duration,
    registry: JobRegistry,
    lease: LeaseManager,
    pipeline: Arc<TaskPipeline>,
    tracker: Arc<RunTracker>,
    db: Database,
    docs: DocumentStore,
    telemetry: TelemetryBroadcaster,
    kv: Kv,
    jobs_semaphore: Arc<Semaphore>,
    sources_semaphore: Arc<Semaphore>,
}

impl BatchScheduler {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: &WorkerConfig,
        registry: JobRegistry,
        lease: LeaseManager,
        pipeline: Arc<TaskPipeline>,
        tracker: Arc<RunTracker>,
        db: Database,
        docs: DocumentStore,
        telemetry: TelemetryBroadcaster,
        kv: Kv,
        sources_semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            job_batch_size: config.job_batch_size,
            tick_interval: config.tick_interval,
            registry,
            lease,
            pipeline,
            tracker,
            db,
            docs,
            telemetry,
            kv,
            jobs_semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            sources_semaphore,
        }
    }

    /// Run scheduling ticks until shutdown. A tick in progress completes
    /// fully, so in-flight runs drain before this returns.
    pub async fn run_forever(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.worker_id, "Batch scheduler started");

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Batch scheduler stopped");
    }

    /// One scheduling pass: immediate work first, the regular listing only
    /// when no immediate work was found.
    pub async fn tick(&self) -> Result<()> {
        let immediate = self.drain_immediate_queue().await?;
        if !immediate.is_empty() {
            info!(count = immediate.len(), "Processing immediate-run batch");
            self.run_batch(&immediate, true).await;
            return Ok(());
        }

        let jobs = self.registry.list_active_jobs().await?;
        if jobs.is_empty() {
            debug!("No active jobs");
            return Ok(());
        }

        for batch in jobs.chunks(self.job_batch_size) {
            self.run_batch(batch, false).await;
        }
        Ok(())
    }

    /// Drain the immediate-run queue, claiming each entry's 5-minute lock so
    /// duplicate enqueues collapse into one batch.
    async fn drain_immediate_queue(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();

        while let Some(raw) = self.kv.pop(JOB_QUEUE).await? {
            let request: ImmediateRunRequest = match serde_json::from_str(&raw) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Discarding malformed immediate-run entry");
                    continue;
                }
            };

            if !self.lease.try_acquire_immediate(request.job_id).await? {
                debug!(job_id = %request.job_id, "Immediate run already claimed");
                continue;
            }

            match self.registry.get_job(request.job_id).await {
                Ok(Some(job)) if job.is_active => jobs.push(job),
                Ok(Some(_)) => {
                    debug!(job_id = %request.job_id, "Skipping immediate run for inactive job");
                }
                Ok(None) => {
                    warn!(job_id = %request.job_id, "Immediate run requested for unknown job");
                }
                Err(e) => {
                    warn!(job_id = %request.job_id, error = %e, "Failed to fetch job for immediate run");
                }
            }
        }

        Ok(jobs)
    }

    /// Execute one batch of jobs. Immediate batches bypass the frequency
    /// check; scheduled batches are lease-filtered first.
    async fn run_batch(&self, jobs: &[Job], immediate: bool) {
        let mut runnable = Vec::new();
        for job in jobs {
            if immediate {
                runnable.push(job.clone());
                continue;
            }
            match self.is_runnable(job).await {
                Ok(true) => runnable.push(job.clone()),
                Ok(false) => {}
                Err(e) => warn!(job_id = %job.id, error = %e, "Lease check failed"),
            }
        }

        if runnable.is_empty() {
            return;
        }

        info!(jobs = runnable.len(), immediate, "Executing batch");
        let futures = runnable.into_iter().map(|job| self.run_job(job, immediate));
        futures::future::join_all(futures).await;
    }

    /// Runnable this tick = lease acquired and the frequency window elapsed.
    /// The lease is released again on the not-due path.
    async fn is_runnable(&self, job: &Job) -> Result<bool> {
        if !self.lease.try_acquire(job.id, job.frequency_minutes).await? {
            return Ok(false);
        }
        if self.lease.is_due(job.id, job.frequency_minutes).await? {
            return Ok(true);
        }
        self.lease.release_if_not_due(job.id).await?;
        Ok(false)
    }

    /// Execute one job run: construct the run, fan out its tasks under the
    /// sources semaphore, then finalize.
    async fn run_job(&self, job: Job, immediate: bool) {
        let _permit = match self.jobs_semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let run_id = new_run_id(job.id);
        if let Err(e) = self.db.insert_run(&run_id, job.id).await {
            error!(job_id = %job.id, error = %e, "Failed to create run record, skipping job");
            return;
        }
        self.tracker
            .insert(
                &run_id,
                RunProgress::new(
                    job.id,
                    job.name.clone(),
                    job.user_id,
                    job.sources.len() as u32,
                ),
            )
            .await;

        self.archive_run_start(&job, &run_id);

        let tasks = job.tasks(&run_id);
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let pipeline = Arc::clone(&self.pipeline);
            let semaphore = Arc::clone(&self.sources_semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                pipeline.run_task(&task).await
            }));
        }

        // A panicked task is the one unrecoverable exception that fails the
        // whole run; ordinary task failures are already terminal outcomes.
        let mut run_error: Option<String> = None;
        for handle in handles {
            if let Err(e) = handle.await {
                run_error = Some(format!("task aborted: {e}"));
            }
        }

        self.finalize_run(&job, &run_id, run_error, immediate).await;
    }

    /// Finalize a run exactly once: counters, summary, completion telemetry,
    /// last-run bookkeeping, and the run-summary document.
    async fn finalize_run(
        &self,
        job: &Job,
        run_id: &str,
        run_error: Option<String>,
        immediate: bool,
    ) {
        let Some(progress) = self.tracker.remove(run_id).await else {
            warn!(%run_id, "No tracked progress for run at finalization");
            return;
        };

        let status = if run_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let summary = progress.summary_json();

        match self
            .db
            .finalize_run(
                run_id,
                status,
                progress.sources_processed as i32,
                progress.alerts_generated as i32,
                &summary,
                run_error.as_deref(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(%run_id, "Run was already finalized"),
            Err(e) => {
                // The lease's natural expiry makes the job runnable again;
                // the stranded `running` row awaits the orphan sweep.
                error!(%run_id, error = %e, "Failed to finalize run");
            }
        }

        self.telemetry.emit(StageEvent {
            run_id: run_id.to_string(),
            job_id: job.id,
            job_name: job.name.clone(),
            source_url: String::new(),
            current_stage: if run_error.is_some() {
                TaskStage::Failed
            } else {
                TaskStage::Completed
            },
            completion_percentage: 100,
            stage_data: json!({ "job_completed": true }),
            sources_processed: progress.sources_processed,
            sources_total: progress.sources_total,
            alerts_generated: progress.alerts_generated,
            analysis_details: progress.records.clone(),
            user_id: job.user_id,
            timestamp: Utc::now(),
        });

        if status == RunStatus::Completed {
            if let Err(e) = self.lease.record_run(job.id).await {
                warn!(job_id = %job.id, error = %e, "Failed to record run timestamp");
            }
        }

        let docs = self.docs.clone();
        let run_id_owned = run_id.to_string();
        let complete = RunComplete {
            status: status.as_str().to_string(),
            sources_processed: progress.sources_processed,
            alerts_generated: progress.alerts_generated,
            summary,
            completed_at: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = docs.record_complete(&run_id_owned, &complete).await {
                debug!(run_id = %run_id_owned, error = %e, "Failed to archive run summary");
            }
        });

        info!(
            %run_id,
            job_id = %job.id,
            sources_processed = progress.sources_processed,
            alerts_generated = progress.alerts_generated,
            status = %status,
            immediate,
            "Run finalized"
        );
    }

    /// Archive initial run metadata off the critical path.
    fn archive_run_start(&self, job: &Job, run_id: &str) {
        let docs = self.docs.clone();
        let start = RunStart {
            job_run_id: run_id.to_string(),
            job_id: job.id,
            user_id: job.user_id,
            job_name: job.name.clone(),
            sources: job.sources.clone(),
            started_at: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = docs.record_start(&start).await {
                debug!(run_id = %start.job_run_id, error = %e, "Failed to archive run start");
            }
        });
    }
}
