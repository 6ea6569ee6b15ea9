//! Vigil worker - content-monitoring scheduler and alert lifecycle engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dispatch::{DispatchConfig, Dispatcher};
use scheduler::{
    BatchScheduler, JobRegistry, LeaseManager, PolicyEngine, ReNotifier, RunTracker,
    TaskPipeline, TelemetryBroadcaster, WorkerConfig,
};
use store::{Database, DocumentStore, Kv};

/// Vigil - multi-tenant content-monitoring worker.
#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Content-monitoring job scheduler and alert dispatcher")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker loops (scheduler, re-notifier, dispatcher)
    Run {
        /// Skip the batch scheduler loop
        #[arg(long)]
        no_scheduler: bool,

        /// Skip the re-notifier loop
        #[arg(long)]
        no_renotifier: bool,

        /// Skip the alert dispatcher loop
        #[arg(long)]
        no_dispatcher: bool,
    },

    /// Enqueue an immediate run for a job and exit
    RunNow {
        /// Job id to run
        job_id: uuid::Uuid,
    },

    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("vigil=debug,scheduler=debug,dispatch=debug,store=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("vigil=info,scheduler=info,dispatch=info,store=info,warn")
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            no_scheduler,
            no_renotifier,
            no_dispatcher,
        } => run_worker(!no_scheduler, !no_renotifier, !no_dispatcher).await,
        Commands::RunNow { job_id } => enqueue_run(job_id).await,
        Commands::Config => {
            let config = WorkerConfig::from_env();
            println!("{config:#?}");
            Ok(())
        }
    }
}

/// Push an immediate-run request onto the job queue. The next scheduler tick
/// (on whichever worker wins the immediate-run lock) picks it up.
async fn enqueue_run(job_id: uuid::Uuid) -> Result<()> {
    let config = WorkerConfig::from_env();
    let kv = Kv::connect(&config.redis_url).await?;

    let entry = serde_json::json!({ "job_id": job_id, "action": "run_now" });
    kv.push(scheduler::scheduler::JOB_QUEUE, &entry.to_string())
        .await?;

    println!("Immediate run enqueued for job {job_id}");
    Ok(())
}

async fn run_worker(
    with_scheduler: bool,
    with_renotifier: bool,
    with_dispatcher: bool,
) -> Result<()> {
    let config = WorkerConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();

    info!(
        worker_id = %config.worker_id,
        max_concurrent_jobs = config.max_concurrent_jobs,
        max_concurrent_sources = config.max_concurrent_sources,
        job_batch_size = config.job_batch_size,
        "Worker starting"
    );

    let kv = Kv::connect(&config.redis_url).await?;
    let db = Database::connect(&config.database_url).await?;
    let docs = DocumentStore::new(config.docstore_url.clone(), config.internal_api_key.clone())?;

    let shutdown = CancellationToken::new();
    let mut loops = Vec::new();

    if with_scheduler {
        let registry = JobRegistry::new(
            config.registry_url.clone(),
            config.internal_api_key.clone(),
            kv.clone(),
        )?;
        let lease = LeaseManager::new(kv.clone(), config.worker_id.clone());
        let telemetry = TelemetryBroadcaster::new(config.dashboard_url.clone());
        let tracker = Arc::new(RunTracker::new());
        let sources_semaphore = Arc::new(Semaphore::new(config.max_concurrent_sources));

        let scraper = scheduler::ScraperClient::new(
            config.scraper_url.clone(),
            config.internal_api_key.clone(),
        )?;
        let analyzer = scheduler::AnalyzerClient::new(
            config.analyzer_url.clone(),
            config.internal_api_key.clone(),
            config.analysis_model.clone(),
        )?;
        let pipeline = Arc::new(TaskPipeline::new(
            scraper,
            analyzer,
            PolicyEngine::new(kv.clone()),
            db.clone(),
            docs.clone(),
            telemetry.clone(),
            kv.clone(),
            Arc::clone(&tracker),
        ));

        let batch_scheduler = BatchScheduler::new(
            &config,
            registry,
            lease,
            pipeline,
            tracker,
            db.clone(),
            docs.clone(),
            telemetry,
            kv.clone(),
            sources_semaphore,
        );

        let token = shutdown.clone();
        loops.push(tokio::spawn(async move {
            batch_scheduler.run_forever(token).await;
        }));
    }

    if with_renotifier {
        let renotifier = ReNotifier::new(db.clone(), kv.clone(), config.renotify_interval);
        let token = shutdown.clone();
        loops.push(tokio::spawn(async move {
            renotifier.run_forever(token).await;
        }));
    }

    if with_dispatcher {
        let dispatcher = Dispatcher::new(kv.clone(), db.clone(), &dispatch_config)?;
        let token = shutdown.clone();
        loops.push(tokio::spawn(async move {
            dispatcher.run_forever(token).await;
        }));
    }

    if loops.is_empty() {
        error!("All worker loops disabled, nothing to run");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining in-flight work");
    shutdown.cancel();

    for handle in loops {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker loop ended abnormally");
        }
    }

    info!("Worker stopped");
    Ok(())
}
