use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tenderflow_core::JobStatus;
use tenderflow_sync::{
    build_scheduler, export_tenders, load_schedules, BatchCancel, BatchOptions, BatchOutcome, ExportFormat,
    ScraperService, ServiceConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tenderflow-cli")]
#[command(about = "Public tender scraping orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the registered procurement platforms.
    Platforms,
    /// Scrape a single platform.
    Scrape {
        platform_id: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Scrape several platforms in paced chunks. All platforms when none are given.
    Batch {
        platform_ids: Vec<String>,
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        #[arg(long, default_value_t = 5000)]
        delay_ms: u64,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Probe the LLM provider and the crawler service.
    Health,
    /// Run the configured schedules until interrupted.
    Schedule {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Repeat failed acquisitions up to the platform's maxRetries.
    #[arg(long)]
    retry: bool,
    /// Write extracted tenders and a manifest into this directory.
    #[arg(long)]
    export_dir: Option<PathBuf>,
    #[arg(long, value_delimiter = ',', default_value = "json")]
    format: Vec<ExportFormat>,
}

fn init_telemetry() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tenderflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry();
    let cli = Cli::parse();
    let config = ServiceConfig::from_env();
    let service = ScraperService::from_config(&config)?;

    match cli.command.unwrap_or(Commands::Health) {
        Commands::Platforms => print_json(&service.get_platforms())?,
        Commands::Scrape { platform_id, run } => {
            let options = BatchOptions {
                retry_acquisition: run.retry,
                ..BatchOptions::default()
            };
            let summary = service.start_scraping(&platform_id, &options).await?;
            if let Some(dir) = &run.export_dir {
                export_tenders(dir, &summary.data, &run.format).await?;
            }
            print_json(&summary)?;
        }
        Commands::Batch {
            platform_ids,
            concurrency,
            delay_ms,
            run,
        } => {
            let ids = if platform_ids.is_empty() {
                service.get_platforms().iter().map(|p| p.id.clone()).collect()
            } else {
                platform_ids
            };
            let options = BatchOptions {
                concurrency,
                per_batch_delay: Duration::from_millis(delay_ms),
                retry_acquisition: run.retry,
                ..BatchOptions::default()
            };

            let cancel = BatchCancel::new();
            let trigger = cancel.clone();
            let interrupted = service.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling batch");
                    trigger.cancel();
                    interrupted.stop_all_jobs().await;
                }
            });

            let outcomes = service.batch_scrape_with_cancel(&ids, &options, &cancel).await;
            let completed = outcomes
                .iter()
                .filter(|o| o.status() == JobStatus::Completed)
                .count();
            info!(total = outcomes.len(), completed, "batch finished");

            if let Some(dir) = &run.export_dir {
                let records: Vec<_> = outcomes
                    .iter()
                    .filter_map(|o| match o {
                        BatchOutcome::Completed { data, .. } => Some(data.iter().cloned()),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                export_tenders(dir, &records, &run.format).await?;
            }
            print_json(&outcomes)?;
        }
        Commands::Health => print_json(&service.health_check().await)?,
        Commands::Schedule { file } => {
            let path = file.unwrap_or_else(|| config.schedules_file.clone());
            let schedules = load_schedules(&path)?;
            let mut sched = build_scheduler(&service, &schedules, &BatchOptions::default()).await?;
            sched.start().await.context("starting scheduler")?;
            info!(schedules = schedules.len(), file = %path.display(), "scheduler running, ctrl-c to stop");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            let stopped = service.stop_all_jobs().await;
            sched.shutdown().await.context("stopping scheduler")?;
            info!(stopped, "scheduler shut down");
        }
    }

    Ok(())
}
