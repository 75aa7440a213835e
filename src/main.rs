use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rental_billing::background_jobs::jobs::setup_billing_cron_job;
use rental_billing::background_jobs::{create_scheduler, JobContext};
use rental_billing::billing::BillingProcessor;
use rental_billing::billing_store::{InvoiceStore, SqliteInvoiceStore};
use rental_billing::config;
use rental_billing::server::{metrics, run_metrics_server};
use rental_billing::server_store::{ServerStore, SqliteServerStore};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (billing.db, server.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Invoice schedules due within this many days are generated ahead of time.
    #[clap(long)]
    pub lookahead_days: Option<u32>,

    /// Run the billing jobs once for today and exit instead of scheduling them.
    #[clap(long)]
    pub run_once: bool,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            metrics_port: args.metrics_port,
            lookahead_days: args.lookahead_days,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // TOML overrides CLI
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  metrics_port: {}", app_config.metrics_port);
    info!("  lookahead_days: {}", app_config.billing.lookahead_days);

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!(
        "Opening billing database at {:?}...",
        app_config.billing_db_path()
    );
    let invoice_store: Arc<dyn InvoiceStore> =
        Arc::new(SqliteInvoiceStore::new(app_config.billing_db_path())?);

    let shutdown_token = CancellationToken::new();
    let processor = Arc::new(
        BillingProcessor::new(invoice_store, app_config.billing.clone())
            .with_cancellation(shutdown_token.child_token()),
    );

    if cli_args.run_once {
        let today = Utc::now().date_naive();
        let summary = processor.run_billing_cron_jobs(today).await;
        info!("Billing run finished: {:?}", summary);
        if !summary.is_success() {
            anyhow::bail!("Billing run for {} did not complete cleanly", today);
        }
        return Ok(());
    }

    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(app_config.server_db_path())?);

    let job_context = JobContext::new(shutdown_token.child_token());
    let (mut scheduler, scheduler_handle) =
        create_scheduler(server_store, shutdown_token.clone(), job_context);

    setup_billing_cron_job(&mut scheduler, processor, &app_config.billing).await;

    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );
    for job in scheduler_handle.list_jobs().await? {
        info!(
            "  {} ({}): {}, last run: {}",
            job.id,
            job.schedule.schedule_type,
            job.description,
            job.last_run
                .map(|run| format!("{} at {}", run.status, run.started_at))
                .unwrap_or_else(|| "never".to_string())
        );
    }

    let scheduler_task = tokio::spawn(async move { scheduler.run().await });
    let metrics_task = tokio::spawn(run_metrics_server(
        app_config.metrics_port,
        shutdown_token.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Initiating graceful shutdown");
    shutdown_token.cancel();

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    match metrics_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server failed: {:#}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
