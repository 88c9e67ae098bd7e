use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use channel_warehouse::classifier::DetectionClassifier;
use channel_warehouse::config::AppConfig;
use channel_warehouse::db::Database;
use channel_warehouse::detector::{CommandDetector, Detector};
use channel_warehouse::enrich::Enricher;
use channel_warehouse::ingest::Loader;
use channel_warehouse::logging::{init_logging, OperationTimer};
use channel_warehouse::metrics::MetricsCollector;
use channel_warehouse::pipeline::{Pipeline, PipelineStages};
use channel_warehouse::scheduler::PipelineSchedule;
use channel_warehouse::server::{self, AppState};
use channel_warehouse::stage::StageRunner;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once
    Run,
    /// Run the pipeline on the configured cron schedule until Ctrl-C
    Schedule,
    /// Load scraped files into the raw store, without retry
    Load {
        /// Directory to load instead of the configured data root
        #[arg(short, long)]
        data_root: Option<PathBuf>,
    },
    /// Classify images of loaded media messages, without retry
    Enrich,
    /// Serve the reporting API
    Serve {
        /// Address to bind instead of the configured one
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load()?;

    // Initialize logging; the guard flushes the log file on exit
    let log_file = config.logging.file_path.as_deref().map(Path::new);
    let _guard = init_logging(Some(&config.get_log_level()), log_file, config.logging.format == "json")?;

    if let Err(e) = MetricsCollector::init() {
        warn!(error = %e, "Metrics recorder not installed");
    }

    info!("Starting channel-warehouse");

    // Open the database once for the whole process
    config.database.url = config.get_database_url();
    let db = Database::from_config(&config.database).context("Failed to open database")?;

    match cli.command {
        Commands::Run => run_once(&config, db).await,
        Commands::Schedule => run_scheduled(&config, db).await,
        Commands::Load { data_root } => load(&config, &db, data_root),
        Commands::Enrich => enrich(&config, db),
        Commands::Serve { bind } => serve(&config, db, bind).await,
    }
}

fn detector(config: &AppConfig) -> Result<Arc<dyn Detector>> {
    let detector = CommandDetector::from_command_line(&config.enrich.detector_command)
        .context("detector_command cannot be empty")?;
    Ok(Arc::new(detector))
}

fn build_pipeline(config: &AppConfig, db: Database) -> Result<Pipeline> {
    let stages = PipelineStages::from_config(config, &db, detector(config)?)?;
    Ok(Pipeline::new(StageRunner::new(config.retry_policy()), stages))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Trigger one pipeline run manually
async fn run_once(config: &AppConfig, db: Database) -> Result<()> {
    let pipeline = build_pipeline(config, db)?;

    let abort = pipeline.abort_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Ctrl-C received, aborting at the next stage boundary");
        abort.abort();
    });

    let run = pipeline.run().await;
    println!("{}", serde_json::to_string_pretty(&run)?);

    if !run.succeeded() {
        bail!("pipeline run failed");
    }
    Ok(())
}

/// Run the pipeline on its cron schedule until Ctrl-C
async fn run_scheduled(config: &AppConfig, db: Database) -> Result<()> {
    if !config.schedule.enabled {
        warn!("Schedule is disabled in configuration, nothing to do");
        return Ok(());
    }

    let schedule = PipelineSchedule::parse(&config.schedule.cron)?;
    let pipeline = build_pipeline(config, db)?;
    info!(cron = schedule.expression(), "Starting scheduler");

    let runs = schedule.run_until(&pipeline, shutdown_signal()).await?;
    info!(runs, "Scheduler exited");
    Ok(())
}

/// Single load pass, no retry
fn load(config: &AppConfig, db: &Database, data_root: Option<PathBuf>) -> Result<()> {
    let data_root = data_root.unwrap_or_else(|| config.data_root());
    let timer = OperationTimer::new("load");

    let summary = Loader::new(db, config.ingest.manifest_suffix.as_str()).load_dir(&data_root)?;
    timer.finish();

    println!("{summary}");
    Ok(())
}

/// Single enrichment pass, no retry
fn enrich(config: &AppConfig, db: Database) -> Result<()> {
    let classifier = DetectionClassifier::new(
        config.enrich.subject_classes.iter().cloned(),
        config.enrich.product_classes.iter().cloned(),
    );
    let mut enricher = Enricher::new(Arc::new(db), detector(config)?, classifier, &config.enrich.image_root);
    if let Some(csv) = &config.enrich.output_csv {
        enricher = enricher.with_output_csv(csv);
    }

    let timer = OperationTimer::new("enrich");
    let summary = enricher.run()?;
    timer.finish();

    println!("{summary}");
    Ok(())
}

async fn serve(config: &AppConfig, db: Database, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.api.bind_address.clone());
    let state = AppState::new(db, config.api.clone());
    server::serve(state, &bind, shutdown_signal()).await?;
    info!("Reporting API stopped");
    Ok(())
}
