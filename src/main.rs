use anyhow::{Context, Result};
use clap::Parser;
use recipe_jobs_server::config::{AppConfig, CliConfig, EmailBackendKind, FileConfig};
use recipe_jobs_server::content_store::SqliteContentStore;
use recipe_jobs_server::import::MealDbClient;
use recipe_jobs_server::job_store::{RetryPolicy, SqliteJobStore};
use recipe_jobs_server::metrics;
use recipe_jobs_server::recommendations::create_email_sender;
use recipe_jobs_server::{Collaborators, JobsRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding jobs.db and content.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Where recommendation emails go.
    #[clap(long, value_enum, default_value_t = EmailBackendKind::Log)]
    pub email_backend: EmailBackendKind,

    /// Base URL of the recipe lookup API.
    #[clap(long)]
    pub mealdb_base_url: Option<String>,
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
            info!("Loading config from {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        metrics_port: cli_args.metrics_port,
        email_backend: cli_args.email_backend,
        mealdb_base_url: cli_args.mealdb_base_url.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening job database at {:?}...", config.jobs_db_path());
    let job_store = Arc::new(SqliteJobStore::new(
        config.jobs_db_path(),
        RetryPolicy::new(&config.retry),
    )?);

    info!("Opening content database at {:?}...", config.content_db_path());
    let content_store = Arc::new(SqliteContentStore::new(config.content_db_path())?);

    info!("Recipe lookup configured at {}", config.import.base_url);
    let lookup = Arc::new(MealDbClient::new(
        &config.import.base_url,
        Duration::from_secs(config.import.timeout_secs),
    )?);
    let email_sender = create_email_sender(config.email_backend, config.smtp.as_ref())?;

    let shutdown_token = CancellationToken::new();
    let runtime = JobsRuntime::start(
        &config,
        job_store.clone(),
        Collaborators {
            content_store,
            lookup,
            email_sender,
        },
        shutdown_token.clone(),
    )
    .await?;

    let metrics_handle = tokio::spawn(metrics::run_metrics_server(
        config.metrics_port,
        job_store,
        shutdown_token.clone(),
    ));

    info!("Ready!");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");

    runtime.shutdown().await;
    match metrics_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server error: {:#}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
