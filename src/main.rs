use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use profile_collector::api::{self, RetrievalApi};
use profile_collector::app::Config;
use profile_collector::collector::{self, CaptureStatus, CleanupStatus, Collector, CycleReport};
use profile_collector::store::LogStore;

/// Profile Collector - captures pt-query-digest / alp output per deployed revision
#[derive(Parser)]
#[command(name = "profile-collector")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Config file (defaults to ~/.config/profile-collector/config.toml)
    #[arg(short, long, env = "PROFILE_COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve captured profiles over HTTP (default)
    Serve,
    /// Run one capture cycle now
    Collect {
        /// Remove the raw logs if every capture was stored
        #[arg(long)]
        cleanup: bool,
    },
    /// Remove the raw slow-query and access logs
    Cleanup,
    /// Print captured revisions as JSON, newest first
    Revisions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let config = Config::load(cli.config.as_deref())?;
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Some(Commands::Collect { cleanup }) => runtime.block_on(collect(&config, cleanup)),
        Some(Commands::Cleanup) => cleanup(&config),
        Some(Commands::Revisions) => print_revisions(&config),
        Some(Commands::Serve) | None => runtime.block_on(serve(config)),
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<LogStore>> {
    let store = LogStore::open(&config.database)
        .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
    Ok(Arc::new(store))
}

async fn serve(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let collector = Arc::new(Collector::from_config(&config, store.clone()));

    let scheduler = if config.capture.interval_secs > 0 {
        Some(collector::spawn_scheduler(
            collector.clone(),
            Duration::from_secs(config.capture.interval_secs),
            config.capture.cleanup_after_cycle,
        ))
    } else {
        info!("Scheduled capture disabled (capture.interval_secs = 0)");
        None
    };

    let app = api::router(RetrievalApi::new(store), &config.http.prefix);
    let listener = tokio::net::TcpListener::bind(&config.http.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.listen))?;
    info!(
        "Serving captures on http://{}{}",
        listener.local_addr()?,
        config.http.prefix
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("HTTP server error")?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    info!("Profile collector stopped");
    Ok(())
}

async fn collect(config: &Config, cleanup: bool) -> Result<()> {
    let store = open_store(config)?;
    let collector = Collector::from_config(config, store);

    let report = collector
        .run_cycle_and_cleanup(cleanup || config.capture.cleanup_after_cycle)
        .await;
    print_report(&report);
    Ok(())
}

fn print_report(report: &CycleReport) {
    let revision = report.revision.tag();
    println!(
        "created_at={} revision={}",
        report.created_at,
        if revision.is_empty() { "(unknown)" } else { revision }
    );
    for capture in &report.captures {
        match &capture.status {
            CaptureStatus::Stored { bytes } => {
                println!("  {}: stored {} bytes", capture.kind, bytes)
            }
            CaptureStatus::ToolFailed(e) => println!("  {}: skipped ({})", capture.kind, e),
            CaptureStatus::StoreFailed(e) => println!("  {}: not stored ({})", capture.kind, e),
        }
    }
}

fn cleanup(config: &Config) -> Result<()> {
    for outcome in collector::remove_logs(&config.cleanup_paths()) {
        match outcome.status {
            CleanupStatus::Removed => println!("removed {}", outcome.path.display()),
            CleanupStatus::Missing => println!("absent  {}", outcome.path.display()),
            CleanupStatus::Failed(e) => eprintln!("failed  {}: {}", outcome.path.display(), e),
        }
    }
    Ok(())
}

fn print_revisions(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let revisions = store.list_revisions()?;
    println!("{}", serde_json::to_string_pretty(&revisions)?);
    Ok(())
}
