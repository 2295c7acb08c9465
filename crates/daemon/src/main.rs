//! Stagekeeper daemon entry point.
//!
//! Loads configuration, provisions the static stages, starts the web server
//! and result purge, and handles graceful shutdown.

mod purge;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stagekeeper_core::config::AppConfig;
use stagekeeper_core::db::{Database, DB_FILE};
use stagekeeper_core::{CommandBuildFactory, GitClient, Orchestrator};
use stagekeeper_web::WebServer;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Stagekeeper staging daemon.
#[derive(Parser, Debug)]
#[command(
    name = "stagekeeper-daemon",
    version,
    about = "Keeps one staging environment per branch and retires it once merged"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        AppConfig::load_from_file(&args.config).context("failed to load configuration file")?;
    config
        .validate()
        .context("configuration validation failed")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  Stagekeeper Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Projects      : {}", config.envs.len());
    info!("Web listen    : {}", config.web.listen);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Retention     : {} days", config.daemon.retention_days);
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Initialize database
    let db = Database::open_in(&config.daemon.data_dir).context("failed to open result store")?;
    let db = Arc::new(db);
    info!(
        "Database initialized at {}",
        config.daemon.data_dir.join(DB_FILE).display()
    );

    // Provision stages and start the actors
    let factory =
        CommandBuildFactory::new(&config, db.clone()).context("invalid build configuration")?;
    let vcs = GitClient::new(Duration::from_secs(config.daemon.vcs_timeout_secs));
    let orchestrator =
        Arc::new(Orchestrator::start(&config, Arc::new(factory), Arc::new(vcs)).await);

    // Start web server in background
    let web_shutdown = Arc::new(Notify::new());
    let web_server = WebServer::new(config.clone(), db.clone(), orchestrator.clone());
    let listen_addr = config.web.listen.clone();
    let web_stop = web_shutdown.clone();
    let mut web_handle = tokio::spawn(async move {
        if let Err(e) = web_server
            .start(&listen_addr, async move { web_stop.notified().await })
            .await
        {
            error!("Web server error: {}", e);
        }
    });

    // Start result purge in background
    let purge_shutdown = Arc::new(Notify::new());
    let purge_handle = purge::Purger::new(
        db.clone(),
        config.daemon.retention_days,
        Duration::from_secs(config.daemon.purge_interval_secs),
    )
    .map(|purger| {
        let stop = purge_shutdown.clone();
        tokio::spawn(async move { purger.run(stop).await })
    });

    // Wait for a shutdown signal, or for the web server to give up
    let web_finished = tokio::select! {
        _ = signals::wait_for_shutdown() => {
            info!("Shutdown signal received, stopping...");
            false
        }
        _ = &mut web_handle => {
            warn!("web server exited, stopping...");
            true
        }
    };

    if !web_finished {
        web_shutdown.notify_one();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut web_handle).await {
            Ok(Ok(())) => info!("web server stopped gracefully"),
            Ok(Err(e)) => warn!("web server task error: {}", e),
            Err(_) => {
                warn!("web server did not stop within 10s, aborting");
                web_handle.abort();
            }
        }
    }

    if let Some(handle) = purge_handle {
        purge_shutdown.notify_one();
        if let Err(e) = handle.await {
            warn!("purge task error: {}", e);
        }
    }

    // Close the actor queues and let them drain
    match Arc::try_unwrap(orchestrator) {
        Ok(orchestrator) => {
            if tokio::time::timeout(SHUTDOWN_GRACE, orchestrator.shutdown())
                .await
                .is_err()
            {
                warn!("actors did not drain within 10s");
            }
        }
        Err(_) => warn!("orchestrator still referenced, not waiting for actors"),
    }

    info!("Stagekeeper daemon stopped.");
    Ok(())
}
