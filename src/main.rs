use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coordinator_core::config::AppConfig;

mod app;
mod shutdown;

use app::{AppMode, Application, Registrations};
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("coordinator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("OpenPenPal distributed task coordination service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config/coordinator.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("Which coordination loops to run")
                .value_parser(["scheduler", "queue-worker", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let mode_str = matches.get_one::<String>("mode").unwrap();
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    init_logging(log_level, log_format)?;

    info!(config = %config_path, mode = %mode_str, "starting coordination service");

    let config = AppConfig::load(Some(config_path))
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    let mode = parse_app_mode(mode_str, &config)?;

    // Job and handler bodies belong to the features that own them; this
    // binary runs with the built-in maintenance jobs only.
    let app = Application::new(config, mode, Registrations::new()).await?;

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!(error = %e, "application exited with error");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Err(e)) => error!(error = %e, "application task failed"),
        Ok(Ok(())) => info!("application stopped cleanly"),
        Err(_) => warn!("shutdown timed out, exiting anyway"),
    }

    Ok(())
}

fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize json logging")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty logging")?,
        _ => return Err(anyhow::anyhow!("unsupported log format: {log_format}")),
    }

    Ok(())
}

fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    match mode_str {
        "scheduler" => {
            if !config.scheduler.enabled {
                return Err(anyhow::anyhow!("scheduler is disabled in configuration"));
            }
            Ok(AppMode::Scheduler)
        }
        "queue-worker" => {
            if !config.delay_queue.enabled {
                return Err(anyhow::anyhow!("delay queue is disabled in configuration"));
            }
            Ok(AppMode::QueueWorker)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("unsupported mode: {mode_str}")),
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received sigterm"),
    }
}
