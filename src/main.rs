//! Deej GW - serial fader controller bridge
//!
//! Maps hardware sliders to master, device and per-application volumes.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deej_gw::bridge::{Bridge, StopReason};
use deej_gw::cli;
use deej_gw::config::ConfigWatcher;
use deej_gw::mixer;
use deej_gw::paths::AppPaths;
use deej_gw::serial::{SerialTransport, SystemSerial};

/// Deej GW - control OS volumes from a serial fader box
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: auto-detected)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Directory for log files (default: logs/ next to the config)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Disable the interactive operator console
    #[arg(long)]
    no_console: bool,

    /// Log volume changes instead of applying them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.list_ports {
        return list_ports_formatted().await;
    }

    let mut paths = match &args.config {
        Some(config) => AppPaths::from_config(config),
        None => AppPaths::detect(),
    };
    if let Some(log_dir) = &args.log_dir {
        paths = paths.with_logs_dir(log_dir);
    }
    paths.ensure_directories()?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting Deej GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());
    info!("Logs directory: {}", paths.logs_dir.display());

    let (config_watcher, config) = match ConfigWatcher::new(paths.config.clone()).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Cannot start without configuration: {:#}", e);
            return Err(e);
        }
    };
    info!("Configuration loaded successfully with hot-reload enabled");

    let transport = Arc::new(SystemSerial::new());
    let sink = mixer::platform_sink(args.dry_run);
    let bridge = Bridge::start(config, transport, sink);

    let commands = if args.no_console {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    } else {
        cli::spawn_console().context("Failed to start operator console")?
    };

    let (_watch_guard, config_updates) = config_watcher.split();

    match bridge.run(config_updates, commands, shutdown_signal()).await {
        Ok(StopReason::Console) => info!("Stopped from console"),
        Ok(StopReason::Signal) | Ok(StopReason::Drained) => {}
        Err(e) => {
            error!("Exiting: {}", e);
            return Err(e.into());
        }
    }

    info!("Deej GW shutdown complete");
    Ok(())
}

fn init_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "deej-gw.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn list_ports_formatted() -> Result<()> {
    println!("\n{}", "=== Available Serial Ports ===".bold().cyan());

    let ports = SystemSerial::new().list().await?;
    if ports.is_empty() {
        println!("  {}", "No serial ports found".dimmed());
        return Ok(());
    }

    for port in ports {
        let marker = match &port.vendor_id {
            Some(_) => "[USB]".green(),
            None => "[OTHER]".yellow(),
        };
        println!(
            "  {} {}  manufacturer: {}  vendor id: {}",
            marker,
            port.path.bold(),
            port.manufacturer.as_deref().unwrap_or("-"),
            port.vendor_id.as_deref().unwrap_or("-"),
        );
    }
    println!();
    Ok(())
}
