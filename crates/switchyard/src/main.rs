//! # switchyard
//!
//! Control-plane server binary: loads settings, installs logging and
//! metrics, starts the fabric and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use switchyard_server::Fabric;
use switchyard_settings::{LogLevel, SwitchyardSettings};

/// Switchyard control-plane server.
#[derive(Parser, Debug)]
#[command(name = "switchyard", about = "Real-time control plane for frp agents and dashboards")]
struct Cli {
    /// Settings file (defaults to `~/.switchyard/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level fallback when `RUST_LOG` is unset (overrides settings).
    #[arg(long, value_parser = parse_level)]
    log_level: Option<LogLevel>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,

    /// Seconds to wait for registries to drain on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,
}

fn parse_level(val: &str) -> std::result::Result<LogLevel, String> {
    LogLevel::parse(val).ok_or_else(|| format!("unknown log level '{val}'"))
}

impl Cli {
    fn apply(&self, settings: &mut SwitchyardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load(cli: &Cli) -> Result<SwitchyardSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(switchyard_settings::settings_path);
    let mut settings = switchyard_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    if settings.logging.json {
        switchyard_logging::init_json_subscriber(settings.logging.level.as_str());
    } else {
        switchyard_logging::init_subscriber(settings.logging.level.as_str());
    }

    let metrics = if cli.no_metrics {
        None
    } else {
        Some(switchyard_server::metrics::install_recorder().context("Failed to install metrics recorder")?)
    };

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let fabric = Fabric::start(settings);
    let server = switchyard_server::listen(fabric.clone(), metrics, &addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Switchyard listening on http://{}", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = fabric
        .shutdown(Some(Duration::from_secs(cli.shutdown_timeout)))
        .await;
    server.join().await;
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
