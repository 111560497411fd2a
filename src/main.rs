//! Stadium Lobby server binary
//!
//! `stadium-lobby` runs the service; `stadium-lobby check` validates the
//! configuration and `stadium-lobby print-config` dumps the effective
//! settings as TOML.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stadium_lobby::config::{validate_config, AppConfig};
use stadium_lobby::service::{AppState, Backends};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stadium-lobby",
    version,
    about = "Lobby lifecycle, server reservations and session fan-out for competitive games"
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the lobby service (default)
    Serve,
    /// Validate the configuration and exit
    Check,
    /// Print the effective configuration as TOML
    PrintConfig,
}

/// Settings that take precedence over the file and environment
#[derive(Args)]
struct Overrides {
    /// TOML configuration file; environment variables are used without one
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `stadium_lobby=trace`
    #[arg(short, long, value_name = "FILTER", global = true)]
    log_level: Option<String>,

    #[arg(long, value_name = "PORT", global = true)]
    health_port: Option<u16>,

    /// Accept servers whose region cannot be resolved
    #[arg(long, global = true)]
    no_region_enforcement: bool,
}

impl Overrides {
    fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::from_env()?,
        };

        if let Some(level) = &self.log_level {
            config.service.log_level = level.clone();
        }
        if let Some(port) = self.health_port {
            config.service.health_port = port;
        }
        if self.no_region_enforcement {
            config.lobby.enforce_region = false;
        }

        validate_config(&config)?;
        Ok(config)
    }
}

/// `RUST_LOG` wins over the configured level
fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Bad log filter {}", level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

async fn shutdown_signal() {
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Interrupted"),
        _ = terminate => info!("Terminated"),
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!(
        name = %config.service.name,
        health_port = config.service.health_port,
        ready_up_timeout = config.lobby.ready_up_timeout_seconds,
        substitute_grace = config.lobby.substitute_grace_seconds,
        enforce_region = config.lobby.enforce_region,
        "Starting stadium-lobby {}",
        stadium_lobby::VERSION
    );

    let backends = Backends::standalone(&config)?;
    let app = Arc::new(
        AppState::new(config.clone(), backends)
            .await
            .context("Failed to initialize service")?,
    );
    app.start().await.context("Failed to start service")?;

    shutdown_signal().await;

    match tokio::time::timeout(config.shutdown_timeout(), app.shutdown()).await {
        Ok(Ok(())) => info!("Shutdown complete"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!(
            "Shutdown took longer than {:?}, exiting anyway",
            config.shutdown_timeout()
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.overrides.load().context("Invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Check => {
            println!("Configuration OK");
            Ok(())
        }
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Serve => {
            init_logging(&config.service.log_level)?;
            serve(config).await
        }
    }
}
