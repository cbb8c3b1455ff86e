//! CLI integration for wgwarden.
//!
//! Parses arguments, loads settings, and maps each subcommand onto the
//! tunnel manager. Ctrl+C and SIGTERM cancel a running tunnel, which then
//! goes through its normal teardown.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wgwarden_core::config::{ConfigError, WardenConfig};
use wgwarden_core::logging::{parse_level, LogOptions};
use wgwarden_core::tunnel::{SupervisionExit, TunnelError, TunnelManager};

/// wgwarden: bring up, verify and supervise a WireGuard tunnel
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the wgwarden settings file
    #[arg(short, long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log level (overrides the settings file)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Also write daily-rolling log files to this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands
#[derive(Subcommand)]
enum Commands {
    /// Bring the tunnel up and keep it up until interrupted
    Up {
        /// WireGuard configuration file
        #[arg(short, long, value_name = "FILE")]
        tunnel: PathBuf,
    },
    /// Tear down whatever an earlier run left behind
    Down,
    /// Print engine status, adapters and routes
    Diagnose,
    /// Print where the WireGuard engine was found
    Locate,
}

/// Error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tunnel error
    #[error("{0}")]
    Tunnel(#[from] TunnelError),

    /// Supervision gave up after a failed restart
    #[error("Tunnel went down and could not be restarted")]
    TunnelLost,
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl Cli {
    /// Logging options from the flags, falling back to the settings file.
    pub fn log_options(&self, settings: Option<&WardenConfig>) -> LogOptions {
        let level = self
            .log_level
            .as_deref()
            .or(settings.map(|s| s.log_level.as_str()))
            .map(parse_level)
            .unwrap_or(tracing::Level::INFO);

        let mut options = LogOptions {
            level,
            json_format: self.json_logs,
            ..Default::default()
        };
        if let Some(dir) = &self.log_dir {
            options.log_to_file = true;
            options.log_dir = dir.to_string_lossy().into_owned();
        }
        options
    }

    pub fn settings_path(&self) -> Option<&Path> {
        self.settings.as_deref()
    }
}

/// Load settings from an explicit path, else the default path when it
/// exists, else built-in defaults.
pub fn load_settings(path: Option<&Path>) -> CliResult<WardenConfig> {
    if let Some(path) = path {
        debug!("Loading settings from {:?}", path);
        return Ok(WardenConfig::load(path)?);
    }

    let default_path = WardenConfig::default_path();
    if default_path.is_file() {
        debug!("Loading settings from {:?}", default_path);
        return Ok(WardenConfig::load(&default_path)?);
    }

    debug!("No settings file, using defaults");
    Ok(WardenConfig::new())
}

/// Run the CLI application
pub async fn run(cli: Cli, settings: WardenConfig) -> CliResult<()> {
    match cli.command {
        Commands::Up { tunnel } => up(&tunnel, settings).await,
        Commands::Down => {
            let mut manager = TunnelManager::new("", settings);
            let report = manager.stop().await?;
            for step in &report.steps {
                match &step.result {
                    Ok(()) => info!(action = step.action, "Teardown step completed"),
                    Err(detail) => debug!(action = step.action, detail = %detail, "Teardown step skipped"),
                }
            }
            if report.artifact_removed {
                info!("Removed configuration file left by an earlier run");
            }
            Ok(())
        }
        Commands::Diagnose => {
            let manager = TunnelManager::new("", settings);
            let report = manager.diagnose().await?;
            println!("{}", report);
            Ok(())
        }
        Commands::Locate => {
            let manager = TunnelManager::new("", settings);
            let engine = manager.locate_engine().await?;
            println!("{}", engine);
            Ok(())
        }
    }
}

async fn up(tunnel: &Path, settings: WardenConfig) -> CliResult<()> {
    let text = fs::read_to_string(tunnel).map_err(|e| {
        error!("Failed to read tunnel configuration {:?}: {}", tunnel, e);
        e
    })?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let mut manager = TunnelManager::new(&text, settings);
    let report = manager.run(cancel).await?;

    info!(
        activated_by = report.activated_by.unwrap_or("none"),
        final_state = %report.final_state,
        "Tunnel session finished"
    );
    if let Some(verification) = &report.verification {
        info!(
            classification = %verification.classification,
            dns_resolved = verification.dns_resolved,
            http_reachable = verification.http_reachable,
            "Verification summary"
        );
    }

    match report.exit {
        SupervisionExit::Cancelled => Ok(()),
        SupervisionExit::RecoveryFailed => Err(CliError::TunnelLost),
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
