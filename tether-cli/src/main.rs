//! Tether CLI - open sessions, watch connectivity, manage config.
//!
//! Useful for poking at an event server from the terminal: register a few
//! handlers, type `EVENT JSON` lines to send, and watch what comes back.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::error::TetherResult;
use tether_core::logging;
use tether_core::platform::Platform;

/// tether - resilient event sessions over WebSocket.
#[derive(Parser)]
#[command(name = "tether", version, about = "Resilient event-multiplexing WebSocket client")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// One JSON object per line, for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a session and print the events it handles.
    Connect(commands::connect::ConnectArgs),
    /// Watch network reachability and latency.
    Probe {
        /// URL to check (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Milliseconds between checks (overrides config).
        #[arg(short, long)]
        interval_ms: Option<u64>,
        /// Stop after this many checks.
        #[arg(short = 'n', long)]
        count: Option<u32>,
    },
    /// Show or initialize the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn resolve_config_path(explicit: Option<&str>) -> TetherResult<PathBuf> {
    match explicit {
        Some(path) => Ok(PathBuf::from(path)),
        None => AppConfig::default_config_path(),
    }
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> TetherResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let config = AppConfig::load_from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> TetherResult<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = load_config(&config_path)?;

    let log_level = if cli.verbose || config.debug {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = if config.logging.directory.is_empty() {
        None
    } else {
        Some(config.effective_log_dir()?)
    };
    let _guard = logging::init_logging(&log_level, log_dir.as_deref(), config.logging.json_output)?;

    info!("tether CLI v{}", tether_core::constants::APP_VERSION);
    debug!("config path: {} ({})", config_path.display(), Platform::current());

    let config_handle = ConfigHandle::new(config);

    match cli.command {
        Commands::Connect(args) => {
            commands::connect::run(config_handle, &config_path, args, cli.format).await
        }
        Commands::Probe { url, interval_ms, count } => {
            commands::probe::run(config_handle, url, interval_ms, count, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
