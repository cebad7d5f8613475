//! Config command - show, initialize or locate the configuration file.

use std::path::Path;

use clap::Subcommand;
use console::style;
use serde_json::json;

use tether_core::config::{AppConfig, ConfigHandle};
use tether_core::error::{TetherError, TetherResult};

use crate::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file path.
    Path,
}

/// Run a config action.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> TetherResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*cfg)?),
                OutputFormat::Text => {
                    let rendered = toml::to_string_pretty(&*cfg)
                        .map_err(|e| TetherError::Config(format!("failed to render config: {e}")))?;
                    println!("{rendered}");
                }
            }
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                return Err(TetherError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                )));
            }
            AppConfig::default().save_to_file(config_path)?;
            match format {
                OutputFormat::Json => println!("{}", json!({"written": config_path.display().to_string()})),
                OutputFormat::Text => println!(
                    "  {} Wrote default config to {}",
                    style("OK").green(),
                    config_path.display()
                ),
            }
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => println!(
                "{}",
                json!({"path": config_path.display().to_string(), "exists": config_path.exists()})
            ),
            OutputFormat::Text => println!("{}", config_path.display()),
        },
    }
    Ok(())
}
