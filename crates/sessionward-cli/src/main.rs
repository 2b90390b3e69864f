//! sessionward - sign in to a backend and make authenticated calls from the
//! command line.
//!
//! The session is kept in the configured token storage between runs, so
//! `login` once and every later command reuses (and renews) it.

mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use commands::Commands;
use sessionward_core::Config;

#[derive(Parser)]
#[command(name = "sessionward")]
#[command(about = "Keep a backend session alive and make authenticated calls")]
#[command(version)]
struct Cli {
    /// Backend base URL (overrides config and SESSIONWARD_BASE_URL)
    #[arg(short = 'u', long, global = true)]
    base_url: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = logging::init_tracing(cli.log_dir.as_deref())?;
    info!("sessionward starting");

    let config = apply_cli_overrides(Config::load()?, cli.base_url)?;
    debug!(base_url = %config.base_url, storage = ?config.storage, "Configuration loaded");

    if let Err(e) = cli.command.execute(config).await {
        // Server failures were already shown by the notification sink
        if !commands::already_reported(&e) {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Layer command-line overrides on a loaded config and re-check it.
fn apply_cli_overrides(mut config: Config, base_url: Option<String>) -> Result<Config> {
    if let Some(url) = base_url {
        config.base_url = url;
    }
    config.validate()?;
    Ok(config)
}
