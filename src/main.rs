//! `moonwire` - bridge Moonraker status to a pub/sub sink
//!
//! ```bash
//! # Write a default configuration and exit
//! moonwire --config moonwire.toml --generate-config
//!
//! # Run (creates moonwire.toml with defaults if missing)
//! moonwire --config moonwire.toml
//! ```
//!
//! Environment variables such as `MOONRAKER_HOST` or `LOG_LEVEL` override
//! the file. The first Ctrl+C shuts down gracefully; a second one, or ten
//! seconds without finishing, forces the exit.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use moonwire_bridge::{install_signal_handlers, Bridge, Config, LogPublisher, DEFAULT_CONFIG_FILE};
use moonwire_core::{init_observability, shutdown_observability};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge Moonraker JSON-RPC status to a pub/sub sink", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write a default configuration file to --config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        Config::generate_default(&args.config).with_context(|| {
            format!("Failed to generate config at {}", args.config.display())
        })?;
        println!("Default configuration generated at {}", args.config.display());
        return Ok(());
    }

    let config = Config::load_or_create(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    init_observability(config.observability())
        .map_err(|e| anyhow!(e))
        .context("Failed to initialize logging")?;

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone()).context("Failed to install signal handlers")?;

    let result = Bridge::new(config, Arc::new(LogPublisher::new()))
        .run(shutdown)
        .await
        .context("Bridge failed");

    tracing::info!("Shutdown complete");
    shutdown_observability();
    result
}
