//! Shoal tracker server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shoal_tracker::TrackerIndex;

#[derive(Parser)]
#[command(name = "shoal-tracker")]
#[command(about = "Shoal tracker server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "shoal.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// The `[tracker]` section of the shared config file. Other sections are
/// ignored here.
#[derive(Debug, Clone, Deserialize)]
struct Config {
    #[serde(default)]
    tracker: TrackerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TrackerSection {
    host: String,
    port: u16,
    buffer_size: usize,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            buffer_size: shoal_core::DEFAULT_BUFFER_SIZE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(&cli.config)?;
    let bind = format!("{}:{}", config.tracker.host, config.tracker.port);

    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("Tracker server listening on {}", bind);

    let index = Arc::new(TrackerIndex::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::select! {
        _ = shoal_tracker::run(listener, index, config.tracker.buffer_size, shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    }

    tracing::info!("Tracker server shutting down");
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    } else {
        tracing::info!(
            "No config file at {}, using defaults",
            path.display()
        );
        Ok(Config {
            tracker: TrackerSection::default(),
        })
    }
}
