//! Shoal - swarm file distribution peer

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shoal_peer::{Config, JobStatus, Peer};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Swarm file distribution with reputation-biased peer selection", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "shoal.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (overrides config)
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a file with the swarm
    Share {
        /// Path to the file to share
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Download a file by its whole-file SHA-256 hash
    Download {
        /// Hex-encoded file hash
        #[arg(required = true)]
        hash: String,

        /// Copy the finished file here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Search the tracker for files by name
    Search {
        /// Search term (case-insensitive substring)
        #[arg(required = true)]
        query: String,
    },

    /// Run as a daemon, seeding everything already in the store
    Daemon,
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

    let mut config = Config::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let peer = Peer::start(config).await?;
    tracing::info!("Peer {} ready", peer.peer_id());

    match cli.command {
        Commands::Share { file } => {
            let descriptor = peer.share(&file).await?;
            println!("Shared: {}", descriptor.name);
            println!("Hash: {}", descriptor.hash);
            println!(
                "Size: {} bytes ({} chunks)",
                descriptor.size, descriptor.chunk_count
            );
            println!();
            println!("Seeding. Press Ctrl+C to stop.");
            wait_for_shutdown(&peer).await;
        }
        Commands::Download { hash, output } => {
            let status = peer.download(&hash, output).await;
            match status {
                JobStatus::Complete => {
                    let snapshot = peer.downloads();
                    if let Some(job) = snapshot.history.first() {
                        if let Some(path) = &job.final_path {
                            println!("Downloaded successfully: {}", path.display());
                        }
                    }
                    println!("Seeding. Press Ctrl+C to stop.");
                    wait_for_shutdown(&peer).await;
                }
                status => {
                    println!("Download finished with status: {}", status);
                    peer.shutdown().await;
                    std::process::exit(1);
                }
            }
        }
        Commands::Search { query } => {
            let results = peer.search(&query).await?;
            if results.is_empty() {
                println!("No results for '{}'", query);
            } else {
                println!("Found {} result(s) for '{}':", results.len(), query);
                println!();
                for (i, hit) in results.iter().enumerate() {
                    println!(
                        "{}. {} ({} bytes, {} seeder(s))",
                        i + 1,
                        hit.name,
                        hit.size,
                        hit.seeders
                    );
                    println!("   Hash: {}", hit.hash);
                }
            }
            peer.shutdown().await;
        }
        Commands::Daemon => {
            let files = peer.my_files();
            println!("Seeding {} file(s). Press Ctrl+C to stop.", files.len());
            for descriptor in files {
                println!(
                    "  - {} ({} bytes, {} chunks)",
                    descriptor.name, descriptor.size, descriptor.chunk_count
                );
            }
            wait_for_shutdown(&peer).await;
        }
    }

    Ok(())
}

async fn wait_for_shutdown(peer: &Peer) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");
    peer.shutdown().await;
}
