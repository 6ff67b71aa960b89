//! estuary - MySQL to Elasticsearch replication river
//!
//! # Usage
//!
//! ```bash
//! # Run the river
//! estuary -c estuary.yaml
//!
//! # Validate configuration
//! estuary -c estuary.yaml validate
//!
//! # Show the saved replication position
//! estuary -c estuary.yaml position
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use estuary::position::{FilePositionStore, PositionStore};
use estuary::{River, RiverConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "estuary")]
#[command(version, about = "MySQL to Elasticsearch replication river")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "estuary.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the river (default)
    Run,
    /// Validate the configuration file
    Validate,
    /// Show the saved replication position
    Position,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = RiverConfig::from_file(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            println!("configuration OK: {} rules", config.rules.len());
            Ok(())
        }
        Commands::Position => {
            let store = FilePositionStore::new(&config.position.file);
            match store.load().await? {
                Some(pos) => println!("{pos}"),
                None => println!("no position saved yet"),
            }
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: RiverConfig) -> Result<()> {
    let river = River::new(config);

    let shutdown = river.shutdown();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.trip("interrupt received");
        }
    });

    match river.run().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_shutdown() => {
            warn!("stopped: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "estuary=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
