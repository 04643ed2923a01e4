mod api;
mod config;
mod error;
mod supervisor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use storage::{AggregateStore, ReplicatedStore, SqliteKeySpace};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "wikistats.toml";

#[derive(Parser)]
#[command(name = "wikistats")]
#[command(about = "Live counters over the Wikimedia recent-changes stream", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the stream and serve the API (default)
    Serve,
    /// Print the counters held in the sqlite database
    Stats,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;
    config.apply_overrides(|var| std::env::var(var).ok())?;

    match cli.command {
        Some(Commands::Serve) | None => supervisor::run(config).await,
        Some(Commands::Stats) => cmd_stats(&config).await,
    }
}

async fn cmd_stats(config: &Config) -> Result<()> {
    let path = &config.storage.path;
    if !path.exists() {
        return Err(Error::DatabaseNotFound { path: path.clone() });
    }

    let store = ReplicatedStore::new(SqliteKeySpace::open(path)?);
    println!("{}", store.stats().await?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
