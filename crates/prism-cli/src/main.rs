//! prism - a self-maintaining private package index

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use prism_cli::{Cli, Commands, cmd, open_index};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for JSON (worker and inspect)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Worker { kind } => cmd::worker::worker(kind),
        Commands::Inspect { paths } => cmd::inspect::inspect(paths),
        Commands::Update => cmd::update::update(&open_index(&cli)?).await,
        Commands::Rebuild => cmd::rebuild::rebuild(&open_index(&cli)?).await,
        Commands::Sync { from } => cmd::sync::sync(&open_index(&cli)?, from.as_deref()).await,
        Commands::Watch => cmd::watch::watch(open_index(&cli)?).await,
    }
}
