// src/main.rs

use anyhow::Result;
use clap::Parser;
use dbbackup::cli::command::{backup_database, run_worker};
use dbbackup::cli::{Cli, Commands};
use dbbackup::config::get_all_config;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Commands::Version = cli.command {
        println!("dbbackup v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Shared object storage settings must be valid before anything is scheduled.
    let config = match get_all_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            anyhow::bail!(e);
        }
    };

    match cli.command {
        Commands::Run => run_worker(&config).await,
        Commands::Backup { database_name } => backup_database(&config, &database_name).await,
        Commands::Version => Ok(()),
    }
}
