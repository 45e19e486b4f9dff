// src/cli/args.rs
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dbbackup")]
#[command(about = "Scheduled MySQL/PostgreSQL/ClickHouse backups to S3-compatible storage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Configuration file; without it the S3_*/DB_*_<n> environment layout is read
    #[arg(short, long, env = "DBBACKUP_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker and back up every configured database on its schedule
    Run,

    /// Back up one configured database right now
    Backup {
        /// Database name to backup
        database_name: String,
    },

    /// Show tool version
    Version,
}
