//! Command-line interface for gamesmith.

use clap::{Parser, Subcommand};

/// Gamesmith - token-metered AI game generation service
#[derive(Parser, Debug)]
#[command(name = "gamesmith")]
#[command(about = "AI game generation server with per-account token metering", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Path to the service configuration file
        #[arg(short, long, default_value = "gamesmith.toml")]
        config: std::path::PathBuf,

        /// Override the database path from the config file
        #[arg(long)]
        db_path: Option<String>,
    },
}
