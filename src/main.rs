//! Gamesmith - AI game generation gateway.
//!
//! Token-metered generation of browser-playable games with streaming delivery.

#![warn(missing_docs)]

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gamesmith::{
    AccountLedger, AppState, GameStore, GenerationSession, Generator, LlmClient, ServiceConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            host,
            config,
            db_path,
        } => run_server(host, port, config, db_path).await,
    }
}

/// Run the HTTP gateway
async fn run_server(
    host: String,
    port: u16,
    config_path: std::path::PathBuf,
    db_path_override: Option<String>,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting gamesmith gateway");

    let config = load_config(&config_path)?;
    let db_path = db_path_override.unwrap_or_else(|| config.db_path().clone());

    gamesmith::run_migrations(&db_path)?;

    let ledger = AccountLedger::new(db_path.clone(), *config.starting_tokens())?;
    let store = GameStore::new(db_path)?;

    let llm_config = config.create_llm_config()?;
    let generator: Arc<dyn Generator> = Arc::new(LlmClient::new(llm_config));
    let session = GenerationSession::new(ledger.clone(), store.clone(), generator);

    let state = AppState::new(ledger, store, session, *config.token_pack());
    let app = gamesmith::router(state);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!(%host, port, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Loads the service config, falling back to defaults when the file is
/// missing.
fn load_config(path: &std::path::Path) -> Result<ServiceConfig> {
    if path.exists() {
        Ok(ServiceConfig::from_file(path)?)
    } else {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Ok(ServiceConfig::default())
    }
}
