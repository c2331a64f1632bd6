//! Gamesmith library - token-metered AI game generation.
//!
//! An authenticated user requests generation or revision of a
//! browser-playable game, pays one token per request from a per-account
//! balance, and receives the generated artifact as a live chunk stream.
//! Every generated variant is persisted as an immutable version under a
//! game record; failures after the debit are compensated with a refund.
//!
//! # Architecture
//!
//! - **Ledger**: atomic per-account token balance ([`AccountLedger`])
//! - **Store**: game records and append-only version history ([`GameStore`])
//! - **Session**: one request's debit/stream/persist/refund lifecycle
//!   ([`GenerationSession`])
//! - **Gateway**: axum HTTP surface with SSE streaming ([`router`])
//! - **LLM**: provider-abstracted streaming completions ([`LlmClient`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gamesmith::{
//!     AccountLedger, AppState, GameStore, GenerationSession, Generator,
//!     LlmClient, LlmConfig, LlmProvider,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! gamesmith::run_migrations("gamesmith.db")?;
//!
//! let ledger = AccountLedger::new("gamesmith.db".to_string(), 5)?;
//! let store = GameStore::new("gamesmith.db".to_string())?;
//!
//! let config = LlmConfig::new(
//!     LlmProvider::OpenAI,
//!     "api-key".to_string(),
//!     "gpt-4o-mini".to_string(),
//!     16384,
//! );
//! let generator: Arc<dyn Generator> = Arc::new(LlmClient::new(config));
//! let session = GenerationSession::new(ledger.clone(), store.clone(), generator);
//!
//! let app = gamesmith::router(AppState::new(ledger, store, session, 5));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod config;
mod db;
mod error;
mod gateway;
mod generation;
mod llm_client;

// Crate-level exports - Service configuration
pub use config::{ConfigError, ServiceConfig};

// Crate-level exports - Persistence
pub use db::{
    Account, AccountLedger, DbError, Game, GameStore, LedgerError, MIGRATIONS, StoreError,
    Version, run_migrations,
};

// Crate-level exports - Error taxonomy
pub use error::ServiceError;

// Crate-level exports - Generation session
pub use generation::{
    ChunkStream, GENERATION_COST, GenerateRequest, GenerationOutcome, GenerationSession,
    Generator, SessionState,
};

// Crate-level exports - Gateway
pub use gateway::{AppState, Identity, router};

// Crate-level exports - LLM client
pub use llm_client::{LlmClient, LlmConfig, LlmError, LlmProvider};
