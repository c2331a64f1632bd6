//! Database persistence layer: token accounts, games, and version history.

mod error;
mod ledger;
mod models;
mod repository;
mod schema; // Diesel generated schema - internal use only

pub use error::DbError;
pub use ledger::{AccountLedger, LedgerError};
pub use models::{Account, Game, NewAccount, NewGame, NewVersion, Version};
pub use repository::{GameStore, StoreError};

use diesel::Connection;
use diesel::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{info, instrument};

/// Embedded schema migrations, applied at startup and in test setup.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies any pending migrations to the database at the given path.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or a migration fails.
#[instrument(skip(db_path), fields(db_path = %db_path))]
pub fn run_migrations(db_path: &str) -> Result<(), DbError> {
    info!(path = %db_path, "Running pending migrations");
    let mut conn = SqliteConnection::establish(db_path)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::new(format!("Migration failed: {}", e)))?;
    Ok(())
}
