//! Account ledger: atomic token balance operations.

use derive_more::{Display, Error};
use diesel::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::db::{Account, DbError, NewAccount, schema};

/// Ledger over per-user token balances.
///
/// Balances are only mutated through single-statement atomic updates, so
/// concurrent requests for the same account never lose updates and the
/// balance can never go negative: the debit is conditional on sufficient
/// funds at the database level, not on any earlier read.
#[derive(Debug, Clone)]
pub struct AccountLedger {
    db_path: String,
    starting_tokens: i32,
}

impl AccountLedger {
    /// Creates a ledger backed by the database at the given path.
    ///
    /// `starting_tokens` is the balance granted to lazily created accounts.
    /// Use `":memory:"` for an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the path is invalid.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String, starting_tokens: i32) -> Result<Self, DbError> {
        info!(path = %db_path, starting_tokens, "Creating AccountLedger");
        Ok(Self {
            db_path,
            starting_tokens,
        })
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))
    }

    /// Returns the existing account for the identity, creating one with the
    /// default starting balance if none exists.
    ///
    /// Racing calls for the same identity create exactly one row: creation
    /// is an `INSERT OR IGNORE` keyed by identity, followed by a read.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn ensure_account(&self, identity: &str) -> Result<Account, DbError> {
        debug!(identity = %identity, "Ensuring account exists");
        let mut conn = self.connection()?;

        let new_account = NewAccount::new(identity.to_string(), self.starting_tokens);
        let created = diesel::insert_into(schema::accounts::table)
            .values(&new_account)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;

        if created > 0 {
            info!(identity = %identity, tokens = self.starting_tokens, "Account created");
        }

        let account = schema::accounts::table
            .find(identity)
            .first::<Account>(&mut conn)?;

        debug!(identity = %identity, tokens = account.tokens(), "Account loaded");
        Ok(account)
    }

    /// Gets an account by identity. Returns `None` if not found.
    ///
    /// Never creates an account; admission pre-checks use this so that only
    /// the bootstrap entry point creates accounts.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_account(&self, identity: &str) -> Result<Option<Account>, DbError> {
        debug!(identity = %identity, "Looking up account");
        let mut conn = self.connection()?;

        let account = schema::accounts::table
            .find(identity)
            .first::<Account>(&mut conn)
            .optional()?;

        if account.is_none() {
            debug!(identity = %identity, "Account not found");
        }

        Ok(account)
    }

    /// Atomically decrements the balance, failing if funds are insufficient.
    ///
    /// Implemented as a single conditional update
    /// (`tokens = tokens - amount WHERE tokens >= amount`), so two racing
    /// debits can never overdraw the account. An absent account debits like
    /// a zero balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if the balance is below
    /// `amount` (or no account exists), [`LedgerError::Db`] on database
    /// errors.
    #[instrument(skip(self))]
    pub fn debit(&self, identity: &str, amount: i32) -> Result<(), LedgerError> {
        debug!(identity = %identity, amount, "Debiting tokens");
        let mut conn = self.connection()?;

        let updated = diesel::update(
            schema::accounts::table
                .filter(schema::accounts::id.eq(identity))
                .filter(schema::accounts::tokens.ge(amount)),
        )
        .set(schema::accounts::tokens.eq(schema::accounts::tokens - amount))
        .execute(&mut conn)
        .map_err(DbError::from)?;

        if updated == 0 {
            warn!(identity = %identity, amount, "Debit rejected: insufficient balance");
            return Err(LedgerError::InsufficientBalance {
                identity: identity.to_string(),
            });
        }

        info!(identity = %identity, amount, "Tokens debited");
        Ok(())
    }

    /// Atomically increments the balance.
    ///
    /// A pure relative increment, never an overwrite of an absolute value,
    /// so it succeeds regardless of concurrent modification of the account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] if no account exists for the
    /// identity, [`LedgerError::Db`] on database errors.
    #[instrument(skip(self))]
    pub fn credit(&self, identity: &str, amount: i32) -> Result<(), LedgerError> {
        debug!(identity = %identity, amount, "Crediting tokens");
        let mut conn = self.connection()?;

        let updated = diesel::update(schema::accounts::table.filter(schema::accounts::id.eq(identity)))
            .set(schema::accounts::tokens.eq(schema::accounts::tokens + amount))
            .execute(&mut conn)
            .map_err(DbError::from)?;

        if updated == 0 {
            warn!(identity = %identity, "Credit rejected: account not found");
            return Err(LedgerError::AccountNotFound {
                identity: identity.to_string(),
            });
        }

        info!(identity = %identity, amount, "Tokens credited");
        Ok(())
    }
}

/// Ledger operation error.
#[derive(Debug, Clone, Display, Error)]
pub enum LedgerError {
    /// The balance was below the requested debit amount (or no account
    /// exists for the identity).
    #[display("Insufficient balance for '{}'", identity)]
    InsufficientBalance {
        /// Identity whose debit was rejected.
        identity: String,
    },
    /// No account exists for the identity.
    #[display("No account for '{}'", identity)]
    AccountNotFound {
        /// Identity whose account is missing.
        identity: String,
    },
    /// Underlying database failure.
    #[display("Ledger storage error: {}", _0)]
    Db(DbError),
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}
