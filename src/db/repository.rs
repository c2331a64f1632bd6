//! Game store: game records and their append-only version history.

use derive_more::{Display, Error};
use diesel::prelude::*;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{DbError, Game, NewGame, NewVersion, Version, schema};

/// Store for game records and their versions.
///
/// Games are append-mostly: a game row is written once, and versions are
/// only ever appended under it. Concurrent appends to different games never
/// conflict; racing appends to the same game order by write timestamp.
#[derive(Debug, Clone)]
pub struct GameStore {
    db_path: String,
}

impl GameStore {
    /// Creates a store connected to the database at the given path.
    ///
    /// Use `":memory:"` for an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the path is invalid.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String) -> Result<Self, DbError> {
        info!(path = %db_path, "Creating GameStore");
        Ok(Self { db_path })
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))
    }

    /// Creates a new game record with a freshly allocated identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn create_game(&self, owner_id: Option<&str>) -> Result<Game, DbError> {
        debug!(owner = ?owner_id, "Creating game");
        let mut conn = self.connection()?;

        let new_game = NewGame::new(
            Uuid::new_v4().to_string(),
            owner_id.map(|owner| owner.to_string()),
        );

        let game = diesel::insert_into(schema::games::table)
            .values(&new_game)
            .returning(Game::as_returning())
            .get_result(&mut conn)?;

        info!(game_id = %game.id(), owner = ?game.owner_id(), "Game created");
        Ok(game)
    }

    /// Gets a game by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::GameNotFound`] if no record exists. Callers
    /// must treat this as a hard stop, since a version appended under a
    /// missing game would be orphaned.
    #[instrument(skip(self))]
    pub fn get_game(&self, game_id: &str) -> Result<Game, StoreError> {
        debug!(game_id = %game_id, "Looking up game");
        let mut conn = self.connection().map_err(StoreError::from)?;

        let game = schema::games::table
            .find(game_id)
            .first::<Game>(&mut conn)
            .optional()
            .map_err(DbError::from)?;

        game.ok_or_else(|| {
            warn!(game_id = %game_id, "Game not found");
            StoreError::GameNotFound {
                game_id: game_id.to_string(),
            }
        })
    }

    /// Appends a version under the game, returning the written record.
    ///
    /// The version holds the complete artifact, not a diff. The write
    /// timestamp is assigned by the database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, prompt, code), fields(game_id = %game_id, prompt_len = prompt.len(), code_len = code.len()))]
    pub fn append_version(
        &self,
        game_id: &str,
        prompt: &str,
        code: &str,
    ) -> Result<Version, DbError> {
        debug!(game_id = %game_id, "Appending version");
        let mut conn = self.connection()?;

        let new_version = NewVersion::new(
            Uuid::new_v4().to_string(),
            game_id.to_string(),
            prompt.to_string(),
            code.to_string(),
        );

        let version = diesel::insert_into(schema::versions::table)
            .values(&new_version)
            .returning(Version::as_returning())
            .get_result(&mut conn)?;

        info!(
            game_id = %game_id,
            version_id = %version.id(),
            code_len = version.code().len(),
            "Version appended"
        );
        Ok(version)
    }

    /// Gets a single version under a game.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionNotFound`] if no such version exists
    /// under the game.
    #[instrument(skip(self))]
    pub fn get_version(&self, game_id: &str, version_id: &str) -> Result<Version, StoreError> {
        debug!(game_id = %game_id, version_id = %version_id, "Looking up version");
        let mut conn = self.connection().map_err(StoreError::from)?;

        let version = schema::versions::table
            .filter(schema::versions::id.eq(version_id))
            .filter(schema::versions::game_id.eq(game_id))
            .first::<Version>(&mut conn)
            .optional()
            .map_err(DbError::from)?;

        version.ok_or_else(|| {
            warn!(game_id = %game_id, version_id = %version_id, "Version not found");
            StoreError::VersionNotFound {
                game_id: game_id.to_string(),
                version_id: version_id.to_string(),
            }
        })
    }

    /// Lists a game's versions in append order (oldest first).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::GameNotFound`] if the game does not exist.
    #[instrument(skip(self))]
    pub fn list_versions(&self, game_id: &str) -> Result<Vec<Version>, StoreError> {
        debug!(game_id = %game_id, "Listing versions");
        self.get_game(game_id)?;

        let mut conn = self.connection().map_err(StoreError::from)?;
        let versions = schema::versions::table
            .filter(schema::versions::game_id.eq(game_id))
            .order(schema::versions::created_at.asc())
            .load::<Version>(&mut conn)
            .map_err(DbError::from)?;

        info!(game_id = %game_id, count = versions.len(), "Versions loaded");
        Ok(versions)
    }
}

/// Game store operation error.
#[derive(Debug, Clone, Display, Error)]
pub enum StoreError {
    /// No game record exists for the identifier.
    #[display("No game with id '{}'", game_id)]
    GameNotFound {
        /// Identifier that failed to resolve.
        game_id: String,
    },
    /// No version record exists under the game for the identifier.
    #[display("No version '{}' under game '{}'", version_id, game_id)]
    VersionNotFound {
        /// Game the lookup was scoped to.
        game_id: String,
        /// Version identifier that failed to resolve.
        version_id: String,
    },
    /// Underlying database failure.
    #[display("Store storage error: {}", _0)]
    Db(DbError),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}
