//! Service error taxonomy surfaced at component boundaries.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use derive_more::{Display, Error};
use tracing::instrument;

use crate::db::{DbError, LedgerError, StoreError};

/// Terminal failure of a service operation.
///
/// Every failure path is a distinct variant rather than a control-flow
/// exception, and each surfaces verbatim to the caller as the terminal
/// result of the request.
#[derive(Debug, Clone, Display, Error)]
pub enum ServiceError {
    /// No verified caller identity was presented.
    #[display("No verified caller identity")]
    Unauthorized,
    /// Admission or debit rejected for lack of tokens.
    #[display("Insufficient balance for '{}'", identity)]
    InsufficientBalance {
        /// Identity whose request was rejected.
        identity: String,
    },
    /// The referenced account does not exist.
    #[display("No account for '{}'", identity)]
    AccountNotFound {
        /// Identity whose account is missing.
        identity: String,
    },
    /// The referenced game does not exist.
    #[display("No game with id '{}'", game_id)]
    GameNotFound {
        /// Identifier that failed to resolve.
        game_id: String,
    },
    /// The referenced version does not exist under the game.
    #[display("No version '{}' under game '{}'", version_id, game_id)]
    VersionNotFound {
        /// Game the lookup was scoped to.
        game_id: String,
        /// Version identifier that failed to resolve.
        version_id: String,
    },
    /// The generator or a downstream persistence step errored after debit.
    #[display("Generation failed: {}", message)]
    Generation {
        /// Underlying cause, preserved for the caller.
        message: String,
    },
    /// Storage failure outside a generation session.
    #[display("Storage error: {}", _0)]
    Db(DbError),
}

impl ServiceError {
    /// Wraps an underlying cause as a generation failure.
    #[instrument(skip(cause))]
    pub fn generation(cause: impl std::fmt::Display) -> Self {
        Self::Generation {
            message: cause.to_string(),
        }
    }

    /// Stable error-kind tag used in wire payloads.
    #[instrument(skip(self))]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
            Self::AccountNotFound { .. } => "AccountNotFound",
            Self::GameNotFound { .. } => "GameNotFound",
            Self::VersionNotFound { .. } => "VersionNotFound",
            Self::Generation { .. } => "GenerationFailed",
            Self::Db(_) => "Internal",
        }
    }

    /// HTTP status the error maps to at the gateway.
    #[instrument(skip(self))]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::AccountNotFound { .. }
            | Self::GameNotFound { .. }
            | Self::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Generation { .. } => StatusCode::BAD_GATEWAY,
            Self::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { identity } => {
                Self::InsufficientBalance { identity }
            }
            LedgerError::AccountNotFound { identity } => Self::AccountNotFound { identity },
            LedgerError::Db(db) => Self::Db(db),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::GameNotFound { game_id } => Self::GameNotFound { game_id },
            StoreError::VersionNotFound {
                game_id,
                version_id,
            } => Self::VersionNotFound {
                game_id,
                version_id,
            },
            StoreError::Db(db) => Self::Db(db),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
