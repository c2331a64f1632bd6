//! HTTP gateway: authentication, admission, and the streaming entry point.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::db::{Account, AccountLedger, GameStore, Version};
use crate::error::ServiceError;
use crate::generation::{GENERATION_COST, GenerateRequest, GenerationOutcome, GenerationSession};

/// Bound on in-flight chunks between a session and a slow caller; a full
/// channel suspends the forward without reordering.
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Shared per-request state handed to handlers.
#[derive(Clone)]
pub struct AppState {
    ledger: AccountLedger,
    store: GameStore,
    session: GenerationSession,
    token_pack: i32,
}

impl AppState {
    /// Creates the gateway state.
    ///
    /// `token_pack` is the number of tokens credited per purchase.
    #[instrument(skip(ledger, store, session))]
    pub fn new(
        ledger: AccountLedger,
        store: GameStore,
        session: GenerationSession,
        token_pack: i32,
    ) -> Self {
        info!(token_pack, "Creating gateway state");
        Self {
            ledger,
            store,
            session,
            token_pack,
        }
    }
}

/// Verified caller identity.
///
/// Extracted from the `Authorization: Bearer` header; verification itself
/// belongs to the external identity provider, so by the time a request
/// reaches this service the bearer value is the verified subject.
#[derive(Debug, Clone)]
pub struct Identity(String);

impl Identity {
    /// The verified subject string.
    #[instrument(skip(self))]
    pub fn subject(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|subject| !subject.is_empty());

        match subject {
            Some(subject) => Ok(Identity(subject.to_string())),
            None => {
                warn!("Request without verified identity");
                Err(ServiceError::Unauthorized)
            }
        }
    }
}

/// Builds the gateway router over the given state.
#[instrument(skip(state))]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/games/generate", post(generate_game))
        .route("/api/account", get(get_account))
        .route("/api/account/tokens", post(buy_tokens))
        .route("/api/games/{game_id}/versions", get(list_versions))
        .route(
            "/api/games/{game_id}/versions/{version_id}",
            get(get_version),
        )
        .with_state(state)
}

/// Returns the caller's account, lazily creating it with the default
/// starting balance. The only entry point that may create an account
/// without a prior debit.
#[instrument(skip(state, identity), fields(identity = %identity.subject()))]
async fn get_account(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Account>, ServiceError> {
    debug!("Fetching account");
    let account = state.ledger.ensure_account(identity.subject())?;
    Ok(Json(account))
}

/// Credits a token pack to an existing account.
#[instrument(skip(state, identity), fields(identity = %identity.subject()))]
async fn buy_tokens(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Account>, ServiceError> {
    debug!(amount = state.token_pack, "Purchasing tokens");
    state.ledger.credit(identity.subject(), state.token_pack)?;

    let account = state
        .ledger
        .get_account(identity.subject())?
        .ok_or_else(|| ServiceError::AccountNotFound {
            identity: identity.subject().to_string(),
        })?;

    info!(tokens = account.tokens(), "Tokens purchased");
    Ok(Json(account))
}

/// Lists a game's versions in append order.
#[instrument(skip(state, identity), fields(identity = %identity.subject(), game_id = %game_id))]
async fn list_versions(
    State(state): State<AppState>,
    identity: Identity,
    Path(game_id): Path<String>,
) -> Result<Json<Vec<Version>>, ServiceError> {
    let versions = state.store.list_versions(&game_id)?;
    Ok(Json(versions))
}

/// Gets a single version under a game.
#[instrument(skip(state, identity), fields(identity = %identity.subject(), game_id = %game_id, version_id = %version_id))]
async fn get_version(
    State(state): State<AppState>,
    identity: Identity,
    Path((game_id, version_id)): Path<(String, String)>,
) -> Result<Json<Version>, ServiceError> {
    let version = state.store.get_version(&game_id, &version_id)?;
    Ok(Json(version))
}

/// Relay state for the SSE stream: chunks first, then one terminal event.
enum RelayState {
    Streaming(
        mpsc::Receiver<String>,
        JoinHandle<Result<GenerationOutcome, ServiceError>>,
    ),
    Done,
}

/// Runs a generation session, streaming chunks as SSE `chunk` events and
/// finishing with one `result` or `error` event.
///
/// The balance pre-check here is an admission gate only: it rejects
/// obviously-ineligible callers cheaply with a clear error before any
/// session work, and never creates an account. Correctness against racing
/// requests rests on the session's atomic debit, not on this check.
#[instrument(skip(state, identity, request), fields(identity = %identity.subject(), game_id = ?request.game_id))]
async fn generate_game(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let balance = state
        .ledger
        .get_account(identity.subject())?
        .map(|account| *account.tokens())
        .unwrap_or(0);
    if balance < GENERATION_COST {
        info!(balance, "Admission rejected: insufficient balance");
        return Err(ServiceError::InsufficientBalance {
            identity: identity.subject().to_string(),
        });
    }
    debug!(balance, "Admission passed");

    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let session = state.session.clone();
    let subject = identity.subject().to_string();
    // The session task is detached from the response: if the caller
    // disconnects, it still runs to a terminal state (version or refund).
    let handle = tokio::spawn(async move { session.run(&subject, request, chunk_tx).await });

    let stream = futures::stream::unfold(
        RelayState::Streaming(chunk_rx, handle),
        |relay| async move {
            match relay {
                RelayState::Streaming(mut chunk_rx, handle) => match chunk_rx.recv().await {
                    Some(chunk) => Some((
                        Ok(chunk_event(&chunk)),
                        RelayState::Streaming(chunk_rx, handle),
                    )),
                    None => {
                        let event = match handle.await {
                            Ok(Ok(outcome)) => result_event(&outcome),
                            Ok(Err(err)) => error_event(&err),
                            Err(join_err) => error_event(&ServiceError::generation(format!(
                                "session task failed: {}",
                                join_err
                            ))),
                        };
                        Some((Ok(event), RelayState::Done))
                    }
                },
                RelayState::Done => None,
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn chunk_event(chunk: &str) -> Event {
    Event::default()
        .event("chunk")
        .data(serde_json::json!({ "text": chunk }).to_string())
}

fn result_event(outcome: &GenerationOutcome) -> Event {
    match serde_json::to_string(outcome) {
        Ok(json) => Event::default().event("result").data(json),
        Err(e) => error_event(&ServiceError::generation(format!(
            "failed to encode result: {}",
            e
        ))),
    }
}

fn error_event(err: &ServiceError) -> Event {
    Event::default().event("error").data(
        serde_json::json!({ "kind": err.kind(), "message": err.to_string() }).to_string(),
    )
}
