//! Generation session orchestration: debit, stream, persist, refund.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{AccountLedger, GameStore, StoreError};
use crate::error::ServiceError;
use crate::llm_client::LlmError;

/// Tokens consumed by one generation request.
pub const GENERATION_COST: i32 = 1;

/// Stream of generated text chunks: finite, ordered, not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Source of streamed completion text.
///
/// Implemented by [`LlmClient`] for real providers; tests substitute
/// scripted doubles. The generator is black-box and stateless per call.
///
/// [`LlmClient`]: crate::llm_client::LlmClient
#[async_trait]
pub trait Generator: Send + Sync {
    /// Starts a completion, returning text chunks in generation order.
    async fn stream(&self, system_prompt: &str, user_message: &str)
    -> Result<ChunkStream, LlmError>;
}

/// Request for generating or revising a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Free-form description of the game or of the requested change.
    pub prompt: String,
    /// Existing game to revise; absent for a brand-new game.
    #[serde(default, alias = "gameID")]
    pub game_id: Option<String>,
    /// Complete prior artifact, supplied alongside `game_id` on revision.
    #[serde(default)]
    pub existing_code: Option<String>,
}

/// Final result of a successful generation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    /// The complete accumulated artifact.
    pub full_response: String,
    /// Game the new version was recorded under.
    pub game_id: String,
    /// Whether this session created the game record.
    pub is_new_game: bool,
}

/// Lifecycle of one generation session.
///
/// `Debited` is always reached before `Streaming`; any exit from
/// `Streaming` other than normal completion passes through `Failed` and
/// then `Refunded` before the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Identity verified and admission passed.
    Admitted,
    /// One token debited from the caller's account.
    Debited,
    /// Relaying generator chunks to the caller.
    Streaming,
    /// Version durably recorded; terminal success state.
    Completed,
    /// A post-debit step errored.
    Failed,
    /// Compensating credit issued; terminal failure state.
    Refunded,
}

const SYSTEM_PROMPT: &str = "You are an expert game developer. You produce complete, \
     self-contained HTML documents that run in any modern browser with no external \
     resources. Respond with the document only, no commentary.";

/// Builds the instruction for a brand-new game.
#[instrument(skip(prompt), fields(prompt_len = prompt.len()))]
fn new_game_instruction(prompt: &str) -> String {
    format!(
        "Create a browser-playable game from this description: {prompt}\n\n\
         Requirements:\n\
         - A single self-contained HTML document with all markup, styles, and scripts inline.\n\
         - The game must not start until the player explicitly presses a start control.\n\
         - Show a brief tutorial overlay before first play that the player dismisses once.\n\
         - Provide pause and reset controls that work at any point during play.\n\n\
         Respond with the complete HTML document and nothing else."
    )
}

/// Builds the instruction for revising an existing game.
#[instrument(skip(prompt, existing_code), fields(prompt_len = prompt.len(), code_len = existing_code.len()))]
fn revision_instruction(prompt: &str, existing_code: &str) -> String {
    format!(
        "Here is the complete source of an existing browser game:\n\n\
         {existing_code}\n\n\
         Apply this change: {prompt}\n\n\
         Respond with the complete replacement HTML document, not a diff or an excerpt."
    )
}

/// Orchestrates one generation request end to end.
///
/// Collaborators are passed in explicitly at construction; the session holds
/// no ambient state and each `run` is independent.
#[derive(Clone)]
pub struct GenerationSession {
    ledger: AccountLedger,
    store: GameStore,
    generator: Arc<dyn Generator>,
}

impl GenerationSession {
    /// Creates a session factory over the given collaborators.
    #[instrument(skip(ledger, store, generator))]
    pub fn new(ledger: AccountLedger, store: GameStore, generator: Arc<dyn Generator>) -> Self {
        info!("Creating GenerationSession");
        Self {
            ledger,
            store,
            generator,
        }
    }

    /// Runs one generation request.
    ///
    /// Debits one token, streams the generator's chunks into `chunk_tx` in
    /// arrival order while accumulating them, then records the version
    /// (creating the game first when `game_id` is absent). Any failure after
    /// the debit issues a compensating credit before the error is surfaced.
    ///
    /// If the receiving side of `chunk_tx` is dropped mid-stream, the
    /// session keeps accumulating and still persists, so the debited token
    /// always buys either a version or a refund.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unauthorized`] for an empty identity,
    /// [`ServiceError::InsufficientBalance`] if the debit is rejected,
    /// [`ServiceError::GameNotFound`] if a revision targets a missing game,
    /// and [`ServiceError::Generation`] for generator or persistence
    /// failures after the debit.
    #[instrument(skip(self, request, chunk_tx), fields(identity = %identity, game_id = ?request.game_id, prompt_len = request.prompt.len()))]
    pub async fn run(
        &self,
        identity: &str,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<GenerationOutcome, ServiceError> {
        if identity.trim().is_empty() {
            warn!("Rejecting generation request with no identity");
            return Err(ServiceError::Unauthorized);
        }
        debug!(state = ?SessionState::Admitted, "Session admitted");

        self.ledger.debit(identity, GENERATION_COST)?;
        debug!(state = ?SessionState::Debited, "Token debited");

        match self.stream_and_persist(identity, &request, chunk_tx).await {
            Ok(outcome) => {
                info!(
                    state = ?SessionState::Completed,
                    game_id = %outcome.game_id,
                    is_new_game = outcome.is_new_game,
                    artifact_len = outcome.full_response.len(),
                    "Generation session completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(state = ?SessionState::Failed, error = %err, "Generation failed after debit, refunding");
                match self.ledger.credit(identity, GENERATION_COST) {
                    Ok(()) => debug!(state = ?SessionState::Refunded, "Token refunded"),
                    // Best effort: a failed refund must not mask the
                    // original error.
                    Err(refund_err) => {
                        error!(error = %refund_err, "Refund failed; surfacing original error")
                    }
                }
                Err(err)
            }
        }
    }

    /// Streams the completion and records the version. Every error returned
    /// here occurs after the debit, so `run` compensates for all of them.
    #[instrument(skip(self, request, chunk_tx), fields(game_id = ?request.game_id))]
    async fn stream_and_persist(
        &self,
        identity: &str,
        request: &GenerateRequest,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<GenerationOutcome, ServiceError> {
        // Trimmed but otherwise forwarded verbatim; an empty prompt is the
        // caller's prerogative.
        let prompt = request.prompt.trim();
        let user_message = match &request.game_id {
            Some(_) => {
                let existing_code = request.existing_code.as_deref().unwrap_or("");
                revision_instruction(prompt, existing_code)
            }
            None => new_game_instruction(prompt),
        };

        let mut chunks = self
            .generator
            .stream(SYSTEM_PROMPT, &user_message)
            .await
            .map_err(ServiceError::generation)?;
        debug!(state = ?SessionState::Streaming, "Generator stream opened");

        let mut artifact = String::new();
        let mut caller_gone = false;
        while let Some(next) = chunks.next().await {
            let chunk = next.map_err(ServiceError::generation)?;
            artifact.push_str(&chunk);
            if !caller_gone && chunk_tx.send(chunk).await.is_err() {
                warn!("Caller channel closed mid-stream; continuing to accumulate");
                caller_gone = true;
            }
        }
        debug!(artifact_len = artifact.len(), "Generator stream completed");

        match &request.game_id {
            Some(game_id) => {
                self.store.get_game(game_id).map_err(|e| match e {
                    StoreError::Db(db) => ServiceError::generation(db),
                    other => ServiceError::from(other),
                })?;
                self.store
                    .append_version(game_id, prompt, &artifact)
                    .map_err(ServiceError::generation)?;
                Ok(GenerationOutcome {
                    full_response: artifact,
                    game_id: game_id.clone(),
                    is_new_game: false,
                })
            }
            None => {
                let game = self
                    .store
                    .create_game(Some(identity))
                    .map_err(ServiceError::generation)?;
                self.store
                    .append_version(game.id(), prompt, &artifact)
                    .map_err(ServiceError::generation)?;
                Ok(GenerationOutcome {
                    full_response: artifact,
                    game_id: game.id().clone(),
                    is_new_game: true,
                })
            }
        }
    }
}
