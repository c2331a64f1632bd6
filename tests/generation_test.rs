//! Tests for the generation session lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use gamesmith::{
    AccountLedger, ChunkStream, GameStore, GenerateRequest, GenerationOutcome, GenerationSession,
    Generator, LlmError, ServiceError,
};

const STARTING_TOKENS: i32 = 5;

/// Generator that yields a scripted chunk sequence and counts invocations.
struct ScriptedGenerator {
    chunks: Vec<&'static str>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn stream(
        &self,
        _system_prompt: &str,
        _user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Result<String, LlmError>> =
            self.chunks.iter().map(|c| Ok(c.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Generator whose stream fails after a prefix of good chunks.
struct FailingGenerator {
    prefix: Vec<&'static str>,
}

#[async_trait]
impl Generator for FailingGenerator {
    async fn stream(
        &self,
        _system_prompt: &str,
        _user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        let mut items: Vec<Result<String, LlmError>> =
            self.prefix.iter().map(|c| Ok(c.to_string())).collect();
        items.push(Err(LlmError::new("model connection dropped".to_string())));
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Generator whose initial call fails outright.
struct RefusingGenerator;

#[async_trait]
impl Generator for RefusingGenerator {
    async fn stream(
        &self,
        _system_prompt: &str,
        _user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        Err(LlmError::new("model unavailable".to_string()))
    }
}

/// Creates a temporary database with schema applied plus ledger and store
/// over it. The file handle must stay in scope to keep the database alive.
fn setup_test_db() -> (NamedTempFile, AccountLedger, GameStore) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();

    gamesmith::run_migrations(&db_path).expect("Migrations failed");

    let ledger =
        AccountLedger::new(db_path.clone(), STARTING_TOKENS).expect("Failed to create ledger");
    let store = GameStore::new(db_path).expect("Failed to create store");
    (db_file, ledger, store)
}

fn scripted_session(
    ledger: &AccountLedger,
    store: &GameStore,
    chunks: Vec<&'static str>,
) -> (GenerationSession, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let generator = Arc::new(ScriptedGenerator {
        chunks,
        calls: calls.clone(),
    });
    let session = GenerationSession::new(ledger.clone(), store.clone(), generator);
    (session, calls)
}

fn new_game_request(prompt: &str) -> GenerateRequest {
    GenerateRequest {
        prompt: prompt.to_string(),
        game_id: None,
        existing_code: None,
    }
}

/// Runs a session while draining its chunk channel concurrently, returning
/// the outcome and the relayed chunks in arrival order.
async fn run_collecting(
    session: &GenerationSession,
    identity: &str,
    request: GenerateRequest,
) -> (Result<GenerationOutcome, ServiceError>, Vec<String>) {
    let (tx, mut rx) = mpsc::channel(4);
    let collector = tokio::spawn(async move {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    });

    let result = session.run(identity, request, tx).await;
    let chunks = collector.await.expect("Collector task failed");
    (result, chunks)
}

fn balance(ledger: &AccountLedger, identity: &str) -> i32 {
    *ledger
        .get_account(identity)
        .expect("Query failed")
        .expect("Account missing")
        .tokens()
}

#[tokio::test]
async fn test_new_game_debits_and_persists() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u1").expect("Ensure failed");
    let (session, _) = scripted_session(&ledger, &store, vec!["<html>", "maze", "</html>"]);

    let (result, chunks) =
        run_collecting(&session, "u1", new_game_request("a maze game")).await;
    let outcome = result.expect("Run failed");

    assert!(outcome.is_new_game);
    assert_eq!(outcome.full_response, "<html>maze</html>");
    assert_eq!(chunks.concat(), outcome.full_response);
    assert_eq!(balance(&ledger, "u1"), STARTING_TOKENS - 1);

    let versions = store.list_versions(&outcome.game_id).expect("List failed");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].prompt(), "a maze game");
    assert_eq!(versions[0].code(), "<html>maze</html>");
}

#[tokio::test]
async fn test_revision_appends_under_same_game() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u1").expect("Ensure failed");

    let (first_session, _) = scripted_session(&ledger, &store, vec!["<html>v1</html>"]);
    let (first, _) = run_collecting(&first_session, "u1", new_game_request("a maze game")).await;
    let first = first.expect("First run failed");

    let (second_session, _) = scripted_session(&ledger, &store, vec!["<html>v2</html>"]);
    let request = GenerateRequest {
        prompt: "add a timer".to_string(),
        game_id: Some(first.game_id.clone()),
        existing_code: Some(first.full_response.clone()),
    };
    let (second, _) = run_collecting(&second_session, "u1", request).await;
    let second = second.expect("Second run failed");

    assert!(!second.is_new_game);
    assert_eq!(second.game_id, first.game_id);
    assert_eq!(second.full_response, "<html>v2</html>");
    assert_eq!(balance(&ledger, "u1"), STARTING_TOKENS - 2);

    let versions = store.list_versions(&first.game_id).expect("List failed");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].prompt(), "add a timer");
    assert_eq!(versions[1].code(), "<html>v2</html>");
}

#[tokio::test]
async fn test_insufficient_balance_blocks_generation() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u2").expect("Ensure failed");
    ledger
        .debit("u2", STARTING_TOKENS)
        .expect("Drain debit failed");
    let (session, calls) = scripted_session(&ledger, &store, vec!["<html></html>"]);

    let (result, chunks) = run_collecting(&session, "u2", new_game_request("a game")).await;

    assert!(matches!(
        result,
        Err(ServiceError::InsufficientBalance { .. })
    ));
    assert_eq!(balance(&ledger, "u2"), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "Generator must not run");
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_absent_account_blocks_generation() {
    let (_db, ledger, store) = setup_test_db();
    let (session, calls) = scripted_session(&ledger, &store, vec!["<html></html>"]);

    let (result, _) = run_collecting(&session, "ghost", new_game_request("a game")).await;

    assert!(matches!(
        result,
        Err(ServiceError::InsufficientBalance { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_midstream_failure_refunds_and_persists_nothing() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u3").expect("Ensure failed");
    let generator = Arc::new(FailingGenerator {
        prefix: vec!["<html>", "partial"],
    });
    let session = GenerationSession::new(ledger.clone(), store.clone(), generator);

    let (result, chunks) = run_collecting(&session, "u3", new_game_request("a game")).await;

    assert!(matches!(result, Err(ServiceError::Generation { .. })));
    assert_eq!(
        balance(&ledger, "u3"),
        STARTING_TOKENS,
        "Debit and refund must net to zero"
    );
    assert_eq!(
        chunks,
        vec!["<html>".to_string(), "partial".to_string()],
        "Chunks relayed before the failure are exactly the generator's prefix"
    );
}

#[tokio::test]
async fn test_refused_generation_refunds() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u4").expect("Ensure failed");
    let session =
        GenerationSession::new(ledger.clone(), store.clone(), Arc::new(RefusingGenerator));

    let (result, chunks) = run_collecting(&session, "u4", new_game_request("a game")).await;

    assert!(matches!(result, Err(ServiceError::Generation { .. })));
    assert_eq!(balance(&ledger, "u4"), STARTING_TOKENS);
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_revision_of_missing_game_refunds() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u5").expect("Ensure failed");
    let (session, _) = scripted_session(&ledger, &store, vec!["<html>v2</html>"]);

    let request = GenerateRequest {
        prompt: "add a timer".to_string(),
        game_id: Some("no-such-game".to_string()),
        existing_code: Some("<html>v1</html>".to_string()),
    };
    let (result, _) = run_collecting(&session, "u5", request).await;

    assert!(matches!(result, Err(ServiceError::GameNotFound { .. })));
    assert_eq!(
        balance(&ledger, "u5"),
        STARTING_TOKENS,
        "Token spent on a vanished game is credited back"
    );
}

#[tokio::test]
async fn test_empty_identity_rejected_before_debit() {
    let (_db, ledger, store) = setup_test_db();
    let (session, calls) = scripted_session(&ledger, &store, vec!["<html></html>"]);

    let (result, _) = run_collecting(&session, "  ", new_game_request("a game")).await;

    assert!(matches!(result, Err(ServiceError::Unauthorized)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_whitespace_prompt_accepted_trimmed() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u6").expect("Ensure failed");
    let (session, _) = scripted_session(&ledger, &store, vec!["<html></html>"]);

    let (result, _) = run_collecting(&session, "u6", new_game_request("   ")).await;
    let outcome = result.expect("Run failed");

    let versions = store.list_versions(&outcome.game_id).expect("List failed");
    assert_eq!(versions[0].prompt(), "");
}

#[tokio::test]
async fn test_chunk_relay_preserves_order() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u7").expect("Ensure failed");
    let script = vec!["a", "b", "c", "d", "e", "f", "g", "h"];
    let (session, _) = scripted_session(&ledger, &store, script.clone());

    let (result, chunks) = run_collecting(&session, "u7", new_game_request("a game")).await;
    result.expect("Run failed");

    let relayed: Vec<&str> = chunks.iter().map(String::as_str).collect();
    assert_eq!(relayed, script);
}

#[tokio::test]
async fn test_disconnected_caller_still_persists() {
    let (_db, ledger, store) = setup_test_db();
    ledger.ensure_account("u8").expect("Ensure failed");
    let (session, _) = scripted_session(&ledger, &store, vec!["<html>", "solo", "</html>"]);

    let (tx, rx) = mpsc::channel(4);
    drop(rx);

    let outcome = session
        .run("u8", new_game_request("a game"), tx)
        .await
        .expect("Run failed");

    assert_eq!(outcome.full_response, "<html>solo</html>");
    assert_eq!(balance(&ledger, "u8"), STARTING_TOKENS - 1);
    let versions = store.list_versions(&outcome.game_id).expect("List failed");
    assert_eq!(versions.len(), 1);
}
