//! Service configuration loaded from TOML and the environment.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::llm_client::{LlmConfig, LlmProvider};

/// Configuration for the gamesmith service.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    db_path: String,

    /// LLM provider (openai or anthropic).
    #[serde(default = "default_provider")]
    llm_provider: LlmProvider,

    /// LLM model name (e.g., "gpt-4o-mini", "claude-3-5-sonnet").
    #[serde(default = "default_model")]
    llm_model: String,

    /// Maximum tokens for one generated artifact.
    #[serde(default = "default_max_tokens")]
    llm_max_tokens: u32,

    /// Balance granted to lazily created accounts.
    #[serde(default = "default_starting_tokens")]
    starting_tokens: i32,

    /// Tokens credited per purchase.
    #[serde(default = "default_token_pack")]
    token_pack: i32,
}

#[instrument]
fn default_db_path() -> String {
    "gamesmith.db".to_string()
}

#[instrument]
fn default_provider() -> LlmProvider {
    LlmProvider::OpenAI
}

#[instrument]
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[instrument]
fn default_max_tokens() -> u32 {
    16384
}

#[instrument]
fn default_starting_tokens() -> i32 {
    5
}

#[instrument]
fn default_token_pack() -> i32 {
    5
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            llm_provider: default_provider(),
            llm_model: default_model(),
            llm_max_tokens: default_max_tokens(),
            starting_tokens: default_starting_tokens(),
            token_pack: default_token_pack(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;

        info!(model = %config.llm_model, db_path = %config.db_path, "Config loaded successfully");
        Ok(config)
    }

    /// Creates LLM configuration from this service config.
    /// Requires OPENAI_API_KEY or ANTHROPIC_API_KEY environment variable.
    #[instrument(skip(self), fields(provider = ?self.llm_provider, model = %self.llm_model))]
    pub fn create_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        debug!("Creating LLM config");

        let api_key = match self.llm_provider {
            LlmProvider::OpenAI => std::env::var("OPENAI_API_KEY").map_err(|_| {
                ConfigError::new("OPENAI_API_KEY environment variable not set".to_string())
            })?,
            LlmProvider::Anthropic => std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
                ConfigError::new("ANTHROPIC_API_KEY environment variable not set".to_string())
            })?,
        };

        Ok(LlmConfig::new(
            self.llm_provider,
            api_key,
            self.llm_model.clone(),
            self.llm_max_tokens,
        ))
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
