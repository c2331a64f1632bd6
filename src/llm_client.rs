//! LLM API client abstraction for OpenAI and Anthropic streaming completions.

use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use derive_more::{Display, Error};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::generation::{ChunkStream, Generator};

/// LLM provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI (GPT models).
    OpenAI,
    /// Anthropic (Claude models).
    Anthropic,
}

/// Configuration for LLM client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    provider: LlmProvider,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmConfig {
    /// Creates a new LLM configuration.
    #[instrument(skip(api_key), fields(provider = ?provider, model = %model))]
    pub fn new(provider: LlmProvider, api_key: String, model: String, max_tokens: u32) -> Self {
        debug!("Creating LLM config");
        Self {
            provider,
            api_key,
            model,
            max_tokens,
        }
    }

    /// Gets the provider.
    #[instrument(skip(self))]
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Gets the API key.
    #[instrument(skip(self))]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Gets the model name.
    #[instrument(skip(self))]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Gets the max tokens.
    #[instrument(skip(self))]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

/// LLM client that abstracts over multiple providers.
///
/// Each call opens one streaming completion; the returned chunk sequence is
/// finite, arrives over an open connection, and is not restartable.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
}

impl LlmClient {
    /// Creates a new LLM client.
    #[instrument(skip(config), fields(provider = ?config.provider()))]
    pub fn new(config: LlmConfig) -> Self {
        info!("Creating LLM client");
        Self { config }
    }

    /// Starts a streaming completion, returning text chunks in arrival order.
    #[instrument(skip(self, system_prompt, user_message), fields(provider = ?self.config.provider, model = %self.config.model))]
    pub async fn generate_stream(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        debug!("Starting streaming completion");
        match self.config.provider {
            LlmProvider::OpenAI => self.stream_openai(system_prompt, user_message).await,
            LlmProvider::Anthropic => self.stream_anthropic(system_prompt, user_message).await,
        }
    }

    /// Streams a completion from Anthropic Claude via the Messages API.
    #[instrument(skip(self, system_prompt, user_message))]
    async fn stream_anthropic(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        debug!("Creating Anthropic client");

        let client = reqwest::Client::new();

        debug!("Building Anthropic API request");
        let request_body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "stream": true,
            "system": system_prompt,
            "messages": [
                {
                    "role": "user",
                    "content": user_message
                }
            ]
        });

        debug!("Sending request to Anthropic");
        let response = client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", self.config.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Anthropic API request failed");
                LlmError::new(format!("Anthropic API request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let response_text = response.text().await.unwrap_or_else(|_| String::new());
            error!(status = %status, response = %response_text, "Anthropic API error");
            return Err(LlmError::new(format!(
                "Anthropic API error {}: {}",
                status, response_text
            )));
        }

        // Bridge the SSE byte stream into text chunks on a channel; the
        // parse task ends when the body ends or the receiver is dropped.
        let (tx, rx) = futures::channel::mpsc::unbounded();
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending = String::new();

            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.unbounded_send(Err(LlmError::new(format!(
                            "Anthropic stream error: {}",
                            e
                        ))));
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim().to_string();
                    pending.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(value) => value,
                        Err(e) => {
                            let _ = tx.unbounded_send(Err(LlmError::new(format!(
                                "Malformed Anthropic stream event: {}",
                                e
                            ))));
                            return;
                        }
                    };

                    match event["type"].as_str() {
                        Some("content_block_delta") => {
                            if let Some(text) = event["delta"]["text"].as_str() {
                                if !text.is_empty()
                                    && tx.unbounded_send(Ok(text.to_string())).is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Some("message_stop") => return,
                        Some("error") => {
                            let message = event["error"]["message"]
                                .as_str()
                                .unwrap_or("unknown stream error");
                            let _ = tx.unbounded_send(Err(LlmError::new(format!(
                                "Anthropic stream error: {}",
                                message
                            ))));
                            return;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok(Box::pin(rx))
    }

    /// Streams a completion from OpenAI.
    #[instrument(skip(self, system_prompt, user_message))]
    async fn stream_openai(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        debug!("Creating OpenAI client");

        let client = OpenAIClient::with_config(
            OpenAIConfig::new().with_api_key(self.config.api_key.clone()),
        );

        debug!("Building chat completion request");
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|e| {
                        error!(error = ?e, "Failed to build system message");
                        LlmError::new(format!("Failed to build system message: {}", e))
                    })?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_message)
                    .build()
                    .map_err(|e| {
                        error!(error = ?e, "Failed to build user message");
                        LlmError::new(format!("Failed to build user message: {}", e))
                    })?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(|e| {
                error!(error = ?e, "Failed to build request");
                LlmError::new(format!("Failed to build request: {}", e))
            })?;

        debug!("Sending request to OpenAI");
        let stream = client.chat().create_stream(request).await.map_err(|e| {
            error!(error = ?e, "OpenAI API error");
            LlmError::new(format!("OpenAI API error: {}", e))
        })?;

        let chunks = stream
            .map(|item| match item {
                Ok(response) => Ok(response
                    .choices
                    .iter()
                    .filter_map(|choice| choice.delta.content.clone())
                    .collect::<String>()),
                Err(e) => Err(LlmError::new(format!("OpenAI stream error: {}", e))),
            })
            .filter(|item| {
                // Role-only frames carry no text.
                futures::future::ready(!matches!(item, Ok(chunk) if chunk.is_empty()))
            });

        Ok(Box::pin(chunks))
    }
}

#[async_trait]
impl Generator for LlmClient {
    #[instrument(skip(self, system_prompt, user_message))]
    async fn stream(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChunkStream, LlmError> {
        self.generate_stream(system_prompt, user_message).await
    }
}

/// LLM client error.
#[derive(Debug, Clone, Display, Error)]
#[display("LLM error: {} at {}:{}", message, file, line)]
pub struct LlmError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl LlmError {
    /// Creates a new LLM error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        error!(error_message = %message, "LLM error created");
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
