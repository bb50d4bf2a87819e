//! LLM collaborator abstraction layer
//!
//! Dialog elements talk to a chat-completions model through the `ChatModel`
//! trait. The engine never retries a failed generation; the error is
//! surfaced to the caller, who owns retry/backoff policy.

use async_trait::async_trait;
use sdk::types::Turn;

pub mod openai;

pub use openai::OpenAiChat;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Resolved model parameters for one completion call
///
/// Dialog elements may override the configured defaults per element.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model: String,

    /// Sampling temperature; ignored by reasoning models
    pub temperature: f64,

    /// Reasoning effort; only sent to reasoning models
    pub reasoning_effort: String,
}

impl ModelParams {
    /// Whether this model takes a reasoning-effort parameter instead of a
    /// temperature
    pub fn is_reasoning_model(&self) -> bool {
        self.model.starts_with('o') || self.model.starts_with("gpt-5")
    }
}

/// The contract a chat model provider must satisfy
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation, returning the assistant's reply text
    async fn complete(&self, messages: &[Turn], params: &ModelParams) -> Result<String>;
}
