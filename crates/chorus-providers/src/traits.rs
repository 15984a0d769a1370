//! LLM provider trait — the abstraction the tool loop calls into.
//!
//! Provider failures are real errors here: the tool loop must mark the branch
//! FAILED when a call cannot be served, so `chat` returns `Result` instead of
//! folding errors into response content.

use async_trait::async_trait;
use thiserror::Error;

use chorus_core::types::{ChatMessage, LlmResponse, ToolDefinition};

/// Failure of an LLM chat call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM response had no choices")]
    Empty,

    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    #[error("LLM call timed out after {0} seconds")]
    Timeout(u64),
}

/// Configuration passed to each LLM call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Per-call wall-clock bound in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 300,
        }
    }
}

/// Trait that all LLM providers implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// `messages` is the conversation so far, `tools` the optional tool
    /// schemas, `model` the model identifier. Cancellable: dropping the
    /// future aborts the request.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
