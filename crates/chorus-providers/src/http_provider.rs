//! Generic HTTP provider for OpenAI-compatible `/chat/completions` APIs.
//!
//! One implementation covers OpenAI and every endpoint speaking the same
//! dialect; Anthropic traffic goes through its OpenAI-compatible surface.

use async_trait::async_trait;
use tracing::{debug, error};

use chorus_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, LlmResponse, ToolDefinition,
};

use crate::traits::{LlmProvider, LlmRequestConfig, ProviderError};

/// Known API bases, keyed by the env var that authenticates them.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// An LLM provider that talks to an OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// Shared, connection-pooled client.
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// Bearer token.
    api_key: String,
    /// Default model for this provider instance.
    default_model: String,
    /// Name used in logs.
    display_name: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    /// Create a provider for the given API base.
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        HttpProvider {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            display_name: display_name.into(),
        }
    }

    /// Convenience constructor for OpenAI.
    pub fn openai(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self::new(OPENAI_API_BASE, api_key, default_model, "OpenAI")
    }

    /// Convenience constructor for Anthropic's OpenAI-compatible surface.
    pub fn anthropic(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self::new(ANTHROPIC_API_BASE, api_key, default_model, "Anthropic")
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// `GET /models` — used by discovery to validate configured models.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        #[derive(serde::Deserialize)]
        struct ModelsResponse {
            data: Vec<ModelEntry>,
        }
        #[derive(serde::Deserialize)]
        struct ModelEntry {
            id: String,
        }

        let parsed: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            provider = %self.display_name,
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let request = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send();

        let response = tokio::time::timeout(
            std::time::Duration::from_secs(config.timeout_secs),
            request,
        )
        .await
        .map_err(|_| ProviderError::Timeout(config.timeout_secs))??;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(provider = %self.display_name, status = %status, "API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let llm = parsed.into_llm_response().ok_or(ProviderError::Empty)?;
        debug!(
            provider = %self.display_name,
            has_content = llm.content.is_some(),
            tool_calls = llm.tool_calls.len(),
            finish_reason = llm.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(llm)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        HttpProvider::new(server.uri(), "test-key", "test-model", "Test")
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "test-model",
                "choices": [{
                    "message": { "content": "Hello from the mock!", "tool_calls": null },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 5, "completion_tokens": 4, "total_tokens": 9 }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[ChatMessage::user("Hi")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("Hello from the mock!"));
        assert_eq!(response.usage.unwrap().total_tokens, 9);
    }

    #[tokio::test]
    async fn test_chat_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "test-model",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "bash", "arguments": "{\"command\":\"ls\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[ChatMessage::user("list files")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap();

        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].function.name, "bash");
    }

    #[tokio::test]
    async fn test_chat_api_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .chat(
                &[ChatMessage::user("Hi")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_empty_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": null, "choices": [], "usage": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .chat(
                &[ChatMessage::user("Hi")],
                None,
                "test-model",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Empty));
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "gpt-4o" }, { "id": "gpt-4o-mini" }]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let models = provider.list_models().await.unwrap();
        assert_eq!(models, vec!["gpt-4o", "gpt-4o-mini"]);
    }

    #[test]
    fn test_default_model_and_display_name() {
        let provider = HttpProvider::openai("k", "gpt-4o");
        assert_eq!(provider.default_model(), "gpt-4o");
        assert_eq!(provider.display_name(), "OpenAI");
    }
}
