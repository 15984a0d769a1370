//! Interjection router — INJECT vs NEW_THREAD for busy agents.
//!
//! When a message arrives while the main branch is running, one cheap LLM
//! call classifies it as a follow-up (inject into the running branch) or an
//! unrelated request (new sibling branch). Every failure mode — error, empty
//! output, both tokens, neither token — resolves to INJECT, the safer choice
//! for conversation coherence.

use tracing::warn;

use chorus_providers::{LlmProvider, LlmRequestConfig};

use chorus_core::types::ChatMessage;

/// Classifier wall-clock bound.
pub const ROUTER_TIMEOUT_SECS: u64 = 15;

const ROUTER_SYSTEM_PROMPT: &str = "You are a message router. Your ONLY job is to classify \
whether a new user message is a follow-up to the currently running thread or a completely \
unrelated new request.\n\n\
Respond with EXACTLY one word:\n\
- INJECT — if the message is a follow-up, correction, clarification, or addition to the \
current work\n\
- NEW_THREAD — if the message is clearly unrelated to the current work\n\n\
When in doubt, respond INJECT.";

/// Routing decision for an interjected message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Inject,
    NewThread,
}

/// Interpret classifier output.
///
/// Exactly one of the two tokens must appear (as a substring of the
/// uppercased response) for that decision to win; anything else is INJECT.
pub fn parse_route_decision(text: &str) -> RouteDecision {
    let upper = text.to_uppercase();
    let has_new_thread = upper.contains("NEW_THREAD");
    let has_inject = upper.contains("INJECT");
    match (has_inject, has_new_thread) {
        (false, true) => RouteDecision::NewThread,
        _ => RouteDecision::Inject,
    }
}

/// Ask the classifier where a message belongs. Defaults to INJECT on any
/// failure or timeout.
pub async fn route_interjection(
    message: &str,
    thread_summary: &str,
    current_step: &str,
    provider: &dyn LlmProvider,
    model: &str,
) -> RouteDecision {
    let user_content = format!(
        "Current thread: {thread_summary}\nCurrent step: {current_step}\nNew message: {message}"
    );
    let messages = vec![
        ChatMessage::system(ROUTER_SYSTEM_PROMPT),
        ChatMessage::user(user_content),
    ];
    let config = LlmRequestConfig {
        max_tokens: 16,
        temperature: 0.0,
        timeout_secs: ROUTER_TIMEOUT_SECS,
    };

    let call = provider.chat(&messages, None, model, &config);
    match tokio::time::timeout(
        std::time::Duration::from_secs(ROUTER_TIMEOUT_SECS),
        call,
    )
    .await
    {
        Ok(Ok(response)) => parse_route_decision(response.content.as_deref().unwrap_or("")),
        Ok(Err(e)) => {
            warn!(error = %e, "router classifier failed, defaulting to inject");
            RouteDecision::Inject
        }
        Err(_) => {
            warn!("router classifier timed out, defaulting to inject");
            RouteDecision::Inject
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chorus_core::types::{LlmResponse, ToolDefinition};
    use chorus_providers::ProviderError;

    struct CannedProvider {
        reply: Result<Option<String>, ()>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(content) => Ok(LlmResponse {
                    content: content.clone(),
                    ..Default::default()
                }),
                Err(()) => Err(ProviderError::Empty),
            }
        }

        fn default_model(&self) -> &str {
            "canned"
        }
        fn display_name(&self) -> &str {
            "Canned"
        }
    }

    async fn route(reply: Result<Option<String>, ()>) -> RouteDecision {
        let provider = CannedProvider {
            reply,
            delay: std::time::Duration::ZERO,
        };
        route_interjection("new msg", "summary", "step", &provider, "canned").await
    }

    #[test]
    fn test_parse_inject() {
        assert_eq!(parse_route_decision("INJECT"), RouteDecision::Inject);
        assert_eq!(parse_route_decision("inject"), RouteDecision::Inject);
        assert_eq!(
            parse_route_decision("I think INJECT is right"),
            RouteDecision::Inject
        );
    }

    #[test]
    fn test_parse_new_thread() {
        assert_eq!(parse_route_decision("NEW_THREAD"), RouteDecision::NewThread);
        assert_eq!(parse_route_decision("new_thread"), RouteDecision::NewThread);
    }

    #[test]
    fn test_parse_neither_defaults_inject() {
        assert_eq!(parse_route_decision(""), RouteDecision::Inject);
        assert_eq!(parse_route_decision("maybe?"), RouteDecision::Inject);
    }

    #[test]
    fn test_parse_both_defaults_inject() {
        assert_eq!(
            parse_route_decision("INJECT or NEW_THREAD, unclear"),
            RouteDecision::Inject
        );
    }

    #[tokio::test]
    async fn test_route_new_thread_reply() {
        assert_eq!(
            route(Ok(Some("new_thread".into()))).await,
            RouteDecision::NewThread
        );
    }

    #[tokio::test]
    async fn test_route_error_defaults_inject() {
        assert_eq!(route(Err(())).await, RouteDecision::Inject);
    }

    #[tokio::test]
    async fn test_route_empty_content_defaults_inject() {
        assert_eq!(route(Ok(None)).await, RouteDecision::Inject);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_timeout_defaults_inject() {
        let provider = CannedProvider {
            reply: Ok(Some("NEW_THREAD".into())),
            delay: std::time::Duration::from_secs(60),
        };
        let decision =
            route_interjection("msg", "summary", "step", &provider, "canned").await;
        assert_eq!(decision, RouteDecision::Inject);
    }
}
