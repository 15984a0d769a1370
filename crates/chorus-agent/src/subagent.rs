//! One-shot sub-agents — cheap, tool-less LLM calls for specialized jobs.
//!
//! Used by the interjection router's sibling, the callback builder, and any
//! other place that needs a single classification or translation call. No
//! tools, no session, hard timeout.

use std::time::Duration;

use tracing::warn;

use chorus_core::config::ChorusConfig;
use chorus_core::types::{ChatMessage, UsageInfo};
use chorus_process::callbacks::{default_callback, parse_callbacks, DEFAULT_OUTPUT_DELAY_SECS};
use chorus_process::models::ProcessCallback;
use chorus_providers::{HttpProvider, LlmProvider, LlmRequestConfig};

/// Default wall-clock bound for a sub-agent call.
pub const SUB_AGENT_TIMEOUT_SECS: u64 = 15;

/// Result of a sub-agent execution.
#[derive(Debug)]
pub struct SubAgentResult {
    pub success: bool,
    pub output: String,
    pub model_used: String,
    pub usage: UsageInfo,
    pub error: Option<String>,
}

impl SubAgentResult {
    fn failure(model: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            model_used: model.to_string(),
            usage: UsageInfo::default(),
            error: Some(error.into()),
        }
    }
}

/// Pick the cheapest available model from the configured API keys.
///
/// Prefers Haiku over gpt-4o-mini for cost; returns `None` when neither key
/// is configured.
pub fn cheap_provider(config: &ChorusConfig) -> Option<(HttpProvider, String)> {
    if let Some(key) = &config.anthropic_api_key {
        let model = "claude-haiku-4-5-20251001".to_string();
        return Some((HttpProvider::anthropic(key.clone(), model.clone()), model));
    }
    if let Some(key) = &config.openai_api_key {
        let model = "gpt-4o-mini".to_string();
        return Some((HttpProvider::openai(key.clone(), model.clone()), model));
    }
    None
}

/// Run a one-shot sub-agent call.
///
/// Prepends `system_prompt` unless the messages already start with a system
/// turn. Empty output counts as failure so callers never act on a blank
/// classification.
pub async fn run_sub_agent(
    provider: &dyn LlmProvider,
    model: &str,
    system_prompt: &str,
    messages: Vec<ChatMessage>,
    timeout: Duration,
) -> SubAgentResult {
    let mut working = messages;
    let needs_system = !matches!(working.first(), Some(ChatMessage::System { .. }));
    if needs_system && !system_prompt.is_empty() {
        working.insert(0, ChatMessage::system(system_prompt));
    }

    let config = LlmRequestConfig {
        max_tokens: 1024,
        temperature: 0.0,
        timeout_secs: timeout.as_secs().max(1),
    };

    let call = provider.chat(&working, None, model, &config);
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => {
            let output = response.content.unwrap_or_default().trim().to_string();
            let model_used = response.model.unwrap_or_else(|| model.to_string());
            let usage = response.usage.unwrap_or_default();
            if output.is_empty() {
                SubAgentResult {
                    success: false,
                    output,
                    model_used,
                    usage,
                    error: Some("LLM returned empty content".into()),
                }
            } else {
                SubAgentResult {
                    success: true,
                    output,
                    model_used,
                    usage,
                    error: None,
                }
            }
        }
        Ok(Err(e)) => SubAgentResult::failure(model, e.to_string()),
        Err(_) => SubAgentResult::failure(model, format!("Timeout after {}s", timeout.as_secs())),
    }
}

// ─────────────────────────────────────────────
// Callback builder
// ─────────────────────────────────────────────

const CALLBACK_BUILDER_PROMPT: &str = "You translate natural-language process monitoring \
instructions into a JSON array of callbacks.\n\n\
Each callback is an object: {\"trigger\": {...}, \"action\": \"...\", \
\"context_message\": \"...\", \"output_delay_seconds\": N, \"max_fires\": N}.\n\
Triggers: {\"type\": \"on_exit\", \"exit_filter\": \"any|success|failure\"}, \
{\"type\": \"on_output_match\", \"pattern\": \"<regex>\", \"exit_filter\": \"any|success|failure\"}, \
{\"type\": \"on_timeout\", \"timeout_seconds\": N}.\n\
Actions: spawn_branch, stop_process, inject_context, notify_channel.\n\n\
Respond with ONLY the JSON array.";

/// Translate natural-language monitor instructions into callbacks.
///
/// Empty instructions, builder failure, or an unusable payload all fall back
/// to the default spawn-a-review-branch-on-exit callback.
pub async fn build_callbacks_from_instructions(
    provider: Option<&dyn LlmProvider>,
    model: &str,
    instructions: &str,
) -> Vec<ProcessCallback> {
    if instructions.trim().is_empty() {
        return vec![default_callback()];
    }

    let Some(provider) = provider else {
        warn!("no sub-agent provider configured, using default callback");
        return vec![default_callback()];
    };

    let result = run_sub_agent(
        provider,
        model,
        CALLBACK_BUILDER_PROMPT,
        vec![ChatMessage::user(instructions)],
        Duration::from_secs(SUB_AGENT_TIMEOUT_SECS),
    )
    .await;

    if !result.success {
        warn!(error = ?result.error, "callback builder failed, using default callback");
        return vec![default_callback()];
    }

    let parsed = parse_callbacks(&result.output, DEFAULT_OUTPUT_DELAY_SECS);
    if parsed.is_empty() {
        warn!("callback builder produced nothing usable, using default callback");
        return vec![default_callback()];
    }
    parsed
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chorus_core::types::{LlmResponse, ToolDefinition};
    use chorus_process::models::{CallbackAction, ExitFilter, HookTrigger};
    use chorus_providers::ProviderError;

    struct CannedProvider {
        reply: Result<Option<String>, ()>,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            // The system prompt must have been prepended.
            assert!(matches!(messages.first(), Some(ChatMessage::System { .. })));
            match &self.reply {
                Ok(content) => Ok(LlmResponse {
                    content: content.clone(),
                    model: Some("canned".into()),
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

    #[tokio::test]
    async fn test_run_sub_agent_success() {
        let provider = CannedProvider {
            reply: Ok(Some("  classified  ".into())),
        };
        let result = run_sub_agent(
            &provider,
            "canned",
            "You classify things.",
            vec![ChatMessage::user("input")],
            Duration::from_secs(5),
        )
        .await;

        assert!(result.success);
        assert_eq!(result.output, "classified");
        assert_eq!(result.model_used, "canned");
    }

    #[tokio::test]
    async fn test_run_sub_agent_empty_output_is_failure() {
        let provider = CannedProvider {
            reply: Ok(Some("   ".into())),
        };
        let result = run_sub_agent(
            &provider,
            "canned",
            "prompt",
            vec![ChatMessage::user("input")],
            Duration::from_secs(5),
        )
        .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_run_sub_agent_provider_error() {
        let provider = CannedProvider { reply: Err(()) };
        let result = run_sub_agent(
            &provider,
            "canned",
            "prompt",
            vec![ChatMessage::user("input")],
            Duration::from_secs(5),
        )
        .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_cheap_provider_prefers_anthropic() {
        let mut config = ChorusConfig::for_home("/tmp/x");
        config.anthropic_api_key = Some("ak".into());
        config.openai_api_key = Some("ok".into());
        let (_, model) = cheap_provider(&config).unwrap();
        assert!(model.starts_with("claude-haiku"));

        config.anthropic_api_key = None;
        let (_, model) = cheap_provider(&config).unwrap();
        assert_eq!(model, "gpt-4o-mini");

        config.openai_api_key = None;
        assert!(cheap_provider(&config).is_none());
    }

    #[tokio::test]
    async fn test_build_callbacks_empty_instructions_default() {
        let cbs = build_callbacks_from_instructions(None, "m", "   ").await;
        assert_eq!(cbs.len(), 1);
        assert_eq!(cbs[0].action, CallbackAction::SpawnBranch);
        assert_eq!(
            cbs[0].trigger,
            HookTrigger::OnExit {
                exit_filter: ExitFilter::Any
            }
        );
    }

    #[tokio::test]
    async fn test_build_callbacks_success() {
        let provider = CannedProvider {
            reply: Ok(Some(
                r#"[{"trigger": {"type": "on_exit", "exit_filter": "failure"},
                     "action": "spawn_branch", "context_message": "Fix the error"}]"#
                    .into(),
            )),
        };
        let cbs = build_callbacks_from_instructions(Some(&provider), "m", "if it fails, fix it").await;
        assert_eq!(cbs.len(), 1);
        assert_eq!(cbs[0].context_message, "Fix the error");
        assert_eq!(
            cbs[0].trigger,
            HookTrigger::OnExit {
                exit_filter: ExitFilter::Failure
            }
        );
    }

    #[tokio::test]
    async fn test_build_callbacks_failure_falls_back() {
        let provider = CannedProvider { reply: Err(()) };
        let cbs = build_callbacks_from_instructions(Some(&provider), "m", "watch it").await;
        assert_eq!(cbs.len(), 1);
        assert_eq!(cbs[0].action, CallbackAction::SpawnBranch);
    }

    #[tokio::test]
    async fn test_build_callbacks_garbage_falls_back() {
        let provider = CannedProvider {
            reply: Ok(Some("I cannot express that as JSON, sorry.".into())),
        };
        let cbs = build_callbacks_from_instructions(Some(&provider), "m", "watch it").await;
        assert_eq!(cbs.len(), 1);
        assert_eq!(cbs[0].action, CallbackAction::SpawnBranch);
    }
}
