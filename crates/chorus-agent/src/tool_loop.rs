//! Tool loop — the bounded LLM ↔ tools cycle at the heart of every branch.
//!
//! Each iteration calls the model, then executes its tool calls sequentially
//! (deterministic audit order) behind the permission engine: ALLOW runs, ASK
//! goes through the mediator, DENY and refused asks become synthetic
//! tool-result messages so the model can react. Injected messages are
//! absorbed at iteration boundaries. Hitting the cap returns a
//! bounded-exhausted outcome with whatever accumulated; provider errors
//! propagate and fail the branch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use chorus_core::permissions::{check, PermissionProfile, PermissionResult};
use chorus_core::store::Store;
use chorus_core::types::{ChatMessage, ToolCall, UsageInfo};
use chorus_channels::{AskMediator, AskRequest};
use chorus_providers::{LlmProvider, LlmRequestConfig, ProviderError};

use crate::threads::ExecutionThread;
use crate::tools::ToolRegistry;

/// Default cap on LLM ↔ tool iterations per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Result of a finished (or cap-bounded) tool loop.
#[derive(Debug)]
pub struct LoopOutcome {
    /// Final assistant text, if the model produced one.
    pub content: Option<String>,
    pub iterations: usize,
    pub usage: UsageInfo,
    /// True when the iteration cap ended the loop.
    pub exhausted: bool,
}

/// Drives the LLM ↔ tools cycle for one agent.
pub struct ToolLoop {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    profile: PermissionProfile,
    mediator: Option<Arc<dyn AskMediator>>,
    store: Store,
    agent_name: String,
    channel_id: u64,
    /// The user whose approval ASK prompts require.
    requesting_user: Option<u64>,
    model: String,
    max_iterations: usize,
    request: LlmRequestConfig,
}

impl ToolLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        profile: PermissionProfile,
        mediator: Option<Arc<dyn AskMediator>>,
        store: Store,
        agent_name: impl Into<String>,
        channel_id: u64,
        requesting_user: Option<u64>,
        model: impl Into<String>,
        max_iterations: Option<usize>,
    ) -> Self {
        Self {
            provider,
            tools,
            profile,
            mediator,
            store,
            agent_name: agent_name.into(),
            channel_id,
            requesting_user,
            model: model.into(),
            max_iterations: max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            request: LlmRequestConfig::default(),
        }
    }

    /// Run the loop over the branch's message list until the model stops
    /// calling tools or the cap is reached.
    pub async fn run(&self, thread: &Arc<ExecutionThread>) -> Result<LoopOutcome, ProviderError> {
        let tool_defs = self.tools.definitions();
        let mut usage = UsageInfo::default();

        for iteration in 0..self.max_iterations {
            // Injections become visible here, never mid-iteration.
            let absorbed = thread.absorb_pending();
            if absorbed > 0 {
                debug!(thread = thread.id, absorbed, "picked up injected messages");
            }

            thread.begin_step(format!("thinking (iteration {})", iteration + 1));
            let messages = thread.messages_snapshot();
            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request)
                .await?;

            if let Some(u) = &response.usage {
                usage.add(u);
            }

            if !response.has_tool_calls() {
                let content = response.content.clone();
                thread.push_message(ChatMessage::assistant(
                    content.clone().unwrap_or_default(),
                ));
                return Ok(LoopOutcome {
                    content,
                    iterations: iteration + 1,
                    usage,
                    exhausted: false,
                });
            }

            thread.push_message(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Sequential execution preserves a deterministic audit order.
            for tool_call in &response.tool_calls {
                thread.begin_step(format!("running {}", tool_call.function.name));
                let result = self.gate_and_execute(tool_call).await;
                thread.push_message(ChatMessage::tool_result(&tool_call.id, result));
            }
        }

        info!(
            agent = %self.agent_name,
            thread = thread.id,
            cap = self.max_iterations,
            "tool loop exhausted iteration cap"
        );
        Ok(LoopOutcome {
            content: None,
            iterations: self.max_iterations,
            usage,
            exhausted: true,
        })
    }

    /// Permission-gate one tool call and run it if allowed.
    async fn gate_and_execute(&self, tool_call: &ToolCall) -> String {
        let name = &tool_call.function.name;
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = %name, "model called unknown tool");
            return format!("Error: Tool '{name}' not found");
        };

        let params: HashMap<String, serde_json::Value> =
            serde_json::from_str(&tool_call.function.arguments).unwrap_or_default();
        let action = tool.action(&params);

        match check(&action, &self.profile) {
            PermissionResult::Allow => {
                self.audit(&action, "allow", None).await;
                self.tools.execute(name, params).await
            }
            PermissionResult::Ask => {
                let approved = match (&self.mediator, self.requesting_user) {
                    (Some(mediator), Some(user_id)) => {
                        let request = AskRequest {
                            action_string: action.clone(),
                            tool_name: name.clone(),
                            arguments: tool_call.function.arguments.clone(),
                        };
                        mediator
                            .resolve(&self.agent_name, self.channel_id, user_id, &request)
                            .await
                    }
                    // No way to ask anyone: fail closed.
                    _ => {
                        self.audit(&action, "deny", Some("no ask mediator available".into()))
                            .await;
                        false
                    }
                };

                if approved {
                    self.tools.execute(name, params).await
                } else {
                    format!("Permission denied: '{action}' was not approved")
                }
            }
            PermissionResult::Deny => {
                self.audit(&action, "deny", None).await;
                info!(agent = %self.agent_name, action = %action, "tool call denied by profile");
                format!("Permission denied for action '{action}'")
            }
        }
    }

    async fn audit(&self, action: &str, decision: &str, detail: Option<String>) {
        if let Err(e) = self
            .store
            .append_audit(
                &self.agent_name,
                action,
                decision,
                self.requesting_user,
                detail,
            )
            .await
        {
            warn!(error = %e, "failed to write audit row");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
