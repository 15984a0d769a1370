//! Bash tool — shell commands through the process supervisor.
//!
//! Foreground commands wait for exit (bounded by the configured cap) and
//! return the captured output; background commands return immediately and
//! stay under supervision with trigger callbacks, optionally translated from
//! natural-language monitor instructions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use chorus_core::error::ChorusError;
use chorus_core::permissions::format_action;
use chorus_process::{ProcessSupervisor, ProcessType, SpawnRequest};
use chorus_providers::LlmProvider;

use crate::subagent::build_callbacks_from_instructions;

use super::base::{optional_bool, optional_i64, optional_string, require_string, Tool};

/// Maximum output returned to the model (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Default foreground timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Executes shell commands under process supervision.
pub struct BashTool {
    agent_name: String,
    /// Default working directory (the agent workspace).
    workspace: PathBuf,
    /// Root for per-pid log directories.
    log_root: PathBuf,
    supervisor: ProcessSupervisor,
    /// Hard cap on foreground waits; requests above it are clamped.
    max_timeout: Duration,
    /// Cheap model for translating monitor instructions into callbacks.
    callback_builder: Option<(Arc<dyn LlmProvider>, String)>,
}

impl BashTool {
    pub fn new(
        agent_name: impl Into<String>,
        workspace: PathBuf,
        log_root: PathBuf,
        supervisor: ProcessSupervisor,
        max_timeout: Duration,
        callback_builder: Option<(Arc<dyn LlmProvider>, String)>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            workspace,
            log_root,
            supervisor,
            max_timeout,
            callback_builder,
        }
    }

    fn effective_timeout(&self, requested: Option<i64>) -> Duration {
        let requested = requested
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t as u64))
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        requested.min(self.max_timeout)
    }

    /// Read back the supervisor's log files as the tool result.
    fn collect_output(&self, pid: u32, exit_code: Option<i32>) -> String {
        let log_dir = self.log_root.join(pid.to_string());
        let stdout = std::fs::read_to_string(log_dir.join("stdout.log")).unwrap_or_default();
        let stderr = std::fs::read_to_string(log_dir.join("stderr.log")).unwrap_or_default();

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout);
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        match exit_code {
            Some(0) => {}
            Some(code) => parts.push(format!("Exit code: {code}")),
            None => parts.push("Terminated by signal".to_string()),
        }

        let mut combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        if combined.len() > MAX_OUTPUT_LEN {
            let remaining = combined.len() - MAX_OUTPUT_LEN;
            combined.truncate(MAX_OUTPUT_LEN);
            combined.push_str(&format!("\n... (truncated, {remaining} more chars)"));
        }
        combined
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace. Set background=true for long-running \
         commands; they keep running under supervision and you can attach monitor \
         instructions (e.g. 'if it prints ERROR, stop it and tell me')."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run without waiting; the process stays tracked"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Foreground wait in seconds (capped by configuration)"
                },
                "monitor": {
                    "type": "string",
                    "description": "Natural-language monitoring instructions for background commands"
                },
                "context": {
                    "type": "string",
                    "description": "Note to attach to the tracked process"
                }
            },
            "required": ["command"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let command = params.get("command").and_then(|v| v.as_str()).unwrap_or("");
        format_action("bash", command)
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let background = optional_bool(&params, "background");
        let context = optional_string(&params, "context");

        if background {
            let monitor = optional_string(&params, "monitor").unwrap_or_default();
            let callbacks = match &self.callback_builder {
                Some((provider, model)) => {
                    build_callbacks_from_instructions(Some(provider.as_ref()), model, &monitor)
                        .await
                }
                None => build_callbacks_from_instructions(None, "", &monitor).await,
            };

            let pid = self
                .supervisor
                .spawn(SpawnRequest {
                    agent_name: self.agent_name.clone(),
                    command: command.clone(),
                    working_dir: self.workspace.clone(),
                    log_root: self.log_root.clone(),
                    process_type: ProcessType::Background,
                    callbacks,
                    context,
                })
                .await?;

            info!(pid, agent = %self.agent_name, "background command started");
            return Ok(format!(
                "Started background process {pid}. It stays tracked; you'll hear back when \
                 its callbacks fire."
            ));
        }

        let timeout = self.effective_timeout(optional_i64(&params, "timeout"));
        let pid = self
            .supervisor
            .spawn(SpawnRequest {
                agent_name: self.agent_name.clone(),
                command: command.clone(),
                working_dir: self.workspace.clone(),
                log_root: self.log_root.clone(),
                process_type: ProcessType::Foreground,
                callbacks: Vec::new(),
                context,
            })
            .await?;

        match self.supervisor.wait_for_exit(pid, timeout).await {
            Ok(exit_code) => {
                // Give the monitor a beat to flush the last lines.
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(self.collect_output(pid, exit_code))
            }
            Err(ChorusError::Timeout(secs)) => {
                self.supervisor.kill_process(pid).await;
                Ok(format!("Error: Command timed out after {secs} seconds"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
