//! Cross-agent tools — send messages, read docs, list agents.
//!
//! Sends are fire-and-forget: the target agent runs the message as a new
//! branch under its *own* permission profile, never the sender's. Self-sends
//! and unknown targets are tool-level errors the model can react to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use chorus_core::permissions::format_action;

use crate::directory::extract_first_paragraph;

use super::base::{require_string, Tool};

/// Spawns branches on other agents. Implemented by the runtime.
#[async_trait]
pub trait BranchSpawner: Send + Sync {
    /// Start a new execution thread on `target_agent` with an attributed
    /// message from `sender_agent`. The target's own permissions apply.
    async fn spawn_agent_branch(
        &self,
        target_agent: &str,
        message: &str,
        sender_agent: &str,
    ) -> anyhow::Result<()>;
}

fn agent_dir(chorus_home: &std::path::Path, name: &str) -> PathBuf {
    chorus_home.join("agents").join(name)
}

// ─────────────────────────────────────────────
// SendAgentMessageTool
// ─────────────────────────────────────────────

/// Fire-and-forget message to another agent.
pub struct SendAgentMessageTool {
    agent_name: String,
    chorus_home: PathBuf,
    spawner: Arc<dyn BranchSpawner>,
}

impl SendAgentMessageTool {
    pub fn new(
        agent_name: impl Into<String>,
        chorus_home: PathBuf,
        spawner: Arc<dyn BranchSpawner>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            chorus_home,
            spawner,
        }
    }
}

#[async_trait]
impl Tool for SendAgentMessageTool {
    fn name(&self) -> &str {
        "send_agent_message"
    }

    fn description(&self) -> &str {
        "Send a fire-and-forget message to another agent. The target works on it as a \
         new task under its own permissions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Name of the agent to message"
                },
                "message": {
                    "type": "string",
                    "description": "What to tell the target agent"
                }
            },
            "required": ["target", "message"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let target = params.get("target").and_then(|v| v.as_str()).unwrap_or("");
        format_action("agent", &format!("send:{target}"))
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let target = require_string(&params, "target")?;
        let message = require_string(&params, "message")?;

        if target == self.agent_name {
            anyhow::bail!("Cannot send a message to your own agent");
        }
        if !agent_dir(&self.chorus_home, &target).is_dir() {
            anyhow::bail!("Agent '{target}' not found");
        }

        self.spawner
            .spawn_agent_branch(&target, &message, &self.agent_name)
            .await?;

        info!(from = %self.agent_name, to = %target, "agent message delivered");
        Ok(format!("Delivered to '{target}'."))
    }
}

// ─────────────────────────────────────────────
// ListAgentsTool
// ─────────────────────────────────────────────

/// Lists other agents with model and description.
pub struct ListAgentsTool {
    agent_name: String,
    chorus_home: PathBuf,
}

impl ListAgentsTool {
    pub fn new(agent_name: impl Into<String>, chorus_home: PathBuf) -> Self {
        Self {
            agent_name: agent_name.into(),
            chorus_home,
        }
    }
}

#[async_trait]
impl Tool for ListAgentsTool {
    fn name(&self) -> &str {
        "list_agents"
    }

    fn description(&self) -> &str {
        "List the other agents you can message, with their models and descriptions."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    fn action(&self, _params: &HashMap<String, Value>) -> String {
        format_action("agent", "list:")
    }

    async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
        let agents_dir = self.chorus_home.join("agents");
        let Ok(entries) = std::fs::read_dir(&agents_dir) else {
            return Ok(json!({"agents": []}).to_string());
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != &self.agent_name)
            .collect();
        names.sort();

        let mut agents = Vec::new();
        for name in names {
            let dir = agents_dir.join(&name);

            let model = std::fs::read_to_string(dir.join("agent.json"))
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .and_then(|data| data.get("model").and_then(|m| m.as_str()).map(String::from));

            let description = std::fs::read_to_string(dir.join("docs").join("README.md"))
                .map(|text| extract_first_paragraph(&text))
                .unwrap_or_default();

            agents.push(json!({
                "name": name,
                "model": model,
                "description": description,
            }));
        }

        Ok(json!({ "agents": agents }).to_string())
    }
}

// ─────────────────────────────────────────────
// ReadAgentDocsTool
// ─────────────────────────────────────────────

/// Reads every markdown file in another agent's docs directory.
pub struct ReadAgentDocsTool {
    agent_name: String,
    chorus_home: PathBuf,
}

impl ReadAgentDocsTool {
    pub fn new(agent_name: impl Into<String>, chorus_home: PathBuf) -> Self {
        Self {
            agent_name: agent_name.into(),
            chorus_home,
        }
    }
}

#[async_trait]
impl Tool for ReadAgentDocsTool {
    fn name(&self) -> &str {
        "read_agent_docs"
    }

    fn description(&self) -> &str {
        "Read all markdown docs another agent keeps in its docs/ directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Name of the agent whose docs to read"
                }
            },
            "required": ["target"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let target = params.get("target").and_then(|v| v.as_str()).unwrap_or("");
        format_action("agent", &format!("docs:{target}"))
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let target = require_string(&params, "target")?;

        if target == self.agent_name {
            anyhow::bail!("Use your own docs/ directory directly");
        }
        let dir = agent_dir(&self.chorus_home, &target);
        if !dir.is_dir() {
            anyhow::bail!("Agent '{target}' not found");
        }

        let mut docs = serde_json::Map::new();
        let docs_dir = dir.join("docs");
        let mut paths: Vec<PathBuf> = walk_markdown(&docs_dir);
        paths.sort();
        for path in paths {
            let rel = path
                .strip_prefix(&docs_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let content =
                std::fs::read_to_string(&path).unwrap_or_else(|_| "(unreadable)".into());
            docs.insert(rel, json!(content));
        }

        Ok(json!({ "agent": target, "docs": docs }).to_string())
    }
}

/// Recursively collect `.md` files.
fn walk_markdown(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(walk_markdown(&path));
        } else if path.extension().is_some_and(|ext| ext == "md") {
            found.push(path);
        }
    }
    found
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
