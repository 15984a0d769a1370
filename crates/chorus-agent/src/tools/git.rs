//! Git tool — version control scoped to the agent workspace.
//!
//! The detail of the action string is the raw argument line, so permission
//! profiles can treat `push` differently from everything else
//! (`tool:git:push origin main` vs `tool:git:status`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use chorus_core::permissions::format_action;

use super::base::{require_string, Tool};

/// Wall-clock bound for a git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum output returned to the model (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Runs git commands in the agent's workspace repository.
pub struct GitTool {
    workspace: PathBuf,
}

impl GitTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Run a git command in the workspace repository, e.g. args='status', \
         args='commit -m \"message\"', args='push origin main'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "args": {
                    "type": "string",
                    "description": "Arguments after 'git', e.g. 'status' or 'log --oneline -5'"
                }
            },
            "required": ["args"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let args = params.get("args").and_then(|v| v.as_str()).unwrap_or("");
        format_action("git", args)
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let args = require_string(&params, "args")?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(format!("git {args}"))
            .current_dir(&self.workspace)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to run git: {e}"))?;

        let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("git timed out after {} seconds", GIT_TIMEOUT.as_secs()))?
            .map_err(|e| anyhow::anyhow!("git failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout);
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        if code != 0 {
            parts.push(format!("Exit code: {code}"));
        }

        let mut combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        if combined.len() > MAX_OUTPUT_LEN {
            combined.truncate(MAX_OUTPUT_LEN);
            combined.push_str("\n... (truncated)");
        }
        Ok(combined)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let status = Command::new("git")
            .arg("init")
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        assert!(status.status.success());
        dir
    }

    fn args(value: &str) -> HashMap<String, Value> {
        let mut params = HashMap::new();
        params.insert("args".to_string(), json!(value));
        params
    }

    #[tokio::test]
    async fn test_status_in_fresh_repo() {
        let dir = init_repo().await;
        let tool = GitTool::new(dir.path().to_path_buf());
        let out = tool.execute(args("status --porcelain")).await.unwrap();
        // Fresh repo, nothing staged
        assert_eq!(out, "(no output)");
    }

    #[tokio::test]
    async fn test_status_sees_new_file() {
        let dir = init_repo().await;
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let tool = GitTool::new(dir.path().to_path_buf());
        let out = tool.execute(args("status --porcelain")).await.unwrap();
        assert!(out.contains("new.txt"));
    }

    #[tokio::test]
    async fn test_failed_command_reports_exit_code() {
        let dir = init_repo().await;
        let tool = GitTool::new(dir.path().to_path_buf());
        let out = tool.execute(args("checkout does-not-exist")).await.unwrap();
        assert!(out.contains("Exit code:"));
    }

    #[test]
    fn test_action_distinguishes_push() {
        let tool = GitTool::new(PathBuf::from("/tmp"));
        assert_eq!(tool.action(&args("status")), "tool:git:status");
        assert_eq!(
            tool.action(&args("push origin main")),
            "tool:git:push origin main"
        );
    }
}
