//! Data model for tracked processes and their trigger callbacks.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Process classification
// ─────────────────────────────────────────────

/// Whether the spawning tool waits for the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    Foreground,
    Background,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Foreground => "foreground",
            ProcessType::Background => "background",
        }
    }
}

/// Lifecycle of a tracked process. RUNNING transitions exactly once to one of
/// the terminal states and never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Exited,
    Killed,
    /// The monitor was gone at registry-scan time; nothing more is known.
    Lost,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Exited => "exited",
            ProcessStatus::Killed => "killed",
            ProcessStatus::Lost => "lost",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }
}

// ─────────────────────────────────────────────
// Triggers
// ─────────────────────────────────────────────

/// Which exit-code class a trigger applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitFilter {
    #[default]
    Any,
    Success,
    Failure,
}

impl ExitFilter {
    /// Does `exit_code` fall in this class? A vanished code (killed by
    /// signal) counts as failure.
    pub fn matches(&self, exit_code: Option<i32>) -> bool {
        match self {
            ExitFilter::Any => true,
            ExitFilter::Success => exit_code == Some(0),
            ExitFilter::Failure => exit_code != Some(0),
        }
    }
}

/// What causes a callback to fire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookTrigger {
    /// Fire when the process exits with a matching code class.
    OnExit {
        #[serde(default)]
        exit_filter: ExitFilter,
    },
    /// Fire when an output line matches `pattern`. With a non-Any
    /// `exit_filter`, firing is deferred to exit and gated on the code class.
    OnOutputMatch {
        pattern: String,
        #[serde(default)]
        exit_filter: ExitFilter,
    },
    /// Fire once the process has run for `timeout_seconds`.
    OnTimeout { timeout_seconds: u64 },
}

impl HookTrigger {
    /// Short human label used in process listings.
    pub fn describe(&self) -> String {
        match self {
            HookTrigger::OnExit { exit_filter } => match exit_filter {
                ExitFilter::Any => "on_exit".to_string(),
                other => format!("on_exit({})", format!("{other:?}").to_lowercase()),
            },
            HookTrigger::OnOutputMatch { pattern, .. } => {
                format!("on_output_match `{pattern}`")
            }
            HookTrigger::OnTimeout { timeout_seconds } => {
                format!("on_timeout {timeout_seconds}s")
            }
        }
    }
}

// ─────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────

/// What a fired callback does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackAction {
    /// Start a new execution thread on the owning agent.
    SpawnBranch,
    /// Terminate the process (graceful, then forceful).
    StopProcess,
    /// Append a system message to the agent's main branch without running.
    InjectContext,
    /// Send a notice to the agent's channel.
    NotifyChannel,
}

impl CallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackAction::SpawnBranch => "spawn_branch",
            CallbackAction::StopProcess => "stop_process",
            CallbackAction::InjectContext => "inject_context",
            CallbackAction::NotifyChannel => "notify_channel",
        }
    }
}

/// A trigger + action pair attached to a tracked process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessCallback {
    pub trigger: HookTrigger,
    pub action: CallbackAction,
    /// Message delivered with the action (branch prompt, injected context,
    /// or channel notice).
    #[serde(default)]
    pub context_message: String,
    /// Debounce window for output triggers: the callback fires only after
    /// this long with no fresh match.
    #[serde(default)]
    pub output_delay_seconds: f64,
    #[serde(default = "default_max_fires")]
    pub max_fires: u32,
    #[serde(default)]
    pub fire_count: u32,
}

fn default_max_fires() -> u32 {
    1
}

impl ProcessCallback {
    /// A callback that has reached its fire cap never fires again.
    pub fn exhausted(&self) -> bool {
        self.fire_count >= self.max_fires
    }
}

// ─────────────────────────────────────────────
// TrackedProcess (public snapshot)
// ─────────────────────────────────────────────

/// Point-in-time view of a supervised process.
#[derive(Clone, Debug)]
pub struct TrackedProcess {
    pub pid: u32,
    pub command: String,
    pub working_directory: PathBuf,
    pub agent_name: String,
    /// ISO-8601 UTC.
    pub started_at: String,
    pub process_type: ProcessType,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    /// Last N output lines, stderr prefixed with `err: `.
    pub rolling_tail: Vec<String>,
    pub callbacks: Vec<ProcessCallback>,
    /// Free-text note attached at spawn time.
    pub context: Option<String>,
    /// Holds `stdout.log` and `stderr.log`.
    pub log_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_filter_matches() {
        assert!(ExitFilter::Any.matches(Some(0)));
        assert!(ExitFilter::Any.matches(Some(1)));
        assert!(ExitFilter::Any.matches(None));

        assert!(ExitFilter::Success.matches(Some(0)));
        assert!(!ExitFilter::Success.matches(Some(2)));
        assert!(!ExitFilter::Success.matches(None));

        assert!(ExitFilter::Failure.matches(Some(1)));
        assert!(ExitFilter::Failure.matches(None));
        assert!(!ExitFilter::Failure.matches(Some(0)));
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ProcessStatus::Running.is_terminal());
        assert!(ProcessStatus::Exited.is_terminal());
        assert!(ProcessStatus::Killed.is_terminal());
        assert!(ProcessStatus::Lost.is_terminal());
    }

    #[test]
    fn test_callback_exhaustion() {
        let mut cb = ProcessCallback {
            trigger: HookTrigger::OnExit {
                exit_filter: ExitFilter::Any,
            },
            action: CallbackAction::SpawnBranch,
            context_message: String::new(),
            output_delay_seconds: 0.0,
            max_fires: 2,
            fire_count: 0,
        };
        assert!(!cb.exhausted());
        cb.fire_count = 1;
        assert!(!cb.exhausted());
        cb.fire_count = 2;
        assert!(cb.exhausted());
    }

    #[test]
    fn test_trigger_serde_shape() {
        let trigger: HookTrigger = serde_json::from_str(
            r#"{"type": "on_output_match", "pattern": "done", "exit_filter": "failure"}"#,
        )
        .unwrap();
        assert_eq!(
            trigger,
            HookTrigger::OnOutputMatch {
                pattern: "done".into(),
                exit_filter: ExitFilter::Failure,
            }
        );

        let trigger: HookTrigger = serde_json::from_str(r#"{"type": "on_exit"}"#).unwrap();
        assert_eq!(
            trigger,
            HookTrigger::OnExit {
                exit_filter: ExitFilter::Any
            }
        );

        let trigger: HookTrigger =
            serde_json::from_str(r#"{"type": "on_timeout", "timeout_seconds": 300}"#).unwrap();
        assert_eq!(
            trigger,
            HookTrigger::OnTimeout {
                timeout_seconds: 300
            }
        );
    }

    #[test]
    fn test_callback_defaults() {
        let cb: ProcessCallback = serde_json::from_str(
            r#"{"trigger": {"type": "on_exit"}, "action": "spawn_branch"}"#,
        )
        .unwrap();
        assert_eq!(cb.max_fires, 1);
        assert_eq!(cb.fire_count, 0);
        assert_eq!(cb.output_delay_seconds, 0.0);
        assert!(cb.context_message.is_empty());
    }

    #[test]
    fn test_trigger_describe() {
        let t = HookTrigger::OnTimeout {
            timeout_seconds: 60,
        };
        assert_eq!(t.describe(), "on_timeout 60s");

        let t = HookTrigger::OnOutputMatch {
            pattern: "error".into(),
            exit_filter: ExitFilter::Any,
        };
        assert!(t.describe().contains("error"));
    }
}
