//! Callback parsing — JSON (usually produced by a sub-agent from natural
//! language) into [`ProcessCallback`] lists.
//!
//! Tolerant by design: code fences are stripped, a bare object is treated as
//! a one-element array, and invalid items are skipped rather than failing the
//! whole batch. An empty or unparseable input yields the default callback.

use serde::Deserialize;
use tracing::warn;

use crate::models::{CallbackAction, ExitFilter, HookTrigger, ProcessCallback};

/// Debounce applied to output-match callbacks that don't specify one.
pub const DEFAULT_OUTPUT_DELAY_SECS: f64 = 2.0;

/// The fallback when no monitor instructions were given or parsing failed:
/// spawn a review branch when the process exits, once.
pub fn default_callback() -> ProcessCallback {
    ProcessCallback {
        trigger: HookTrigger::OnExit {
            exit_filter: ExitFilter::Any,
        },
        action: CallbackAction::SpawnBranch,
        context_message: "The process you started has exited. Review its output and decide \
                          on next steps."
            .into(),
        output_delay_seconds: 0.0,
        max_fires: 1,
        fire_count: 0,
    }
}

#[derive(Debug, Deserialize)]
struct RawCallback {
    trigger: serde_json::Value,
    action: String,
    #[serde(default)]
    context_message: String,
    output_delay_seconds: Option<f64>,
    max_fires: Option<u32>,
}

/// Parse a JSON payload into callbacks. Returns an empty vec when nothing
/// usable was found (callers decide whether to fall back to the default).
pub fn parse_callbacks(raw: &str, default_output_delay: f64) -> Vec<ProcessCallback> {
    let cleaned = strip_code_fences(raw);

    let items: Vec<serde_json::Value> = match serde_json::from_str::<serde_json::Value>(cleaned) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(obj @ serde_json::Value::Object(_)) => vec![obj],
        Ok(_) | Err(_) => {
            warn!("callback payload is not JSON, ignoring");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match parse_single(item, default_output_delay) {
            Ok(cb) => Some(cb),
            Err(e) => {
                warn!(error = %e, "skipping invalid callback item");
                None
            }
        })
        .collect()
}

fn parse_single(
    item: serde_json::Value,
    default_output_delay: f64,
) -> Result<ProcessCallback, String> {
    let raw: RawCallback = serde_json::from_value(item).map_err(|e| e.to_string())?;

    let trigger: HookTrigger =
        serde_json::from_value(raw.trigger).map_err(|e| format!("bad trigger: {e}"))?;

    // Output patterns must compile; a broken pattern would never fire.
    if let HookTrigger::OnOutputMatch { pattern, .. } = &trigger {
        regex::Regex::new(pattern).map_err(|e| format!("bad pattern: {e}"))?;
    }

    let action = match raw.action.as_str() {
        "spawn_branch" => CallbackAction::SpawnBranch,
        "stop_process" => CallbackAction::StopProcess,
        "inject_context" => CallbackAction::InjectContext,
        "notify_channel" => CallbackAction::NotifyChannel,
        other => return Err(format!("unknown action: {other}")),
    };

    // Output-match triggers debounce by default; everything else fires flat.
    let output_delay_seconds = raw.output_delay_seconds.unwrap_or(match trigger {
        HookTrigger::OnOutputMatch { .. } => default_output_delay,
        _ => 0.0,
    });

    Ok(ProcessCallback {
        trigger,
        action,
        context_message: raw.context_message,
        output_delay_seconds,
        max_fires: raw.max_fires.unwrap_or(1),
        fire_count: 0,
    })
}

/// Strip Markdown code fences around a JSON payload.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_array() {
        let raw = r#"[
            {"trigger": {"type": "on_exit"}, "action": "spawn_branch"},
            {"trigger": {"type": "on_output_match", "pattern": "done"}, "action": "inject_context"}
        ]"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(cbs.len(), 2);
        assert_eq!(cbs[0].action, CallbackAction::SpawnBranch);
        assert_eq!(cbs[1].action, CallbackAction::InjectContext);
    }

    #[test]
    fn test_parse_full_item() {
        let raw = r#"{
            "trigger": {"type": "on_output_match", "pattern": "error|ERROR", "exit_filter": "failure"},
            "action": "stop_process",
            "context_message": "Error detected",
            "output_delay_seconds": 1.5,
            "max_fires": 3
        }"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(cbs.len(), 1);
        let cb = &cbs[0];
        assert_eq!(cb.action, CallbackAction::StopProcess);
        assert_eq!(cb.context_message, "Error detected");
        assert_eq!(cb.output_delay_seconds, 1.5);
        assert_eq!(cb.max_fires, 3);
        assert_eq!(
            cb.trigger,
            HookTrigger::OnOutputMatch {
                pattern: "error|ERROR".into(),
                exit_filter: ExitFilter::Failure,
            }
        );
    }

    #[test]
    fn test_output_match_gets_default_delay() {
        let raw = r#"[{"trigger": {"type": "on_output_match", "pattern": "x"}, "action": "inject_context"}]"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(cbs[0].output_delay_seconds, 2.0);
    }

    #[test]
    fn test_on_exit_gets_zero_delay() {
        let raw = r#"[{"trigger": {"type": "on_exit"}, "action": "spawn_branch"}]"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(cbs[0].output_delay_seconds, 0.0);
        assert_eq!(cbs[0].max_fires, 1);
    }

    #[test]
    fn test_on_timeout() {
        let raw = r#"[{"trigger": {"type": "on_timeout", "timeout_seconds": 300}, "action": "stop_process"}]"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(
            cbs[0].trigger,
            HookTrigger::OnTimeout {
                timeout_seconds: 300
            }
        );
    }

    #[test]
    fn test_markdown_code_fences_stripped() {
        let raw = "```json\n[{\"trigger\": {\"type\": \"on_exit\"}, \"action\": \"spawn_branch\"}]\n```";
        assert_eq!(parse_callbacks(raw, 2.0).len(), 1);
    }

    #[test]
    fn test_single_object_accepted() {
        let raw = r#"{"trigger": {"type": "on_exit"}, "action": "stop_process"}"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(cbs.len(), 1);
        assert_eq!(cbs[0].action, CallbackAction::StopProcess);
    }

    #[test]
    fn test_invalid_json_yields_empty() {
        assert!(parse_callbacks("not json at all", 2.0).is_empty());
    }

    #[test]
    fn test_invalid_items_skipped_valid_kept() {
        let raw = r#"[
            {"trigger": {"type": "on_exit"}, "action": "spawn_branch"},
            {"trigger": {"type": "invalid_type"}, "action": "nope"}
        ]"#;
        let cbs = parse_callbacks(raw, 2.0);
        assert_eq!(cbs.len(), 1);
    }

    #[test]
    fn test_bad_pattern_skipped() {
        let raw = r#"[{"trigger": {"type": "on_output_match", "pattern": "(unclosed"}, "action": "inject_context"}]"#;
        assert!(parse_callbacks(raw, 2.0).is_empty());
    }

    #[test]
    fn test_default_callback_shape() {
        let cb = default_callback();
        assert_eq!(
            cb.trigger,
            HookTrigger::OnExit {
                exit_filter: ExitFilter::Any
            }
        );
        assert_eq!(cb.action, CallbackAction::SpawnBranch);
        assert_eq!(cb.max_fires, 1);
        assert!(!cb.context_message.is_empty());
    }
}
