//! Tool trait — the interface every agent tool implements.
//!
//! Beyond the LLM-facing schema, each tool canonicalizes its arguments into
//! the action string the permission engine checks. The canonicalizer lives on
//! the tool because only the tool knows which argument is the decision-
//! relevant detail.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use chorus_core::types::ToolDefinition;

/// Every agent tool implements this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LLM calls this tool by (e.g. `"str_replace"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters.
    fn parameters(&self) -> Value;

    /// The full action string for these arguments, built through
    /// `format_action` (e.g. `tool:file:view:notes.txt`).
    fn action(&self, params: &HashMap<String, Value>) -> String;

    /// Execute the tool. Errors are folded into tool-result text by the
    /// registry so the model can react.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// The definition sent to the LLM. Rarely overridden.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required `String` param with a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional `String` param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Extract an optional boolean param (false if absent).
pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string() {
        let mut params = HashMap::new();
        params.insert("path".to_string(), json!("notes.txt"));
        assert_eq!(require_string(&params, "path").unwrap(), "notes.txt");
        assert!(require_string(&params, "missing").is_err());

        params.insert("num".to_string(), json!(42));
        assert!(require_string(&params, "num").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), json!(50));
        params.insert("background".to_string(), json!(true));

        assert_eq!(optional_i64(&params, "limit"), Some(50));
        assert_eq!(optional_i64(&params, "absent"), None);
        assert!(optional_bool(&params, "background"));
        assert!(!optional_bool(&params, "absent"));
        assert_eq!(optional_string(&params, "absent"), None);
    }

    #[tokio::test]
    async fn test_to_definition_default() {
        struct DummyTool;

        #[async_trait]
        impl Tool for DummyTool {
            fn name(&self) -> &str {
                "dummy"
            }
            fn description(&self) -> &str {
                "A test tool"
            }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {}, "required": []})
            }
            fn action(&self, _params: &HashMap<String, Value>) -> String {
                chorus_core::permissions::format_action("dummy", "")
            }
            async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
                Ok("ok".into())
            }
        }

        let def = DummyTool.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
        assert_eq!(
            DummyTool.action(&HashMap::new()),
            "tool:dummy:"
        );
    }
}
