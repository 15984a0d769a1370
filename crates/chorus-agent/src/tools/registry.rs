//! Tool registry — name-keyed with insertion-order traversal.
//!
//! Registration order is the order tool definitions reach the LLM, so it is
//! preserved rather than sorted.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use chorus_core::types::ToolDefinition;

use super::base::Tool;

/// Stores tools and dispatches calls by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order for definition traversal.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Re-registering a name replaces the tool but keeps
    /// its original position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name.clone());
        }
        info!(tool = %name, "registered tool");
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// LLM-facing definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .collect()
    }

    /// Execute a tool by name. The LLM always gets a string back, even on
    /// failure.
    pub async fn execute(
        &self,
        name: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "tool not found");
            return format!("Error: Tool '{name}' not found");
        };

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
