use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::{Tool, ToolCall, ToolDefinition, ToolError, ToolRegistry, ToolResult};

/// Dispatches calls to registered [`Tool`] handlers by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for ToolSet {
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool_name = %call.name, tool_call_id = %call.id, "unknown tool requested");
            return ToolResult::error(
                call.id.clone(),
                ToolError::UnknownTool(call.name.clone()).to_string(),
            );
        };

        match tool.execute(call.input.clone()).await {
            Ok(output) => {
                debug!(tool_name = %call.name, output_len = output.len(), "tool succeeded");
                ToolResult::ok(call.id.clone(), output)
            }
            Err(e) => {
                warn!(tool_name = %call.name, tool_call_id = %call.id, error = %e, "tool failed");
                ToolResult::error(call.id.clone(), e.to_string())
            }
        }
    }
}
