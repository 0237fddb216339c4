use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Name of the pseudo-tool a model calls to load a skill.
pub const USE_SKILL_TOOL: &str = "use_skill";

/// Provider-independent tool description. Each adapter maps it to its vendor's schema shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool input.
    pub parameters: serde_json::Value,
}

/// One invocation request emitted by a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub input: serde_json::Value,
}

/// Outcome of one tool call, correlated by `tool_use_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: ToolCallId,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_use_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            tool_use_id,
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            tool_use_id,
            content: content.into(),
            is_error: true,
        }
    }
}

/// One turn of the agentic loop: assistant text, its calls, and their results.
///
/// Construction enforces that every call has exactly one result, in call order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRound {
    pub assistant_text: String,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolResult>,
}

impl ToolRound {
    /// Pair results with calls. Results are reordered to match the calls;
    /// duplicates and results for unknown ids are discarded; a call with no
    /// result gets an error result so the vendor never sees a dangling call.
    pub fn new(
        assistant_text: impl Into<String>,
        calls: Vec<ToolCall>,
        results: Vec<ToolResult>,
    ) -> Self {
        let mut pool = results;
        let paired = calls
            .iter()
            .map(|call| match pool.iter().position(|r| r.tool_use_id == call.id) {
                Some(idx) => pool.swap_remove(idx),
                None => ToolResult::error(
                    call.id.clone(),
                    format!("no result was produced for tool '{}'", call.name),
                ),
            })
            .collect();
        Self {
            assistant_text: assistant_text.into(),
            calls,
            results: paired,
        }
    }

    pub fn result_for(&self, id: &ToolCallId) -> Option<&ToolResult> {
        self.results.iter().find(|r| &r.tool_use_id == id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// External tool boundary. Failures come back as `is_error` results, never as errors.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult;
}

/// A single named capability behind a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Supplies the system-prompt fragment describing available skills.
pub trait SkillRegistry: Send + Sync {
    fn build_system_prompt(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: ToolCallId::from_raw(id),
            name: name.into(),
            input: json!({}),
        }
    }

    #[test]
    fn round_reorders_results_to_call_order() {
        let round = ToolRound::new(
            "",
            vec![call("a", "read"), call("b", "grep")],
            vec![
                ToolResult::ok(ToolCallId::from_raw("b"), "second"),
                ToolResult::ok(ToolCallId::from_raw("a"), "first"),
            ],
        );
        assert_eq!(round.results[0].content, "first");
        assert_eq!(round.results[1].content, "second");
    }

    #[test]
    fn round_fills_missing_results() {
        let round = ToolRound::new("thinking", vec![call("a", "read")], vec![]);
        assert_eq!(round.results.len(), 1);
        assert!(round.results[0].is_error);
        assert!(round.results[0].content.contains("read"));
    }

    #[test]
    fn round_drops_duplicates_and_strays() {
        let round = ToolRound::new(
            "",
            vec![call("a", "read")],
            vec![
                ToolResult::ok(ToolCallId::from_raw("a"), "one"),
                ToolResult::ok(ToolCallId::from_raw("a"), "two"),
                ToolResult::ok(ToolCallId::from_raw("zzz"), "stray"),
            ],
        );
        assert_eq!(round.results.len(), 1);
        assert_eq!(round.results[0].tool_use_id.as_str(), "a");
        assert!(round.result_for(&ToolCallId::from_raw("zzz")).is_none());
    }

    #[test]
    fn tool_result_is_error_defaults_false() {
        let r: ToolResult = serde_json::from_str(r#"{"tool_use_id":"x","content":"ok"}"#).unwrap();
        assert!(!r.is_error);
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::UnknownTool("frobnicate".into());
        assert_eq!(err.to_string(), "unknown tool: frobnicate");
    }
}
