//! Vendor-neutral data model and boundaries shared by every parley crate.
//!
//! Nothing in here talks to the network. Provider adapters, the engine and the
//! orchestrators all speak in these types.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod tools;
pub mod trigger;

pub use errors::ProviderError;
pub use ids::{RunId, ToolCallId, TriggerId};
pub use messages::{Attachment, AttachmentKind, Message, Role, SkillUse, ToolUse};
pub use provider::{
    clean_title, ChatOptions, ChatResult, ChunkCallback, ModelInfo, ProviderAdapter, StopReason,
    TokenUsage, ToolReplay, DEFAULT_TITLE,
};
pub use tools::{
    SkillRegistry, Tool, ToolCall, ToolDefinition, ToolError, ToolRegistry, ToolResult, ToolRound,
    USE_SKILL_TOOL,
};
pub use trigger::{Trigger, TriggerCheck, TriggerOutcome, TriggerResult, TRIGGER_HISTORY_LIMIT};
