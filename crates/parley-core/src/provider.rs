use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::messages::{Message, ToolUse};
use crate::tools::{ToolCall, ToolDefinition, ToolRound};

/// Receives every streamed text delta, in order.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub const DEFAULT_TITLE: &str = "New conversation";
const TITLE_MAX_CHARS: usize = 60;
const TITLE_SYSTEM_PROMPT: &str = "Write a short title (at most six words) for the conversation \
below. Reply with the title only: no quotes, no punctuation at the end, no preamble.";

/// Normalized request options shared by every adapter.
#[derive(Clone)]
pub struct ChatOptions {
    /// Bare vendor model id (no `provider/` prefix).
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub on_chunk: Option<ChunkCallback>,
    pub cancel: CancellationToken,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: String::new(),
            tools: Vec::new(),
            on_chunk: None,
            cancel: CancellationToken::new(),
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_on_chunk(mut self, on_chunk: ChunkCallback) -> Self {
        self.on_chunk = Some(on_chunk);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Forward a text delta to the chunk callback, if any.
    pub fn emit(&self, text: &str) {
        if let Some(cb) = &self.on_chunk {
            cb(text);
        }
    }
}

impl fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatOptions")
            .field("model", &self.model)
            .field("system_prompt_len", &self.system_prompt.len())
            .field("tools", &self.tools.len())
            .field("on_chunk", &self.on_chunk.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Normalized response. A cancelled request is still `Ok`, carrying whatever
/// was streamed before the signal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    /// Tool invocations for display.
    pub tool_use: Vec<ToolUse>,
    /// Calls still waiting for results.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub cancelled: bool,
}

impl ChatResult {
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn wants_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse && !self.tool_calls.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_tools: bool,
    pub supports_images: bool,
}

/// One vendor behind the normalized chat contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self, credential: SecretString) -> Result<(), ProviderError>;

    fn is_initialized(&self) -> bool;

    async fn send_message(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError>;

    fn available_models(&self) -> Vec<ModelInfo>;

    /// Multi-turn tool replay, when the vendor supports tools at all.
    fn tool_replay(&self) -> Option<&dyn ToolReplay> {
        None
    }

    /// Model used for cheap housekeeping requests such as titles.
    fn title_model(&self) -> Option<String> {
        self.available_models().into_iter().next().map(|m| m.id)
    }

    async fn generate_title(
        &self,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<String, ProviderError> {
        let Some(model) = self.title_model() else {
            return Ok(DEFAULT_TITLE.to_string());
        };
        let prompt = format!("User: {user_message}\n\nAssistant: {assistant_message}");
        let options = ChatOptions::new(model)
            .with_system_prompt(TITLE_SYSTEM_PROMPT)
            .with_max_tokens(32);
        let result = self.send_message(&[Message::user(prompt)], &options).await?;
        Ok(clean_title(&result.content))
    }
}

/// Adapters that can replay tool rounds into a follow-up request.
#[async_trait]
pub trait ToolReplay: Send + Sync {
    async fn send_message_with_tool_results(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError>;
}

/// Reduce a model's title reply to a single clean line.
pub fn clean_title(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let line = line.strip_prefix("Title:").unwrap_or(line).trim();
    let line = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches(['.', '!', '?', ':', ';', ','])
        .trim();
    if line.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    match line.char_indices().nth(TITLE_MAX_CHARS) {
        Some((idx, _)) => line[..idx].trim_end().to_string(),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_forwards_to_callback() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let opts = ChatOptions::new("m").with_on_chunk(Arc::new(move |t| {
            sink.lock().unwrap().push_str(t);
        }));
        opts.emit("hel");
        opts.emit("lo");
        assert_eq!(*seen.lock().unwrap(), "hello");
        ChatOptions::new("m").emit("ignored");
    }

    #[test]
    fn stop_reason_serde() {
        assert_eq!(serde_json::to_string(&StopReason::ToolUse).unwrap(), r#""tool_use""#);
        assert_eq!(serde_json::to_string(&StopReason::StopSequence).unwrap(), r#""stop_sequence""#);
        assert_eq!(StopReason::default(), StopReason::EndTurn);
    }

    #[test]
    fn usage_accumulates() {
        let mut u = TokenUsage { input_tokens: 10, output_tokens: 5 };
        u.add(&TokenUsage { input_tokens: 3, output_tokens: 2 });
        assert_eq!(u.total(), 20);
    }

    #[test]
    fn wants_tools_needs_reason_and_calls() {
        let mut r = ChatResult { stop_reason: StopReason::ToolUse, ..Default::default() };
        assert!(!r.wants_tools());
        r.tool_calls.push(ToolCall {
            id: crate::ids::ToolCallId::new(),
            name: "read".into(),
            input: serde_json::json!({}),
        });
        assert!(r.wants_tools());
        r.stop_reason = StopReason::EndTurn;
        assert!(!r.wants_tools());
    }

    #[test]
    fn debug_hides_prompt_text() {
        let opts = ChatOptions::new("m").with_system_prompt("secret instructions");
        let dbg = format!("{opts:?}");
        assert!(!dbg.contains("secret instructions"));
        assert!(dbg.contains("system_prompt_len"));
    }

    #[test]
    fn clean_title_strips_noise() {
        assert_eq!(clean_title("\"Rust lifetimes explained.\"\nextra"), "Rust lifetimes explained");
        assert_eq!(clean_title("Title: Trip planning"), "Trip planning");
        assert_eq!(clean_title("   \n  "), DEFAULT_TITLE);
        assert_eq!(clean_title("\"\""), DEFAULT_TITLE);
    }

    #[test]
    fn clean_title_caps_length_on_char_boundary() {
        let long = "é".repeat(100);
        let title = clean_title(&long);
        assert_eq!(title.chars().count(), 60);
    }
}
