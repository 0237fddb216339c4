//! Messages API stream state machine.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use parley_core::{
    ChatOptions, ChatResult, ProviderError, StopReason, TokenUsage, ToolCall, ToolCallId, ToolUse,
};

use crate::sse::SseFrame;
use crate::stream::{parse_tool_arguments, Flow, StreamHandler};

enum Block {
    Text(String),
    ToolUse { id: String, name: String, json: String },
}

#[derive(Default)]
pub struct AnthropicStream {
    blocks: BTreeMap<usize, Block>,
    text: String,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
}

impl AnthropicStream {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamHandler for AnthropicStream {
    fn handle(&mut self, frame: &SseFrame, options: &ChatOptions) -> Result<Flow, ProviderError> {
        let event_type = match frame.event.as_deref() {
            Some(e) => e.to_string(),
            None => serde_json::from_str::<TypeOnly>(&frame.data)
                .map(|t| t.event_type)
                .unwrap_or_default(),
        };

        match event_type.as_str() {
            "message_start" => {
                if let Ok(ev) = serde_json::from_str::<MessageStartEvent>(&frame.data) {
                    if let Some(usage) = ev.message.usage {
                        self.input_tokens = usage.input_tokens.unwrap_or(0);
                        self.output_tokens = usage.output_tokens.unwrap_or(0);
                    }
                }
            }
            "content_block_start" => {
                if let Ok(ev) = serde_json::from_str::<ContentBlockStartEvent>(&frame.data) {
                    let block = match ev.content_block.get("type").and_then(Value::as_str) {
                        Some("text") => Block::Text(String::new()),
                        Some("tool_use") => Block::ToolUse {
                            id: str_field(&ev.content_block, "id"),
                            name: str_field(&ev.content_block, "name"),
                            json: String::new(),
                        },
                        other => {
                            debug!(block_type = ?other, "ignoring content block");
                            return Ok(Flow::Continue);
                        }
                    };
                    self.blocks.insert(ev.index, block);
                }
            }
            "content_block_delta" => {
                if let Ok(ev) = serde_json::from_str::<ContentBlockDeltaEvent>(&frame.data) {
                    match ev.delta.get("type").and_then(Value::as_str) {
                        Some("text_delta") => {
                            let text = ev.delta.get("text").and_then(Value::as_str).unwrap_or("");
                            if text.is_empty() {
                                return Ok(Flow::Continue);
                            }
                            if let Some(Block::Text(buf)) = self.blocks.get_mut(&ev.index) {
                                buf.push_str(text);
                            }
                            self.text.push_str(text);
                            options.emit(text);
                        }
                        Some("input_json_delta") => {
                            let partial =
                                ev.delta.get("partial_json").and_then(Value::as_str).unwrap_or("");
                            if let Some(Block::ToolUse { json, .. }) = self.blocks.get_mut(&ev.index) {
                                json.push_str(partial);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "message_delta" => {
                if let Ok(ev) = serde_json::from_str::<MessageDeltaEvent>(&frame.data) {
                    if let Some(reason) = ev.delta.and_then(|d| d.stop_reason) {
                        self.stop_reason = Some(reason);
                    }
                    if let Some(out) = ev.usage.and_then(|u| u.output_tokens) {
                        self.output_tokens = out;
                    }
                }
            }
            "message_stop" => return Ok(Flow::Done),
            "error" => {
                let err = serde_json::from_str::<ErrorEvent>(&frame.data)
                    .map(|e| classify_error(&e.error))
                    .unwrap_or_else(|_| ProviderError::StreamInterrupted(frame.data.clone()));
                return Err(err);
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    fn finish(self, cancelled: bool) -> ChatResult {
        let mut tool_calls = Vec::new();
        if !cancelled {
            for block in self.blocks.into_values() {
                if let Block::ToolUse { id, name, json } = block {
                    if let Some(input) = parse_tool_arguments("anthropic", &id, &name, &json) {
                        tool_calls.push(ToolCall {
                            id: ToolCallId::from_raw(id),
                            name,
                            input,
                        });
                    }
                }
            }
        }

        let stop_reason = match self.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            Some(_) => StopReason::EndTurn,
            None if !tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };

        let usage = (self.input_tokens > 0 || self.output_tokens > 0).then_some(TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        });

        ChatResult {
            content: self.text,
            tool_use: tool_calls
                .iter()
                .map(|c| ToolUse::pending(c.id.clone(), c.name.clone(), c.input.clone()))
                .collect(),
            tool_calls,
            stop_reason,
            usage,
            cancelled,
        }
    }
}

pub(crate) fn classify_error(err: &ErrorPayload) -> ProviderError {
    match err.error_type.as_str() {
        "overloaded_error" => ProviderError::Overloaded(err.message.clone()),
        "rate_limit_error" => ProviderError::RateLimited { retry_after: None },
        "authentication_error" | "permission_error" => {
            ProviderError::AuthenticationFailed(err.message.clone())
        }
        "invalid_request_error" | "not_found_error" => {
            ProviderError::InvalidRequest(err.message.clone())
        }
        _ => ProviderError::ServerError {
            status: 500,
            body: err.message.clone(),
        },
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type", default)]
    event_type: String,
}

#[derive(Deserialize)]
struct MessageStartEvent {
    message: MessageStartPayload,
}

#[derive(Deserialize)]
struct MessageStartPayload {
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: Value,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    #[serde(default)]
    index: usize,
    delta: Value,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: Option<MessageDeltaPayload>,
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}
