//! Chat Completions stream state machine.
//!
//! Text arrives as `choices[0].delta.content`; tool calls arrive as
//! fragments keyed by `index`, where only the first fragment carries the id
//! and name and later ones append to `arguments`.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use parley_core::{
    ChatOptions, ChatResult, ProviderError, StopReason, TokenUsage, ToolCall, ToolCallId, ToolUse,
};

use crate::sse::SseFrame;
use crate::stream::{parse_tool_arguments, Flow, StreamHandler};

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    args: String,
}

pub struct OpenAiStream {
    provider: String,
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl OpenAiStream {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            text: String::new(),
            calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
        }
    }
}

impl StreamHandler for OpenAiStream {
    fn handle(&mut self, frame: &SseFrame, options: &ChatOptions) -> Result<Flow, ProviderError> {
        if frame.is_done() {
            return Ok(Flow::Done);
        }

        let chunk: Chunk = match serde_json::from_str(&frame.data) {
            Ok(c) => c,
            Err(e) => {
                debug!(provider = %self.provider, error = %e, "skipping unparseable chunk");
                return Ok(Flow::Continue);
            }
        };

        if let Some(err) = chunk.error {
            return Err(classify_error(&err));
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    self.text.push_str(&text);
                    options.emit(&text);
                }
                for frag in delta.tool_calls {
                    let call = self.calls.entry(frag.index).or_default();
                    if let Some(id) = frag.id.filter(|s| !s.is_empty()) {
                        call.id = id;
                    }
                    if let Some(func) = frag.function {
                        if let Some(name) = func.name.filter(|s| !s.is_empty()) {
                            call.name = name;
                        }
                        if let Some(args) = func.arguments {
                            call.args.push_str(&args);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        Ok(Flow::Continue)
    }

    fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    fn finish(self, cancelled: bool) -> ChatResult {
        let mut tool_calls = Vec::new();
        if !cancelled {
            for (index, call) in self.calls {
                if call.name.is_empty() {
                    debug!(provider = %self.provider, index, "dropping tool call without a name");
                    continue;
                }
                let id = if call.id.is_empty() {
                    ToolCallId::new()
                } else {
                    ToolCallId::from_raw(call.id)
                };
                if let Some(input) =
                    parse_tool_arguments(&self.provider, id.as_str(), &call.name, &call.args)
                {
                    tool_calls.push(ToolCall {
                        id,
                        name: call.name,
                        input,
                    });
                }
            }
        }

        let stop_reason = match self.finish_reason.as_deref() {
            Some("tool_calls" | "function_call") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("stop") if !tool_calls.is_empty() => StopReason::ToolUse,
            Some(_) => StopReason::EndTurn,
            None if !tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };

        ChatResult {
            content: self.text,
            tool_use: tool_calls
                .iter()
                .map(|c| ToolUse::pending(c.id.clone(), c.name.clone(), c.input.clone()))
                .collect(),
            tool_calls,
            stop_reason,
            usage: self.usage,
            cancelled,
        }
    }
}

fn classify_error(err: &ApiError) -> ProviderError {
    let kind = err.error_type.as_deref().or(err.code.as_deref()).unwrap_or_default();
    match kind {
        "rate_limit_exceeded" | "rate_limit_error" | "requests" | "tokens" => {
            ProviderError::RateLimited { retry_after: None }
        }
        "server_overloaded" | "overloaded_error" => ProviderError::Overloaded(err.message.clone()),
        "invalid_api_key" | "authentication_error" => {
            ProviderError::AuthenticationFailed(err.message.clone())
        }
        "invalid_request_error" | "context_length_exceeded" => {
            ProviderError::InvalidRequest(err.message.clone())
        }
        _ => ProviderError::ServerError {
            status: 500,
            body: err.message.clone(),
        },
    }
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallFragment>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(d: &str) -> SseFrame {
        SseFrame { event: None, data: d.into() }
    }

    fn run(frames: &[&str]) -> ChatResult {
        let opts = ChatOptions::new("gpt-4o");
        let mut h = OpenAiStream::new("openai");
        for f in frames {
            if h.handle(&data(f), &opts).unwrap() == Flow::Done {
                break;
            }
        }
        h.finish(false)
    }

    #[test]
    fn text_and_usage() {
        let result = run(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"total_tokens":11}}"#,
            "[DONE]",
        ]);
        assert_eq!(result.content, "Hello");
        assert_eq!(result.stop_reason, StopReason::EndTurn);
        assert_eq!(result.usage, Some(TokenUsage { input_tokens: 9, output_tokens: 2 }));
    }

    #[test]
    fn fragmented_tool_calls_by_index() {
        let result = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_2","type":"function","function":{"name":"get_time","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Oslo\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        assert_eq!(result.stop_reason, StopReason::ToolUse);
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].id.as_str(), "call_1");
        assert_eq!(result.tool_calls[0].input["city"], "Oslo");
        assert_eq!(result.tool_calls[1].name, "get_time");
    }

    #[test]
    fn one_bad_tool_call_does_not_sink_the_rest() {
        let result = run(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"x","arguments":"{oops"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"y","arguments":"{\"ok\":true}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id.as_str(), "b");
    }

    #[test]
    fn length_maps_to_max_tokens() {
        let result = run(&[r#"{"choices":[{"delta":{"content":"cut"},"finish_reason":"length"}]}"#]);
        assert_eq!(result.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn in_stream_error_is_classified() {
        let opts = ChatOptions::new("m");
        let mut h = OpenAiStream::new("openai");
        let err = h
            .handle(
                &data(r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#),
                &opts,
            )
            .unwrap_err();
        assert!(err.is_overload());
    }

    #[test]
    fn cancelled_stream_keeps_text_but_no_calls() {
        let opts = ChatOptions::new("m");
        let mut h = OpenAiStream::new("openai");
        h.handle(&data(r#"{"choices":[{"delta":{"content":"part"}}]}"#), &opts).unwrap();
        h.handle(
            &data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"x","arguments":"{}"}}]}}]}"#),
            &opts,
        )
        .unwrap();
        let result = h.finish(true);
        assert!(result.cancelled);
        assert_eq!(result.content, "part");
        assert!(result.tool_calls.is_empty());
    }
}
