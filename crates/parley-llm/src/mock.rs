//! Scripted provider for deterministic tests without network access.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;

use parley_core::{
    ChatOptions, ChatResult, Message, ModelInfo, ProviderAdapter, ProviderError, StopReason,
    TokenUsage, ToolCall, ToolCallId, ToolDefinition, ToolReplay, ToolRound, ToolUse,
};

/// Script key matching any model without its own script.
pub const ANY_MODEL: &str = "*";

/// Pre-programmed responses.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Emit the whole text as one chunk.
    Text(String),
    /// Emit each chunk after `delay`, checking cancellation before every chunk.
    Chunks { chunks: Vec<String>, delay: Duration },
    /// Optional text followed by a tool-use stop.
    ToolCalls { text: String, calls: Vec<ToolCall> },
    Error(ProviderError),
    /// Wait, then produce the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn chunks(chunks: &[&str], delay: Duration) -> Self {
        Self::Chunks {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            delay,
        }
    }

    /// A single tool call with a fresh id.
    pub fn tool_call(name: &str, input: serde_json::Value) -> Self {
        Self::ToolCalls {
            text: String::new(),
            calls: vec![ToolCall {
                id: ToolCallId::new(),
                name: name.to_string(),
                input,
            }],
        }
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// What the provider was asked to do on one call.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub rounds: Vec<ToolRound>,
    pub tools: Vec<ToolDefinition>,
}

/// Provider returning scripted responses per model. The last response in a
/// script repeats once the script is otherwise used up.
pub struct MockProvider {
    name: String,
    scripts: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
    initialized: AtomicBool,
    tool_capable: bool,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            initialized: AtomicBool::new(true),
            tool_capable: true,
        }
    }

    /// Script for every model.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        self.script(ANY_MODEL, responses)
    }

    pub fn script(self, model: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts.lock().insert(model.to_string(), responses.into());
        self
    }

    /// Drop multi-turn tool support.
    pub fn text_only(mut self) -> Self {
        self.tool_capable = false;
        self
    }

    pub fn uninitialized(self) -> Self {
        self.initialized.store(false, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn next_response(&self, model: &str) -> Result<MockResponse, ProviderError> {
        let mut scripts = self.scripts.lock();
        let key = if scripts.contains_key(model) { model } else { ANY_MODEL };
        let queue = scripts.get_mut(key).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("no mock script for model '{model}'"))
        })?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| ProviderError::InvalidRequest(format!("empty mock script for '{model}'")))
    }

    async fn respond(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ProviderError::NotInitialized(self.name.clone()));
        }
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(RecordedCall {
            model: options.model.clone(),
            system_prompt: options.system_prompt.clone(),
            messages: messages.to_vec(),
            rounds: rounds.to_vec(),
            tools: options.tools.clone(),
        });

        let mut response = self.next_response(&options.model)?;
        loop {
            match response {
                MockResponse::Delay(delay, inner) => {
                    tokio::select! {
                        biased;
                        () = options.cancel.cancelled() => return Ok(ChatResult::cancelled()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    response = *inner;
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Text(text) => return Ok(stream_chunks(vec![text], Duration::ZERO, options).await),
                MockResponse::Chunks { chunks, delay } => {
                    return Ok(stream_chunks(chunks, delay, options).await)
                }
                MockResponse::ToolCalls { text, calls } => {
                    let mut result = stream_chunks(vec![text], Duration::ZERO, options).await;
                    if result.cancelled {
                        return Ok(result);
                    }
                    result.tool_use = calls
                        .iter()
                        .map(|c| ToolUse::pending(c.id.clone(), c.name.clone(), c.input.clone()))
                        .collect();
                    result.tool_calls = calls;
                    result.stop_reason = StopReason::ToolUse;
                    return Ok(result);
                }
            }
        }
    }
}

async fn stream_chunks(chunks: Vec<String>, delay: Duration, options: &ChatOptions) -> ChatResult {
    let mut content = String::new();
    for chunk in chunks.into_iter().filter(|c| !c.is_empty()) {
        tokio::select! {
            biased;
            () = options.cancel.cancelled() => {
                return ChatResult {
                    content,
                    cancelled: true,
                    ..Default::default()
                };
            }
            () = tokio::time::sleep(delay) => {}
        }
        options.emit(&chunk);
        content.push_str(&chunk);
    }
    let output_tokens = content.len().div_ceil(4) as u64;
    ChatResult {
        content,
        stop_reason: StopReason::EndTurn,
        usage: Some(TokenUsage {
            input_tokens: 0,
            output_tokens,
        }),
        cancelled: options.cancel.is_cancelled(),
        ..Default::default()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, _credential: SecretString) -> Result<(), ProviderError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn send_message(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        self.respond(messages, &[], options).await
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            display_name: "Mock".into(),
            context_window: 100_000,
            max_output_tokens: 4_096,
            supports_tools: self.tool_capable,
            supports_images: false,
        }]
    }

    fn tool_replay(&self) -> Option<&dyn ToolReplay> {
        if self.tool_capable {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl ToolReplay for MockProvider {
    async fn send_message_with_tool_results(
        &self,
        messages: &[Message],
        rounds: &[ToolRound],
        options: &ChatOptions,
    ) -> Result<ChatResult, ProviderError> {
        self.respond(messages, rounds, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn scripts_advance_and_last_repeats() {
        let p = MockProvider::new("mock").with_responses(vec![
            MockResponse::text("one"),
            MockResponse::text("two"),
        ]);
        let opts = ChatOptions::new("any");
        let msgs = [Message::user("hi")];
        assert_eq!(p.send_message(&msgs, &opts).await.unwrap().content, "one");
        assert_eq!(p.send_message(&msgs, &opts).await.unwrap().content, "two");
        assert_eq!(p.send_message(&msgs, &opts).await.unwrap().content, "two");
        assert_eq!(p.call_count(), 3);
    }

    #[tokio::test]
    async fn per_model_scripts_override_fallback() {
        let p = MockProvider::new("mock")
            .with_responses(vec![MockResponse::text("default")])
            .script("special", vec![MockResponse::text("special")]);
        let msgs = [Message::user("hi")];
        let a = p.send_message(&msgs, &ChatOptions::new("special")).await.unwrap();
        let b = p.send_message(&msgs, &ChatOptions::new("other")).await.unwrap();
        assert_eq!(a.content, "special");
        assert_eq!(b.content, "default");
        assert_eq!(p.calls()[1].model, "other");
    }

    #[tokio::test]
    async fn tool_calls_stop_for_tools() {
        let p = MockProvider::new("mock")
            .with_responses(vec![MockResponse::tool_call("read", serde_json::json!({"p": 1}))]);
        let result = p.send_message(&[Message::user("x")], &ChatOptions::new("m")).await.unwrap();
        assert!(result.wants_tools());
        assert_eq!(result.tool_use.len(), 1);
    }

    #[tokio::test]
    async fn cancel_mid_chunks_keeps_partial() {
        tokio::time::pause();
        let p = MockProvider::new("mock").with_responses(vec![MockResponse::chunks(
            &["a", "b", "c", "d"],
            Duration::from_millis(10),
        )]);
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let opts = ChatOptions::new("m").with_cancel(cancel).with_on_chunk(Arc::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                trip.cancel();
            }
        }));
        let result = p.send_message(&[Message::user("x")], &opts).await.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.content, "ab");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_and_capabilities() {
        let p = MockProvider::new("mock")
            .with_responses(vec![MockResponse::Error(ProviderError::Overloaded("busy".into()))])
            .text_only();
        assert!(p.tool_replay().is_none());
        let err = p.send_message(&[Message::user("x")], &ChatOptions::new("m")).await.unwrap_err();
        assert!(err.is_overload());

        let unready = MockProvider::new("mock").uninitialized();
        let err = unready.send_message(&[], &ChatOptions::new("m")).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotInitialized(_)));
        assert_eq!(unready.call_count(), 0);
    }
}
