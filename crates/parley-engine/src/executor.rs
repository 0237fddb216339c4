//! The agentic loop: send, run requested tools, replay, repeat.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use parley_core::{
    ChatOptions, ChatResult, ChunkCallback, Message, ProviderAdapter, SkillRegistry, SkillUse,
    StopReason, TokenUsage, ToolCall, ToolDefinition, ToolRegistry, ToolResult, ToolRound, ToolUse,
    USE_SKILL_TOOL,
};
use parley_settings::ExecutorSettings;

use crate::context::{ContextManager, ContextReport};
use crate::error::EngineError;
use crate::truncate::{preview, PREVIEW_MAX_CHARS};

/// Emitted between tool rounds so streamed text does not run together.
pub const ROUND_SEPARATOR: &str = "\n\n";
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Receives the current displayed tool-use list after every change.
pub type ToolUseCallback = Arc<dyn Fn(&[ToolUse]) + Send + Sync>;

#[derive(Clone)]
pub struct ExecutorOptions {
    pub max_iterations: u32,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt: String,
    pub skills: Option<Arc<dyn SkillRegistry>>,
    pub on_chunk: Option<ChunkCallback>,
    pub on_tool_use: Option<ToolUseCallback>,
    pub cancel: CancellationToken,
    pub max_tokens: Option<u32>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tools: Vec::new(),
            system_prompt: String::new(),
            skills: None,
            on_chunk: None,
            on_tool_use: None,
            cancel: CancellationToken::new(),
            max_tokens: None,
        }
    }
}

impl From<&ExecutorSettings> for ExecutorOptions {
    fn from(s: &ExecutorSettings) -> Self {
        Self {
            max_iterations: s.max_iterations,
            ..Self::default()
        }
    }
}

impl ExecutorOptions {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_on_chunk(mut self, cb: ChunkCallback) -> Self {
        self.on_chunk = Some(cb);
        self
    }

    pub fn with_on_tool_use(mut self, cb: ToolUseCallback) -> Self {
        self.on_tool_use = Some(cb);
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

    fn full_system_prompt(&self) -> String {
        let fragment = self
            .skills
            .as_ref()
            .map(|s| s.build_system_prompt())
            .unwrap_or_default();
        match (self.system_prompt.is_empty(), fragment.trim().is_empty()) {
            (_, true) => self.system_prompt.clone(),
            (true, false) => fragment,
            (false, false) => format!("{}\n\n{fragment}", self.system_prompt),
        }
    }
}

impl fmt::Debug for ExecutorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorOptions")
            .field("max_iterations", &self.max_iterations)
            .field("tools", &self.tools.len())
            .field("system_prompt_len", &self.system_prompt.len())
            .field("skills", &self.skills.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub content: String,
    /// Displayed tool uses, skill loads excluded.
    pub tool_use: Vec<ToolUse>,
    /// Distinct skills loaded during the run.
    pub skill_use: Vec<SkillUse>,
    /// Tool rounds executed.
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
    pub context: ContextReport,
    pub cancelled: bool,
}

/// Drives one conversation turn to convergence.
pub struct ToolExecutor {
    context: ContextManager,
    tools: Arc<dyn ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(context: ContextManager, tools: Arc<dyn ToolRegistry>) -> Self {
        Self { context, tools }
    }

    pub fn context_manager(&self) -> &ContextManager {
        &self.context
    }

    /// Run the loop against `provider` with the bare vendor `model` id.
    #[instrument(skip_all, fields(provider = provider.name(), model = %model))]
    pub async fn run(
        &self,
        provider: &dyn ProviderAdapter,
        messages: &[Message],
        model: &str,
        options: &ExecutorOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let system_prompt = options.full_system_prompt();
        let budget = self.context.calculate_budget(&system_prompt, &options.tools);
        let prepared = self.context.prepare_context(messages, &budget);
        if prepared.messages.is_empty() {
            return Err(EngineError::Context("no messages to send".into()));
        }

        let mut chat = ChatOptions::new(model)
            .with_system_prompt(system_prompt)
            .with_tools(options.tools.clone())
            .with_cancel(options.cancel.clone());
        if let Some(cb) = &options.on_chunk {
            chat = chat.with_on_chunk(cb.clone());
        }
        if let Some(max) = options.max_tokens {
            chat = chat.with_max_tokens(max);
        }

        let mut state = LoopState::new(options.on_tool_use.clone());
        let mut result = provider.send_message(&prepared.messages, &chat).await?;
        state.absorb(&result);

        let mut rounds: Vec<ToolRound> = Vec::new();
        let mut iterations = 0u32;
        while iterations < options.max_iterations
            && result.wants_tools()
            && !result.cancelled
            && !options.cancel.is_cancelled()
        {
            let Some(replay) = provider.tool_replay() else {
                debug!("provider has no tool replay, stopping after first response");
                break;
            };
            iterations += 1;

            let mut results = Vec::with_capacity(result.tool_calls.len());
            for call in &result.tool_calls {
                if options.cancel.is_cancelled() {
                    break;
                }
                let outcome = self.tools.execute_tool(call).await;
                state.record_result(call, &outcome);
                results.push(outcome);
            }
            if options.cancel.is_cancelled() {
                break;
            }
            state.notify();

            debug!(iteration = iterations, calls = result.tool_calls.len(), "replaying tool round");
            rounds.push(ToolRound::new(
                result.content.clone(),
                result.tool_calls.clone(),
                results,
            ));
            chat.emit(ROUND_SEPARATOR);
            state.content.push_str(ROUND_SEPARATOR);

            result = replay
                .send_message_with_tool_results(&prepared.messages, &rounds, &chat)
                .await?;
            state.absorb(&result);
        }

        let cancelled = result.cancelled || options.cancel.is_cancelled();
        info!(
            iterations,
            tool_uses = state.tool_use.len(),
            skills = state.skill_use.len(),
            cancelled,
            "tool loop finished"
        );

        Ok(ExecutionOutcome {
            content: state.content.trim_end().to_string(),
            tool_use: state.tool_use,
            skill_use: state.skill_use,
            iterations,
            stop_reason: result.stop_reason,
            usage: state.usage,
            context: prepared.report(),
            cancelled,
        })
    }
}

struct LoopState {
    content: String,
    tool_use: Vec<ToolUse>,
    skill_use: Vec<SkillUse>,
    usage: TokenUsage,
    on_tool_use: Option<ToolUseCallback>,
}

impl LoopState {
    fn new(on_tool_use: Option<ToolUseCallback>) -> Self {
        Self {
            content: String::new(),
            tool_use: Vec::new(),
            skill_use: Vec::new(),
            usage: TokenUsage::default(),
            on_tool_use,
        }
    }

    fn absorb(&mut self, result: &ChatResult) {
        self.content.push_str(&result.content);
        if let Some(usage) = &result.usage {
            self.usage.add(usage);
        }
        let before = self.tool_use.len();
        self.tool_use.extend(
            result
                .tool_use
                .iter()
                .filter(|t| t.name != USE_SKILL_TOOL)
                .cloned(),
        );
        if self.tool_use.len() != before {
            self.notify();
        }
    }

    fn record_skill(&mut self, call: &ToolCall) {
        let name = call
            .input
            .get("name")
            .or_else(|| call.input.get("skill"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if name.is_empty() || self.skill_use.iter().any(|s| s.name == name) {
            return;
        }
        self.skill_use.push(SkillUse {
            name: name.to_string(),
        });
    }

    /// Skills count as used once their load has actually run.
    fn record_result(&mut self, call: &ToolCall, result: &ToolResult) {
        if call.name == USE_SKILL_TOOL {
            if !result.is_error {
                self.record_skill(call);
            }
            return;
        }
        if let Some(entry) = self.tool_use.iter_mut().find(|t| t.id == call.id) {
            entry.result = Some(preview(&result.content, PREVIEW_MAX_CHARS));
            entry.is_error = result.is_error;
        }
    }

    fn notify(&self) {
        if let Some(cb) = &self.on_tool_use {
            cb(&self.tool_use);
        }
    }
}
