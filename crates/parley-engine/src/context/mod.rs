//! Token budgeting and history selection.
//!
//! The newest message is always sent. Older messages are kept newest-first
//! while they fit and dropped whole once one does not, so providers that need
//! strict role alternation never see a half message.

pub mod tokens;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use parley_core::{Message, ToolDefinition};
use parley_settings::ContextSettings;

use self::tokens::{
    estimate_fixed_tokens, estimate_message_tokens, estimate_text_tokens, estimate_tool_tokens,
    MESSAGE_OVERHEAD,
};
use crate::truncate::{floor_char_boundary, truncate_middle};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    pub total_tokens: usize,
    pub response_reserve: usize,
    pub tool_result_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from(&ContextSettings::default())
    }
}

impl From<&ContextSettings> for ContextConfig {
    fn from(s: &ContextSettings) -> Self {
        Self {
            total_tokens: s.total_tokens,
            response_reserve: s.response_reserve,
            tool_result_max_chars: s.tool_result_max_chars,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub total: usize,
    pub system_prompt: usize,
    pub tools: usize,
    pub response: usize,
    /// What remains for history after the fixed costs.
    pub messages: usize,
}

/// Observability summary of one selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextReport {
    pub truncated: bool,
    pub truncated_count: usize,
    pub content_truncated: bool,
    pub estimated_tokens: usize,
    pub uncounted_overhead: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TruncatedContext {
    /// Oldest first.
    pub messages: Vec<Message>,
    pub truncated: bool,
    /// Older messages left out.
    pub truncated_count: usize,
    /// The newest message had to be cut to fit.
    pub content_truncated: bool,
    /// Never above the messages budget.
    pub estimated_tokens: usize,
    /// Framing cost of the newest message that a budget below
    /// [`MESSAGE_OVERHEAD`] could not cover. The message is still sent, with
    /// empty content; this part is left out of `estimated_tokens`.
    pub uncounted_overhead: usize,
}

impl TruncatedContext {
    pub fn report(&self) -> ContextReport {
        ContextReport {
            truncated: self.truncated,
            truncated_count: self.truncated_count,
            content_truncated: self.content_truncated,
            estimated_tokens: self.estimated_tokens,
            uncounted_overhead: self.uncounted_overhead,
        }
    }
}

/// Stateless apart from its config; safe to share.
#[derive(Clone, Debug, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn calculate_budget(&self, system_prompt: &str, tools: &[ToolDefinition]) -> ContextBudget {
        let system_tokens = estimate_text_tokens(system_prompt);
        let tool_tokens = estimate_tool_tokens(tools);
        let messages = self
            .config
            .total_tokens
            .saturating_sub(system_tokens)
            .saturating_sub(tool_tokens)
            .saturating_sub(self.config.response_reserve);
        ContextBudget {
            total: self.config.total_tokens,
            system_prompt: system_tokens,
            tools: tool_tokens,
            response: self.config.response_reserve,
            messages,
        }
    }

    pub fn prepare_context(&self, messages: &[Message], budget: &ContextBudget) -> TruncatedContext {
        let mut kept: Vec<Message> = messages
            .iter()
            .filter(|m| !m.is_log())
            .cloned()
            .map(|m| self.trim_tool_results(m))
            .collect();

        let Some(mut newest) = kept.pop() else {
            return TruncatedContext::default();
        };

        let mut content_truncated = false;
        if estimate_message_tokens(&newest) > budget.messages {
            fit_to_budget(&mut newest, budget.messages);
            content_truncated = true;
        }

        let newest_cost = estimate_message_tokens(&newest);
        let uncounted_overhead = newest_cost.saturating_sub(budget.messages);
        let mut used = newest_cost - uncounted_overhead;
        let older = kept.len();
        let mut selected = Vec::new();
        for msg in kept.into_iter().rev() {
            let cost = estimate_message_tokens(&msg);
            if used + cost > budget.messages {
                break;
            }
            used += cost;
            selected.push(msg);
        }

        let truncated_count = older - selected.len();
        selected.reverse();
        selected.push(newest);

        if truncated_count > 0 || content_truncated {
            debug!(
                budget = budget.messages,
                estimated_tokens = used,
                truncated_count,
                content_truncated,
                "history truncated to fit budget"
            );
        }
        if uncounted_overhead > 0 {
            warn!(
                budget = budget.messages,
                uncounted_overhead, "messages budget below per-message overhead"
            );
        }

        TruncatedContext {
            messages: selected,
            truncated: truncated_count > 0 || content_truncated,
            truncated_count,
            content_truncated,
            estimated_tokens: used,
            uncounted_overhead,
        }
    }

    fn trim_tool_results(&self, mut msg: Message) -> Message {
        for tool_use in &mut msg.tool_use {
            if let Some(result) = tool_use.result.as_mut() {
                *result = truncate_middle(result, self.config.tool_result_max_chars);
            }
        }
        msg
    }
}

/// Cut `msg` so its estimate fits `budget`. Attachments and tool-use entries
/// go first if they alone exceed it; the text keeps whatever the remaining
/// tokens allow. Below the per-message overhead the content is emptied.
fn fit_to_budget(msg: &mut Message, budget: usize) {
    if estimate_fixed_tokens(msg) > budget {
        msg.attachments.clear();
        msg.tool_use.clear();
    }
    let fixed = estimate_fixed_tokens(msg);
    if budget <= MESSAGE_OVERHEAD || fixed >= budget {
        msg.content.clear();
        return;
    }
    let max_bytes = (budget - fixed) * 4;
    let cut = floor_char_boundary(&msg.content, max_bytes);
    msg.content.truncate(cut);
}
