//! Engine, scheduler and council tuning.

use serde::{Deserialize, Serialize};

/// Token budgeting for outgoing requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    pub total_tokens: usize,
    /// Tokens held back for the model's reply.
    pub response_reserve: usize,
    /// Per-entry ceiling for tool output kept in history.
    pub tool_result_max_chars: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            total_tokens: 100_000,
            response_reserve: 4_000,
            tool_result_max_chars: 2_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    pub max_iterations: u32,
    /// Iteration cap for background trigger evaluation.
    pub trigger_max_iterations: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            trigger_max_iterations: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    pub tick_secs: u64,
    /// Non-log history messages handed to each trigger check.
    pub context_messages: usize,
    pub baseline_max_tokens: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            context_messages: 8,
            baseline_max_tokens: 2_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Ceiling for a vendor `retry-after` hint.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CouncilSettings {
    /// Qualified model string of the synthesizer.
    pub chairman_model: String,
    pub members: Vec<String>,
}

impl Default for CouncilSettings {
    fn default() -> Self {
        Self {
            chairman_model: "anthropic/claude-sonnet-4-5".into(),
            members: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
