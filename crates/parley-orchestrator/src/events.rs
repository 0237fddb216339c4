//! Live events for comparison and council runs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use parley_core::{RunId, ToolUse};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Pending,
    Streaming,
    Complete,
    Error,
}

impl MemberStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// What the UI holds for one model while a run is live.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberState {
    pub model: String,
    pub status: MemberStatus,
    /// Everything streamed so far, including partial output of a cancelled run.
    pub content: String,
    pub tool_use: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MemberState {
    pub fn pending(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutEvent {
    Status {
        model: String,
        status: MemberStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Chunk {
        model: String,
        text: String,
    },
    ToolUse {
        model: String,
        tool_use: Vec<ToolUse>,
    },
    SynthesisChunk {
        text: String,
    },
    Finished {
        run_id: RunId,
    },
}

/// Broadcast fan-out of [`FanoutEvent`]s. `emit` never waits; lagging
/// receivers lose events rather than slowing the run.
#[derive(Debug)]
pub struct FanoutEvents {
    tx: broadcast::Sender<FanoutEvent>,
    emitted: AtomicU64,
}

impl FanoutEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emitted: AtomicU64::new(0),
        }
    }

    /// Returns how many receivers got the event.
    pub fn emit(&self, event: FanoutEvent) -> usize {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FanoutEvent> {
        self.tx.subscribe()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for FanoutEvents {
    fn default() -> Self {
        Self::new()
    }
}
