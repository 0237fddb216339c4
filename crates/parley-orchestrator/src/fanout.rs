//! Comparison runs: one message, several models, concurrently.
//!
//! Each member runs on its own task under a child of the run's cancellation
//! token, so cancelling one model leaves the others alone and `cancel_all`
//! reaches every member (and a council chairman) at once. A member that
//! fails, panics or is cancelled settles into its own response; the run as a
//! whole always completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::{Message, RunId, SkillUse, TokenUsage, ToolUse};
use parley_engine::{ExecutionOutcome, ExecutorOptions, ToolExecutor};
use parley_llm::ProviderRegistry;

use crate::events::{FanoutEvent, FanoutEvents, MemberState, MemberStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FanoutError {
    #[error("a comparison run is already streaming")]
    AlreadyStreaming,
    #[error("no models given")]
    NoModels,
}

/// Final per-model result of a comparison.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComparisonResponse {
    pub model: String,
    pub status: MemberStatus,
    /// Final content. Empty for cancelled members; their partial output was
    /// already delivered as chunks.
    pub content: String,
    pub tool_use: Vec<ToolUse>,
    pub skill_use: Vec<SkillUse>,
    pub usage: TokenUsage,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl ComparisonResponse {
    pub(crate) fn failed(model: &str, error: String) -> Self {
        Self {
            model: model.to_string(),
            status: MemberStatus::Error,
            error: Some(error),
            ..Self::default()
        }
    }

    pub(crate) fn from_outcome(model: &str, outcome: ExecutionOutcome) -> Self {
        let content = if outcome.cancelled {
            String::new()
        } else {
            outcome.content
        };
        Self {
            model: model.to_string(),
            status: MemberStatus::Complete,
            content,
            tool_use: outcome.tool_use,
            skill_use: outcome.skill_use,
            usage: outcome.usage,
            error: None,
            cancelled: outcome.cancelled,
        }
    }
}

/// Live per-model state plus the event stream it feeds.
pub(crate) struct LiveBoard {
    members: RwLock<Vec<MemberState>>,
    pub(crate) events: FanoutEvents,
}

impl LiveBoard {
    fn new() -> Self {
        Self {
            members: RwLock::new(Vec::new()),
            events: FanoutEvents::new(),
        }
    }

    fn reset(&self, models: &[String]) {
        *self.members.write() = models.iter().map(MemberState::pending).collect();
        for model in models {
            self.set_status(model, MemberStatus::Pending, None);
        }
    }

    fn update(&self, model: &str, f: impl FnOnce(&mut MemberState)) {
        if let Some(m) = self.members.write().iter_mut().find(|m| m.model == model) {
            f(m);
        }
    }

    fn set_status(&self, model: &str, status: MemberStatus, error: Option<String>) {
        self.update(model, |m| {
            m.status = status;
            m.error.clone_from(&error);
        });
        self.events.emit(FanoutEvent::Status {
            model: model.to_string(),
            status,
            error,
        });
    }

    fn append(&self, model: &str, text: &str) {
        self.update(model, |m| m.content.push_str(text));
        self.events.emit(FanoutEvent::Chunk {
            model: model.to_string(),
            text: text.to_string(),
        });
    }

    fn set_tool_use(&self, model: &str, tool_use: &[ToolUse]) {
        self.update(model, |m| m.tool_use = tool_use.to_vec());
        self.events.emit(FanoutEvent::ToolUse {
            model: model.to_string(),
            tool_use: tool_use.to_vec(),
        });
    }

    fn snapshot(&self) -> Vec<MemberState> {
        self.members.read().clone()
    }
}

/// Dispatches the same conversation to several models at once.
pub struct FanoutOrchestrator {
    pub(crate) providers: ProviderRegistry,
    pub(crate) executor: Arc<ToolExecutor>,
    pub(crate) template: ExecutorOptions,
    pub(crate) board: Arc<LiveBoard>,
    run: Mutex<Option<CancellationToken>>,
    controllers: DashMap<String, CancellationToken>,
    /// A run is in progress, cancelled or not.
    busy: AtomicBool,
    streaming: AtomicBool,
}

impl FanoutOrchestrator {
    pub fn new(providers: ProviderRegistry, executor: Arc<ToolExecutor>) -> Self {
        Self {
            providers,
            executor,
            template: ExecutorOptions::default(),
            board: Arc::new(LiveBoard::new()),
            run: Mutex::new(None),
            controllers: DashMap::new(),
            busy: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
        }
    }

    /// Base options for every member: tools, system prompt, iteration cap.
    /// Callbacks and cancellation are set per member.
    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.template = options;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FanoutEvent> {
        self.board.events.subscribe()
    }

    pub fn snapshot(&self) -> Vec<MemberState> {
        self.board.snapshot()
    }

    /// True from the start of a run until it settles or `cancel_all`.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Cancel one member of the current run.
    pub fn cancel(&self, model: &str) -> bool {
        match self.controllers.get(model) {
            Some(token) => {
                debug!(model, "cancelling comparison member");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every member and any synthesis of the current run.
    pub fn cancel_all(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            info!("cancelling comparison run");
            run.cancel();
        }
        self.streaming.store(false, Ordering::SeqCst);
    }

    /// Run `messages` against every model in `models` (qualified
    /// `provider/model` strings; duplicates ignored) and wait for all of them.
    pub async fn start_streaming(
        &self,
        models: &[String],
        messages: &[Message],
    ) -> Result<Vec<ComparisonResponse>, FanoutError> {
        let run = self.begin(models)?;
        Ok(self.fan_out(&run, messages).await)
    }

    pub(crate) fn begin(&self, models: &[String]) -> Result<ActiveRun<'_>, FanoutError> {
        let mut models = models.to_vec();
        let mut seen = std::collections::HashSet::new();
        models.retain(|m| seen.insert(m.clone()));
        if models.is_empty() {
            return Err(FanoutError::NoModels);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FanoutError::AlreadyStreaming);
        }
        self.streaming.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.run.lock() = Some(token.clone());
        self.controllers.clear();
        for model in &models {
            self.controllers.insert(model.clone(), token.child_token());
        }
        self.board.reset(&models);
        let run = ActiveRun {
            orchestrator: self,
            id: RunId::new(),
            models,
            token,
        };
        info!(run_id = %run.id, members = run.models.len(), "comparison run started");
        Ok(run)
    }

    pub(crate) async fn fan_out(&self, run: &ActiveRun<'_>, messages: &[Message]) -> Vec<ComparisonResponse> {
        let messages: Arc<[Message]> = messages.into();
        let handles: Vec<_> = run
            .models
            .iter()
            .map(|model| {
                let cancel = self
                    .controllers
                    .get(model)
                    .map(|t| t.value().clone())
                    .unwrap_or_else(|| run.token.child_token());
                let member = MemberRun {
                    model: model.clone(),
                    providers: self.providers.clone(),
                    executor: self.executor.clone(),
                    options: self.template.clone(),
                    board: self.board.clone(),
                    messages: messages.clone(),
                    cancel,
                };
                tokio::spawn(member.run())
            })
            .collect();

        let settled = join_all(handles).await;
        run.models
            .iter()
            .zip(settled)
            .map(|(model, joined)| match joined {
                Ok(response) => response,
                Err(e) => {
                    warn!(model = %model, error = %e, "comparison member task failed");
                    let error = format!("member task failed: {e}");
                    self.board.set_status(model, MemberStatus::Error, Some(error.clone()));
                    ComparisonResponse::failed(model, error)
                }
            })
            .collect()
    }
}

/// The run in progress. Dropping it ends the run, also when the caller
/// abandons the future; member tasks still running are cancelled.
pub(crate) struct ActiveRun<'a> {
    orchestrator: &'a FanoutOrchestrator,
    pub(crate) id: RunId,
    pub(crate) models: Vec<String>,
    pub(crate) token: CancellationToken,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let orch = self.orchestrator;
        info!(run_id = %self.id, cancelled = self.token.is_cancelled(), "comparison run finished");
        self.token.cancel();
        orch.controllers.clear();
        *orch.run.lock() = None;
        orch.streaming.store(false, Ordering::SeqCst);
        orch.busy.store(false, Ordering::SeqCst);
        orch.board.events.emit(FanoutEvent::Finished {
            run_id: self.id.clone(),
        });
    }
}

struct MemberRun {
    model: String,
    providers: ProviderRegistry,
    executor: Arc<ToolExecutor>,
    options: ExecutorOptions,
    board: Arc<LiveBoard>,
    messages: Arc<[Message]>,
    cancel: CancellationToken,
}

impl MemberRun {
    async fn run(self) -> ComparisonResponse {
        let model = self.model.as_str();
        let (provider, bare_model) = match self.providers.resolve(model) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.board.set_status(model, MemberStatus::Error, Some(e.to_string()));
                return ComparisonResponse::failed(model, e.to_string());
            }
        };

        let board = self.board.clone();
        let chunk_model = self.model.clone();
        let tools_board = self.board.clone();
        let tools_model = self.model.clone();
        let mut options = self.options;
        options.cancel = self.cancel.clone();
        options.on_chunk = Some(Arc::new(move |text: &str| board.append(&chunk_model, text)));
        options.on_tool_use = Some(Arc::new(move |uses: &[ToolUse]| {
            tools_board.set_tool_use(&tools_model, uses)
        }));

        self.board.set_status(model, MemberStatus::Streaming, None);
        match self
            .executor
            .run(provider.as_ref(), &self.messages, &bare_model, &options)
            .await
        {
            Ok(outcome) => {
                if outcome.cancelled {
                    debug!(model, "comparison member cancelled");
                }
                self.board.set_status(model, MemberStatus::Complete, None);
                ComparisonResponse::from_outcome(model, outcome)
            }
            Err(e) => {
                warn!(model, error = %e, "comparison member failed");
                self.board.set_status(model, MemberStatus::Error, Some(e.to_string()));
                ComparisonResponse::failed(model, e.to_string())
            }
        }
    }
}
