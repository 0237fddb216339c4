//! Interval-driven trigger checks.
//!
//! A pass loads every trigger, skips disabled, not-yet-due and in-flight ones,
//! and spawns a check task for the rest. Checks of different triggers run
//! concurrently; the active set guarantees at most one check per trigger id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::{Message, Trigger, TriggerId, TriggerResult};
use parley_settings::SchedulerSettings;

use crate::store::{StoreError, TriggerStore};
use crate::trigger_executor::{Evaluation, TriggerEvaluator};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick: Duration,
    /// Non-log messages from the trigger's log handed to each check.
    pub context_messages: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(s: &SchedulerSettings) -> Self {
        Self {
            tick: Duration::from_secs(s.tick_secs),
            context_messages: s.context_messages,
        }
    }
}

/// Lifecycle callbacks for checks. All methods default to no-ops.
pub trait TriggerObserver: Send + Sync {
    fn on_checking(&self, _trigger: &Trigger) {}
    fn on_triggered(&self, _trigger: &Trigger, _response: &str) {}
    fn on_skipped(&self, _trigger: &Trigger, _reason: &str) {}
    fn on_error(&self, _trigger: &Trigger, _error: &str) {}
    /// Runs after every check, whatever its outcome.
    fn on_check_complete(&self, _id: &TriggerId) {}
}

struct NoopObserver;

impl TriggerObserver for NoopObserver {}

/// What one pass did.
#[derive(Debug, Default)]
pub struct PassReport {
    pub started: Vec<(TriggerId, JoinHandle<TriggerResult>)>,
    /// Due, but a check for the id was still running.
    pub in_flight: Vec<TriggerId>,
    pub not_due: Vec<TriggerId>,
}

impl PassReport {
    pub fn started_ids(&self) -> Vec<TriggerId> {
        self.started.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Wait for every started check. Checks that panicked are left out.
    pub async fn join(self) -> Vec<(TriggerId, TriggerResult)> {
        let mut out = Vec::with_capacity(self.started.len());
        for (id, handle) in self.started {
            match handle.await {
                Ok(result) => out.push((id, result)),
                Err(e) => warn!(trigger_id = %id, error = %e, "trigger check task failed"),
            }
        }
        out
    }
}

struct Shared {
    store: Arc<dyn TriggerStore>,
    evaluator: Arc<dyn TriggerEvaluator>,
    observer: Arc<dyn TriggerObserver>,
    config: SchedulerConfig,
    active: Arc<DashSet<TriggerId>>,
}

/// Removes the id from the active set when the check ends, including by panic.
struct ActiveCheck {
    id: TriggerId,
    active: Arc<DashSet<TriggerId>>,
    observer: Arc<dyn TriggerObserver>,
}

impl ActiveCheck {
    fn acquire(shared: &Shared, id: &TriggerId) -> Option<Self> {
        shared.active.insert(id.clone()).then(|| Self {
            id: id.clone(),
            active: shared.active.clone(),
            observer: shared.observer.clone(),
        })
    }
}

impl Drop for ActiveCheck {
    fn drop(&mut self) {
        let _ = self.active.remove(&self.id);
        self.observer.on_check_complete(&self.id);
    }
}

pub struct TriggerScheduler {
    shared: Arc<Shared>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TriggerScheduler {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        evaluator: Arc<dyn TriggerEvaluator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                evaluator,
                observer: Arc::new(NoopObserver),
                config,
                active: Arc::new(DashSet::new()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Must be called before [`start`](Self::start).
    pub fn with_observer(mut self, observer: Arc<dyn TriggerObserver>) -> Self {
        self.shared = Arc::new(Shared {
            store: self.shared.store.clone(),
            evaluator: self.shared.evaluator.clone(),
            observer,
            config: self.shared.config.clone(),
            active: self.shared.active.clone(),
        });
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Ids with a check currently in flight.
    pub fn active_checks(&self) -> Vec<TriggerId> {
        self.shared.active.iter().map(|id| id.key().clone()).collect()
    }

    /// Start ticking. The first pass runs immediately. Returns false if
    /// already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = run_pass(&shared).await {
                            warn!(error = %e, "trigger pass failed to load triggers");
                        }
                    }
                }
            }
            debug!("trigger scheduler loop exited");
        });
        *running = Some((cancel, handle));
        info!(tick_secs = self.shared.config.tick.as_secs(), "trigger scheduler started");
        true
    }

    /// Stop ticking. Checks already in flight run to completion on their own.
    pub async fn stop(&self) {
        let Some((cancel, handle)) = self.running.lock().take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "trigger scheduler loop ended abnormally");
        }
        info!("trigger scheduler stopped");
    }

    /// Run one pass now, independent of the timer.
    pub async fn check_now(&self) -> Result<PassReport, StoreError> {
        run_pass(&self.shared).await
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.running.get_mut().take() {
            cancel.cancel();
        }
    }
}

async fn run_pass(shared: &Arc<Shared>) -> Result<PassReport, StoreError> {
    let now = Utc::now();
    let triggers = shared.store.load().await?;
    let mut report = PassReport::default();

    for trigger in triggers.into_iter().filter(|t| t.enabled) {
        if !trigger.is_due(now) {
            report.not_due.push(trigger.id);
            continue;
        }
        let Some(guard) = ActiveCheck::acquire(shared, &trigger.id) else {
            debug!(trigger_id = %trigger.id, "check already in flight");
            report.in_flight.push(trigger.id);
            continue;
        };
        let id = trigger.id.clone();
        let task_shared = shared.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            check(&task_shared, trigger).await
        });
        report.started.push((id, handle));
    }

    if !report.started.is_empty() {
        debug!(
            started = report.started.len(),
            in_flight = report.in_flight.len(),
            not_due = report.not_due.len(),
            "trigger pass"
        );
    }
    Ok(report)
}

async fn check(shared: &Shared, trigger: Trigger) -> TriggerResult {
    shared.observer.on_checking(&trigger);
    let context = recent_context(&trigger.messages, shared.config.context_messages);
    let Evaluation {
        prompt_sent,
        result,
    } = shared.evaluator.evaluate(&trigger, &context).await;

    let updated = record(shared, trigger, &prompt_sent, &result).await;
    match &result {
        TriggerResult::Triggered { response, .. } => {
            info!(trigger_id = %updated.id, name = %updated.name, "trigger fired");
            shared.observer.on_triggered(&updated, response);
        }
        TriggerResult::Skipped { reason } => {
            debug!(trigger_id = %updated.id, reason = %reason, "trigger skipped");
            shared.observer.on_skipped(&updated, reason);
        }
        TriggerResult::Error { error } => {
            warn!(trigger_id = %updated.id, error = %error, "trigger check errored");
            shared.observer.on_error(&updated, error);
        }
    }
    result
}

/// Apply the check to the stored document, re-read so edits made while the
/// check ran are kept.
async fn record(shared: &Shared, checked: Trigger, prompt_sent: &str, result: &TriggerResult) -> Trigger {
    let mut trigger = match shared.store.get(&checked.id).await {
        Ok(Some(current)) => current,
        Ok(None) => {
            debug!(trigger_id = %checked.id, "trigger deleted during check, result not saved");
            return checked;
        }
        Err(e) => {
            warn!(trigger_id = %checked.id, error = %e, "reload failed, saving checked copy");
            checked
        }
    };

    let checked_at = Utc::now();
    trigger.record_check(checked_at, result);
    if let TriggerResult::Triggered {
        response,
        reasoning,
    } = result
    {
        trigger.record_firing(
            checked_at,
            prompt_sent,
            reasoning.as_deref().unwrap_or_default(),
            response,
        );
    }
    if let Err(e) = shared.store.save(&trigger).await {
        warn!(trigger_id = %trigger.id, error = %e, "failed to save trigger check");
    }
    trigger
}

/// The last `n` non-log messages, oldest first.
fn recent_context(messages: &[Message], n: usize) -> Vec<Message> {
    let mut recent: Vec<Message> = messages
        .iter()
        .rev()
        .filter(|m| !m.is_log())
        .take(n)
        .cloned()
        .collect();
    recent.reverse();
    recent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parley_core::Role;

    use crate::store::InMemoryTriggerStore;

    struct Scripted {
        result: TriggerResult,
        delay: Duration,
        calls: AtomicUsize,
        context_len: AtomicUsize,
    }

    impl Scripted {
        fn new(result: TriggerResult) -> Arc<Self> {
            Self::slow(result, Duration::ZERO)
        }

        fn slow(result: TriggerResult, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result,
                delay,
                calls: AtomicUsize::new(0),
                context_len: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TriggerEvaluator for Scripted {
        async fn evaluate(&self, trigger: &Trigger, context: &[Message]) -> Evaluation {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.context_len.store(context.len(), Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Evaluation {
                prompt_sent: format!("prompt for {}", trigger.name),
                result: self.result.clone(),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TriggerObserver for Recorder {
        fn on_checking(&self, t: &Trigger) {
            self.events.lock().push(format!("checking:{}", t.name));
        }
        fn on_triggered(&self, t: &Trigger, response: &str) {
            self.events.lock().push(format!("triggered:{}:{response}", t.name));
        }
        fn on_skipped(&self, t: &Trigger, reason: &str) {
            self.events.lock().push(format!("skipped:{}:{reason}", t.name));
        }
        fn on_error(&self, t: &Trigger, error: &str) {
            self.events.lock().push(format!("error:{}:{error}", t.name));
        }
        fn on_check_complete(&self, _id: &TriggerId) {
            self.events.lock().push("complete".into());
        }
    }

    fn fired() -> TriggerResult {
        TriggerResult::Triggered {
            response: "Price is $42".into(),
            reasoning: Some("dropped".into()),
        }
    }

    fn scheduler(store: Arc<InMemoryTriggerStore>, eval: Arc<Scripted>) -> TriggerScheduler {
        TriggerScheduler::new(store, eval, SchedulerConfig::default())
    }

    #[tokio::test]
    async fn pass_checks_only_due_enabled_triggers() {
        let due = Trigger::new("due", "mock/m", "check", 30);
        let mut fresh = Trigger::new("fresh", "mock/m", "check", 30);
        fresh.last_checked = Some(Utc::now());
        let mut disabled = Trigger::new("off", "mock/m", "check", 30);
        disabled.enabled = false;

        let store = Arc::new(InMemoryTriggerStore::with_triggers([
            due.clone(),
            fresh.clone(),
            disabled,
        ]));
        let eval = Scripted::new(fired());
        let sched = scheduler(store.clone(), eval.clone());

        let report = sched.check_now().await.unwrap();
        assert_eq!(report.started_ids(), vec![due.id.clone()]);
        assert_eq!(report.not_due, vec![fresh.id.clone()]);
        assert!(report.in_flight.is_empty());

        let results = report.join().await;
        assert_eq!(results, vec![(due.id.clone(), fired())]);
        assert_eq!(eval.calls(), 1);

        let saved = store.get(&due.id).await.unwrap().unwrap();
        assert!(saved.last_checked.is_some());
        assert_eq!(saved.last_triggered, saved.last_checked);
        assert_eq!(saved.history.len(), 1);
        assert_eq!(saved.messages.len(), 4);
        assert_eq!(saved.messages[0].content, "prompt for due");
        assert_eq!(saved.messages[1].content, "dropped");
        assert_eq!(saved.baseline().unwrap().content, "Price is $42");
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_trigger_is_not_checked_twice() {
        let t = Trigger::new("slow", "mock/m", "check", 30);
        let store = Arc::new(InMemoryTriggerStore::with_triggers([t.clone()]));
        let eval = Scripted::slow(fired(), Duration::from_secs(10));
        let sched = scheduler(store, eval.clone());

        let first = sched.check_now().await.unwrap();
        let second = sched.check_now().await.unwrap();
        assert_eq!(first.started_ids(), vec![t.id.clone()]);
        assert!(second.started.is_empty());
        assert_eq!(second.in_flight, vec![t.id.clone()]);
        assert_eq!(sched.active_checks(), vec![t.id.clone()]);

        first.join().await;
        assert_eq!(eval.calls(), 1);
        assert!(sched.active_checks().is_empty());
    }

    #[tokio::test]
    async fn observer_sees_each_outcome_and_completion() {
        let t = Trigger::new("price", "mock/m", "check", 30);
        for (result, expected) in [
            (fired(), "triggered:price:Price is $42"),
            (
                TriggerResult::Skipped { reason: "same".into() },
                "skipped:price:same",
            ),
            (TriggerResult::Error { error: "boom".into() }, "error:price:boom"),
        ] {
            let store = Arc::new(InMemoryTriggerStore::with_triggers([t.clone()]));
            let recorder = Arc::new(Recorder::default());
            let sched = scheduler(store.clone(), Scripted::new(result)).with_observer(recorder.clone());
            sched.check_now().await.unwrap().join().await;

            let events = recorder.events.lock().clone();
            assert_eq!(events, vec!["checking:price".to_string(), expected.into(), "complete".into()]);
        }
    }

    #[tokio::test]
    async fn skipped_check_does_not_fire() {
        let t = Trigger::new("price", "mock/m", "check", 30);
        let store = Arc::new(InMemoryTriggerStore::with_triggers([t.clone()]));
        let sched = scheduler(store.clone(), Scripted::new(TriggerResult::Skipped { reason: "same".into() }));
        sched.check_now().await.unwrap().join().await;

        let saved = store.get(&t.id).await.unwrap().unwrap();
        assert!(saved.last_checked.is_some());
        assert!(saved.last_triggered.is_none());
        assert!(saved.messages.is_empty());
    }

    #[tokio::test]
    async fn context_is_recent_non_log_history() {
        let mut t = Trigger::new("price", "mock/m", "check", 30);
        for i in 0..6 {
            t.record_firing(Utc::now(), "prompt", "why", &format!("response {i}"));
        }
        let context = recent_context(&t.messages, 8);
        assert_eq!(context.len(), 8);
        assert!(context.iter().all(|m| m.role != Role::Log));
        assert_eq!(context.last().unwrap().content, "response 5");

        let store = Arc::new(InMemoryTriggerStore::with_triggers([t]));
        let eval = Scripted::new(fired());
        scheduler(store, eval.clone()).check_now().await.unwrap().join().await;
        assert_eq!(eval.context_len.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_immediately_then_on_each_tick() {
        // A zero interval keeps the trigger due on every pass.
        let t = Trigger::new("every", "mock/m", "check", 0);
        let store = Arc::new(InMemoryTriggerStore::with_triggers([t]));
        let eval = Scripted::new(TriggerResult::Skipped { reason: "same".into() });
        let sched = scheduler(store, eval.clone());

        assert!(sched.start());
        assert!(!sched.start());
        assert!(sched.is_running());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(eval.calls(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(eval.calls(), 2);

        sched.stop().await;
        assert!(!sched.is_running());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(eval.calls(), 2);
    }
}
