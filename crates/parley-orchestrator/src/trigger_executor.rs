//! Evaluates one trigger against its last firing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use tracing::{debug, warn};

use parley_core::{Message, SkillRegistry, ToolDefinition, Trigger, TriggerResult};
use parley_engine::truncate::truncate_middle;
use parley_engine::{EngineError, ExecutorOptions, ToolExecutor};
use parley_llm::ProviderRegistry;
use parley_settings::{ExecutorSettings, SchedulerSettings};

use crate::verdict::interpret;

/// Result of one evaluation plus the prompt that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub prompt_sent: String,
    pub result: TriggerResult,
}

/// Anything that can decide whether a trigger fires.
#[async_trait]
pub trait TriggerEvaluator: Send + Sync {
    /// `context` is recent conversation for the trigger, oldest first.
    async fn evaluate(&self, trigger: &Trigger, context: &[Message]) -> Evaluation;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerExecutorConfig {
    pub max_iterations: u32,
    /// Cap on the baseline block, in estimated tokens.
    pub baseline_max_tokens: usize,
}

impl Default for TriggerExecutorConfig {
    fn default() -> Self {
        Self::from_settings(&ExecutorSettings::default(), &SchedulerSettings::default())
    }
}

impl TriggerExecutorConfig {
    pub fn from_settings(executor: &ExecutorSettings, scheduler: &SchedulerSettings) -> Self {
        Self {
            max_iterations: executor.trigger_max_iterations,
            baseline_max_tokens: scheduler.baseline_max_tokens,
        }
    }
}

/// Runs the tool loop for a trigger and reads the verdict off the reply.
pub struct TriggerExecutor {
    providers: ProviderRegistry,
    executor: Arc<ToolExecutor>,
    tools: Vec<ToolDefinition>,
    skills: Option<Arc<dyn SkillRegistry>>,
    config: TriggerExecutorConfig,
}

impl TriggerExecutor {
    pub fn new(providers: ProviderRegistry, executor: Arc<ToolExecutor>) -> Self {
        Self {
            providers,
            executor,
            tools: Vec::new(),
            skills: None,
            config: TriggerExecutorConfig::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_config(mut self, config: TriggerExecutorConfig) -> Self {
        self.config = config;
        self
    }

    async fn run(&self, trigger: &Trigger, messages: &[Message]) -> Result<String, EngineError> {
        let (provider, model) = self.providers.resolve(&trigger.model)?;
        let mut options = ExecutorOptions::default()
            .with_max_iterations(self.config.max_iterations)
            .with_tools(self.tools.clone())
            .with_system_prompt(system_prompt(&trigger.name, Local::now().fixed_offset()));
        if let Some(skills) = &self.skills {
            options = options.with_skills(skills.clone());
        }
        let outcome = self
            .executor
            .run(provider.as_ref(), messages, &model, &options)
            .await?;
        debug!(
            trigger_id = %trigger.id,
            iterations = outcome.iterations,
            tool_uses = outcome.tool_use.len(),
            "trigger evaluation finished"
        );
        Ok(outcome.content)
    }
}

#[async_trait]
impl TriggerEvaluator for TriggerExecutor {
    async fn evaluate(&self, trigger: &Trigger, context: &[Message]) -> Evaluation {
        let prompt = build_prompt(trigger, self.config.baseline_max_tokens);
        let mut messages = context.to_vec();
        messages.push(Message::user(prompt.clone()));

        let result = match self.run(trigger, &messages).await {
            Ok(content) => interpret(&content),
            Err(e) => {
                warn!(trigger_id = %trigger.id, error = %e, "trigger evaluation failed");
                TriggerResult::Error {
                    error: e.to_string(),
                }
            }
        };
        Evaluation {
            prompt_sent: prompt,
            result,
        }
    }
}

/// The user turn for a check: baseline block (or first-run note), then the
/// trigger's own prompt.
pub fn build_prompt(trigger: &Trigger, baseline_max_tokens: usize) -> String {
    match (trigger.baseline(), trigger.last_triggered) {
        (Some(baseline), Some(fired_at)) => {
            let text = truncate_middle(&baseline.content, baseline_max_tokens.saturating_mul(4));
            format!(
                "BASELINE (your response when this trigger last fired, {}):\n\
                 <baseline>\n{text}\n</baseline>\n\n\
                 Compare what you find now against the baseline. Trigger only if something \
                 meaningful changed since then; restating the baseline is not a change.\n\n{}",
                fired_at.format("%Y-%m-%d %H:%M UTC"),
                trigger.trigger_prompt
            )
        }
        _ => format!(
            "This is the first check for this trigger, so there is no baseline yet. If it \
             fires, your response becomes the baseline later checks are compared against.\n\n{}",
            trigger.trigger_prompt
        ),
    }
}

pub fn system_prompt(name: &str, now: DateTime<FixedOffset>) -> String {
    format!(
        "You are running the background check \"{name}\" for the user.\n\
         Current date: {date}. Current time: {time} (UTC{offset}).\n\n\
         Use the available tools to gather what you need, then decide whether the user should \
         be notified. Everything you write before the verdict is what the user sees if the \
         check fires.\n\n\
         End your response with a fenced JSON verdict block:\n\
         ```json\n{{\"triggered\": true, \"reason\": \"one short sentence\"}}\n```\n\
         Set \"triggered\" to false when nothing worth a notification happened.",
        date = now.format("%A, %B %-d, %Y"),
        time = now.format("%H:%M"),
        offset = now.format("%:z"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parley_core::ProviderError;
    use parley_engine::{ContextManager, ToolSet};
    use parley_llm::mock::{MockProvider, MockResponse};

    fn setup(responses: Vec<MockResponse>) -> (Arc<MockProvider>, TriggerExecutor) {
        let mock = Arc::new(MockProvider::new("mock").with_responses(responses));
        let mut providers = ProviderRegistry::new();
        providers.register(mock.clone());
        let executor = Arc::new(ToolExecutor::new(ContextManager::default(), Arc::new(ToolSet::new())));
        (mock, TriggerExecutor::new(providers, executor))
    }

    fn price_trigger() -> Trigger {
        Trigger::new("price", "mock/m", "Check the price of the widget.", 30)
    }

    #[tokio::test]
    async fn first_run_has_no_baseline() {
        let (mock, exec) = setup(vec![MockResponse::text(
            "Price is $42\n```json\n{\"triggered\": true}\n```",
        )]);
        let eval = exec.evaluate(&price_trigger(), &[]).await;
        assert_eq!(
            eval.result,
            TriggerResult::Triggered {
                response: "Price is $42".into(),
                reasoning: None,
            }
        );

        let call = &mock.calls()[0];
        let sent = &call.messages.last().unwrap().content;
        assert!(!sent.contains("BASELINE"));
        assert!(sent.contains("first check"));
        assert!(sent.ends_with("Check the price of the widget."));
        assert_eq!(sent, &eval.prompt_sent);
        assert!(call.system_prompt.contains("\"triggered\""));
        assert_eq!(call.model, "m");
    }

    #[tokio::test]
    async fn baseline_is_the_last_firing_response() {
        let (mock, exec) = setup(vec![MockResponse::text(
            "Still $42.\n```json\n{\"triggered\": false, \"reason\": \"unchanged\"}\n```",
        )]);
        let mut trigger = price_trigger();
        let fired = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
        trigger.record_firing(fired, "prompt", "first", "Price is $42");

        let eval = exec.evaluate(&trigger, &[Message::user("earlier")]).await;
        assert_eq!(
            eval.result,
            TriggerResult::Skipped {
                reason: "unchanged".into()
            }
        );

        let call = &mock.calls()[0];
        assert_eq!(call.messages.len(), 2);
        let sent = &call.messages[1].content;
        assert!(sent.starts_with("BASELINE"));
        assert!(sent.contains("Price is $42"));
        assert!(sent.contains("2026-03-05 09:00 UTC"));
    }

    #[test]
    fn baseline_is_capped() {
        let mut trigger = price_trigger();
        trigger.record_firing(Utc::now(), "p", "r", &"y".repeat(50_000));
        let prompt = build_prompt(&trigger, 100);
        assert!(prompt.len() < 1_000);
        assert!(prompt.contains("characters omitted"));
    }

    #[tokio::test]
    async fn provider_failure_becomes_error_result() {
        let (_, exec) = setup(vec![MockResponse::Error(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ))]);
        let eval = exec.evaluate(&price_trigger(), &[]).await;
        match eval.result {
            TriggerResult::Error { error } => assert!(error.contains("bad key")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_provider_becomes_error_result() {
        let (mock, exec) = setup(vec![MockResponse::text("unused")]);
        let trigger = Trigger::new("price", "nobody/m", "check", 30);
        let eval = exec.evaluate(&trigger, &[]).await;
        assert!(matches!(eval.result, TriggerResult::Error { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_verdict_is_an_error() {
        let (_, exec) = setup(vec![MockResponse::text("I looked but forgot the verdict.")]);
        let eval = exec.evaluate(&price_trigger(), &[]).await;
        assert!(matches!(eval.result, TriggerResult::Error { .. }));
    }

    #[test]
    fn system_prompt_grounds_date_and_time() {
        let now = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 5, 14, 30, 0)
            .unwrap();
        let prompt = system_prompt("price", now);
        assert!(prompt.contains("Thursday, March 5, 2026"));
        assert!(prompt.contains("14:30 (UTC+02:00)"));
        assert!(prompt.contains("```json"));
    }
}
