//! Council runs: members answer independently, then a chairman model
//! synthesizes their answers into one.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_core::{Message, Role};
use parley_settings::CouncilSettings;

use crate::events::{FanoutEvent, MemberStatus};
use crate::fanout::{ActiveRun, ComparisonResponse, FanoutError, FanoutOrchestrator};

pub const CHAIRMAN_SYSTEM_PROMPT: &str = "You are the chairman of a council of AI models. \
Each member answered the user's question on its own; their answers are quoted in the message \
below. Write the single best answer to the question. Keep what is correct and well supported, \
settle disagreements on the merits and fill in anything the members missed. Address the user \
directly and do not mention the council, the members or how the answer was put together.";

const NO_ANSWERS: &str = "no council member produced an answer to synthesize";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouncilConfig {
    pub chairman_model: String,
    pub members: Vec<String>,
}

impl From<&CouncilSettings> for CouncilConfig {
    fn from(s: &CouncilSettings) -> Self {
        Self {
            chairman_model: s.chairman_model.clone(),
            members: s.members.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CouncilOutcome {
    pub members: Vec<ComparisonResponse>,
    /// The chairman's answer, keyed by the chairman model.
    pub synthesis: ComparisonResponse,
}

impl FanoutOrchestrator {
    /// Run every member, wait for all of them to settle, then stream the
    /// chairman's synthesis as [`FanoutEvent::SynthesisChunk`]s.
    pub async fn start_council(
        &self,
        config: &CouncilConfig,
        messages: &[Message],
    ) -> Result<CouncilOutcome, FanoutError> {
        let run = self.begin(&config.members)?;
        let members = self.fan_out(&run, messages).await;
        let synthesis = self
            .synthesize(&run, &config.chairman_model, messages, &members)
            .await;
        Ok(CouncilOutcome { members, synthesis })
    }

    async fn synthesize(
        &self,
        run: &ActiveRun<'_>,
        chairman: &str,
        messages: &[Message],
        members: &[ComparisonResponse],
    ) -> ComparisonResponse {
        if run.token.is_cancelled() {
            debug!(run_id = %run.id, "council cancelled before synthesis");
            return ComparisonResponse {
                model: chairman.to_string(),
                status: MemberStatus::Complete,
                cancelled: true,
                ..ComparisonResponse::default()
            };
        }

        let Some(prompt) = synthesis_prompt(latest_question(messages), members) else {
            warn!(run_id = %run.id, "council has no answers to synthesize");
            return ComparisonResponse::failed(chairman, NO_ANSWERS.to_string());
        };
        let (provider, model) = match self.providers.resolve(chairman) {
            Ok(resolved) => resolved,
            Err(e) => return ComparisonResponse::failed(chairman, e.to_string()),
        };

        let board = self.board.clone();
        let mut options = self.template.clone();
        options.system_prompt = CHAIRMAN_SYSTEM_PROMPT.to_string();
        options.cancel = run.token.child_token();
        options.on_tool_use = None;
        options.on_chunk = Some(Arc::new(move |text: &str| {
            board.events.emit(FanoutEvent::SynthesisChunk {
                text: text.to_string(),
            });
        }));

        info!(run_id = %run.id, chairman, "council synthesis started");
        match self
            .executor
            .run(provider.as_ref(), &[Message::user(prompt)], &model, &options)
            .await
        {
            Ok(outcome) => ComparisonResponse::from_outcome(chairman, outcome),
            Err(e) => {
                warn!(run_id = %run.id, chairman, error = %e, "council synthesis failed");
                ComparisonResponse::failed(chairman, e.to_string())
            }
        }
    }
}

fn latest_question(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

/// The chairman's input. Members without a final answer are left out; `None`
/// when nobody answered.
pub fn synthesis_prompt(question: &str, members: &[ComparisonResponse]) -> Option<String> {
    let answered: Vec<&ComparisonResponse> = members
        .iter()
        .filter(|m| m.status == MemberStatus::Complete && !m.content.trim().is_empty())
        .collect();
    if answered.is_empty() {
        return None;
    }

    let mut prompt = format!("Question:\n{}\n\nCouncil answers:\n", question.trim());
    for (i, member) in answered.iter().enumerate() {
        let _ = write!(
            prompt,
            "\n--- Answer {} ({}) ---\n{}\n",
            i + 1,
            member.model,
            member.content.trim()
        );
    }
    prompt.push_str("\nWrite the final answer to the question.");
    Some(prompt)
}
