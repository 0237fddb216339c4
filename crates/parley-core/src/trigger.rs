use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TriggerId;
use crate::messages::{Message, Role};

/// Check records kept per trigger.
pub const TRIGGER_HISTORY_LIMIT: usize = 50;

/// A background prompt evaluated on an interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: String,
    pub enabled: bool,
    /// Qualified `provider/model` string.
    pub model: String,
    pub trigger_prompt: String,
    pub interval_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<TriggerCheck>,
    /// Firing log; the newest assistant entry is the baseline for the next check.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        trigger_prompt: impl Into<String>,
        interval_minutes: u32,
    ) -> Self {
        Self {
            id: TriggerId::new(),
            name: name.into(),
            enabled: true,
            model: model.into(),
            trigger_prompt: trigger_prompt.into(),
            interval_minutes,
            last_checked: None,
            last_triggered: None,
            history: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Due when never checked, or when a full interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => now - last >= self.interval(),
        }
    }

    /// The assistant response recorded at the last firing.
    pub fn baseline(&self) -> Option<&Message> {
        let fired_at = self.last_triggered?;
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.timestamp == fired_at)
    }

    pub fn record_check(&mut self, checked_at: DateTime<Utc>, result: &TriggerResult) {
        self.last_checked = Some(checked_at);
        self.history.push(TriggerCheck {
            checked_at,
            outcome: result.outcome(),
            summary: result.summary(),
        });
        if self.history.len() > TRIGGER_HISTORY_LIMIT {
            let excess = self.history.len() - TRIGGER_HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Append the firing block and advance `last_triggered`. An older
    /// `fired_at` never moves `last_triggered` backwards.
    pub fn record_firing(
        &mut self,
        fired_at: DateTime<Utc>,
        prompt_sent: &str,
        reasoning: &str,
        response: &str,
    ) {
        self.messages.push(Message::log(prompt_sent).with_timestamp(fired_at));
        self.messages.push(Message::log(reasoning).with_timestamp(fired_at));
        self.messages
            .push(Message::user(self.trigger_prompt.clone()).with_timestamp(fired_at));
        self.messages.push(
            Message::assistant(response)
                .with_timestamp(fired_at)
                .with_model(self.model.clone()),
        );
        self.last_triggered = Some(match self.last_triggered {
            Some(prev) if prev > fired_at => prev,
            _ => fired_at,
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Triggered,
    Skipped,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerCheck {
    pub checked_at: DateTime<Utc>,
    pub outcome: TriggerOutcome,
    pub summary: String,
}

/// Verdict of one trigger evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TriggerResult {
    Triggered {
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    Skipped {
        reason: String,
    },
    Error {
        error: String,
    },
}

impl TriggerResult {
    pub fn outcome(&self) -> TriggerOutcome {
        match self {
            Self::Triggered { .. } => TriggerOutcome::Triggered,
            Self::Skipped { .. } => TriggerOutcome::Skipped,
            Self::Error { .. } => TriggerOutcome::Error,
        }
    }

    fn summary(&self) -> String {
        let text = match self {
            Self::Triggered { reasoning: Some(r), .. } => r.as_str(),
            Self::Triggered { response, .. } => response.as_str(),
            Self::Skipped { reason } => reason.as_str(),
            Self::Error { error } => error.as_str(),
        };
        text.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn due_when_never_checked() {
        let t = Trigger::new("price", "anthropic/claude", "check price", 30);
        assert!(t.is_due(at(0)));
    }

    #[test]
    fn due_exactly_at_interval_boundary() {
        let mut t = Trigger::new("price", "anthropic/claude", "check price", 30);
        t.last_checked = Some(at(0));
        assert!(t.is_due(at(30 * 60)));
        assert!(!t.is_due(at(30 * 60 - 1)));
    }

    #[test]
    fn firing_appends_block_and_sets_baseline() {
        let mut t = Trigger::new("price", "anthropic/claude", "check price", 30);
        assert!(t.baseline().is_none());
        t.record_firing(at(100), "prompt", "changed", "Price is $42");
        assert_eq!(t.messages.len(), 4);
        let roles: Vec<Role> = t.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Log, Role::Log, Role::User, Role::Assistant]);
        assert_eq!(t.last_triggered, Some(at(100)));
        assert_eq!(t.baseline().unwrap().content, "Price is $42");
    }

    #[test]
    fn last_triggered_never_moves_backwards() {
        let mut t = Trigger::new("price", "anthropic/claude", "check price", 30);
        t.record_firing(at(200), "p", "r", "new");
        t.record_firing(at(100), "p", "r", "stale");
        assert_eq!(t.last_triggered, Some(at(200)));
        assert_eq!(t.baseline().unwrap().content, "new");
    }

    #[test]
    fn history_is_capped() {
        let mut t = Trigger::new("price", "anthropic/claude", "check price", 1);
        for i in 0..60 {
            t.record_check(at(i), &TriggerResult::Skipped { reason: format!("r{i}") });
        }
        assert_eq!(t.history.len(), TRIGGER_HISTORY_LIMIT);
        assert_eq!(t.history[0].summary, "r10");
        assert_eq!(t.last_checked, Some(at(59)));
    }

    #[test]
    fn result_serde_tagged() {
        let r = TriggerResult::Triggered { response: "Price is $42".into(), reasoning: None };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["result"], "triggered");
        assert_eq!(json["response"], "Price is $42");
        let back: TriggerResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
