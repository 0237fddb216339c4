//! Trigger verdict parsing.
//!
//! Grammar, in order of preference:
//! 1. the last fenced block (```` ```json ```` or bare ```` ``` ````) whose body
//!    is a JSON object with a `triggered` key;
//! 2. otherwise the last bare JSON object in the text with that key.
//!
//! Everything before the chosen block is the displayed response, minus the
//! opening fence of a block the grammar did not recognise (```` ```js ````).
//! Anything after it is ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use parley_core::TriggerResult;

const VERDICT_KEY: &str = "triggered";
const EXCERPT_CHARS: usize = 200;
pub const DEFAULT_SKIP_REASON: &str = "No meaningful change detected";

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("verdict regex is valid")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub triggered: bool,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedVerdict {
    pub verdict: Verdict,
    /// Text preceding the verdict block, trimmed.
    pub response: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerdictError {
    #[error("no verdict block found; response ended with: {excerpt}")]
    Missing { excerpt: String },
    #[error("verdict field '{VERDICT_KEY}' is not a boolean; response ended with: {excerpt}")]
    NotBoolean { excerpt: String },
}

pub fn parse_verdict(text: &str) -> Result<ParsedVerdict, VerdictError> {
    let (response, object) = last_fenced(text)
        .map(|(start, map)| (&text[..start], map))
        .or_else(|| last_bare(text).map(|(start, map)| (strip_open_fence(&text[..start]), map)))
        .ok_or_else(|| VerdictError::Missing {
            excerpt: excerpt(text),
        })?;

    let triggered = object
        .get(VERDICT_KEY)
        .and_then(Value::as_bool)
        .ok_or_else(|| VerdictError::NotBoolean {
            excerpt: excerpt(text),
        })?;
    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    Ok(ParsedVerdict {
        verdict: Verdict { triggered, reason },
        response: response.trim().to_string(),
    })
}

/// Map a model response onto a trigger result.
pub fn interpret(text: &str) -> TriggerResult {
    match parse_verdict(text) {
        Ok(parsed) if parsed.verdict.triggered => TriggerResult::Triggered {
            response: parsed.response,
            reasoning: parsed.verdict.reason,
        },
        Ok(parsed) => TriggerResult::Skipped {
            reason: parsed
                .verdict
                .reason
                .unwrap_or_else(|| DEFAULT_SKIP_REASON.to_string()),
        },
        Err(e) => TriggerResult::Error {
            error: e.to_string(),
        },
    }
}

fn last_fenced(text: &str) -> Option<(usize, Map<String, Value>)> {
    let matches: Vec<_> = FENCED_BLOCK.captures_iter(text).collect();
    matches.iter().rev().find_map(|caps| {
        let whole = caps.get(0)?;
        let body = caps.get(1)?.as_str().trim();
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) if map.contains_key(VERDICT_KEY) => Some((whole.start(), map)),
            _ => None,
        }
    })
}

fn last_bare(text: &str) -> Option<(usize, Map<String, Value>)> {
    text.char_indices()
        .rev()
        .filter(|&(_, c)| c == '{')
        .find_map(|(pos, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(Value::Object(map))) if map.contains_key(VERDICT_KEY) => Some((pos, map)),
                _ => None,
            }
        })
}

/// Drop a trailing fence opener left unclosed in `prefix`.
fn strip_open_fence(prefix: &str) -> &str {
    if prefix.matches("```").count() % 2 == 0 {
        return prefix;
    }
    prefix.rfind("```").map_or(prefix, |i| &prefix[..i])
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - EXCERPT_CHARS).collect();
    format!("…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_triggered() {
        let text = "Price is $42\n\n```json\n{\"triggered\": true, \"reason\": \"dropped below $50\"}\n```";
        let parsed = parse_verdict(text).unwrap();
        assert!(parsed.verdict.triggered);
        assert_eq!(parsed.response, "Price is $42");
        assert_eq!(parsed.verdict.reason.as_deref(), Some("dropped below $50"));
    }

    #[test]
    fn last_fenced_block_wins_and_trailing_text_ignored() {
        let text = "Draft:\n```json\n{\"triggered\": false}\n```\nFinal answer\n```json\n{\"triggered\": true}\n```\nthanks!";
        let result = interpret(text);
        assert_eq!(
            result,
            TriggerResult::Triggered {
                response: "Draft:\n```json\n{\"triggered\": false}\n```\nFinal answer".into(),
                reasoning: None,
            }
        );
    }

    #[test]
    fn fenced_blocks_without_the_key_are_skipped() {
        let text = "Data:\n```json\n{\"price\": 42}\n```\n```\n{\"triggered\": false, \"reason\": \"same as before\"}\n```";
        assert_eq!(
            interpret(text),
            TriggerResult::Skipped {
                reason: "same as before".into()
            }
        );
    }

    #[test]
    fn bare_object_fallback() {
        let text = "Nothing new here. {\"triggered\": false}";
        assert_eq!(
            interpret(text),
            TriggerResult::Skipped {
                reason: DEFAULT_SKIP_REASON.into()
            }
        );

        let nested = "Alert! {\"triggered\": true, \"meta\": {\"n\": 1}}";
        let parsed = parse_verdict(nested).unwrap();
        assert!(parsed.verdict.triggered);
        assert_eq!(parsed.response, "Alert!");
    }

    #[test]
    fn unrecognised_fence_tag_is_not_left_in_the_response() {
        let text = "Stock is back.\n\n```javascript\n{\"triggered\": true, \"reason\": \"restocked\"}\n```";
        let parsed = parse_verdict(text).unwrap();
        assert!(parsed.verdict.triggered);
        assert_eq!(parsed.response, "Stock is back.");

        let closed = "Code:\n```rust\nlet x = 1;\n```\nDone {\"triggered\": false}";
        assert_eq!(parse_verdict(closed).unwrap().response, "Code:\n```rust\nlet x = 1;\n```\nDone");
    }

    #[test]
    fn missing_verdict_is_an_error_with_excerpt() {
        match interpret("The price is still $42.") {
            TriggerResult::Error { error } => {
                assert!(error.contains("no verdict block"));
                assert!(error.contains("still $42"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_boolean_verdict_is_an_error() {
        let err = parse_verdict("```json\n{\"triggered\": \"yes\"}\n```").unwrap_err();
        assert!(matches!(err, VerdictError::NotBoolean { .. }));
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let long = format!("{}END", "a".repeat(500));
        let e = excerpt(&long);
        assert!(e.ends_with("END"));
        assert_eq!(e.chars().count(), EXCERPT_CHARS + 1);
    }
}
