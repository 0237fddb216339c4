use serde_json::{json, Value};
use tracing::debug;

use parley_core::{Message, Role, ToolDefinition, ToolRound};

/// Build the Messages API request body.
pub fn build_request_body(
    messages: &[Message],
    rounds: &[ToolRound],
    model: &str,
    system_prompt: &str,
    tools: &[ToolDefinition],
    max_tokens: u32,
    supports_images: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": convert_messages(messages, rounds, supports_images),
    });

    if !system_prompt.is_empty() {
        body["system"] = json!(system_prompt);
    }

    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
    }

    body
}

/// Convert history plus tool rounds into strictly alternating turns that start
/// with the user. Log messages never leave the process.
pub fn convert_messages(messages: &[Message], rounds: &[ToolRound], supports_images: bool) -> Vec<Value> {
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            Role::Log => continue,
            Role::User => ("user", user_blocks(msg, supports_images)),
            Role::Assistant => ("assistant", text_block(&msg.content).into_iter().collect()),
        };
        turns.push((role, blocks));
    }

    for round in rounds {
        let mut assistant: Vec<Value> = text_block(&round.assistant_text).into_iter().collect();
        assistant.extend(round.calls.iter().map(|c| {
            json!({
                "type": "tool_use",
                "id": c.id.as_str(),
                "name": c.name,
                "input": c.input,
            })
        }));
        turns.push(("assistant", assistant));

        let results = round
            .results
            .iter()
            .map(|r| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": r.tool_use_id.as_str(),
                    "content": r.content,
                    "is_error": r.is_error,
                })
            })
            .collect();
        turns.push(("user", results));
    }

    let mut merged: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for (role, blocks) in turns {
        if blocks.is_empty() {
            continue;
        }
        if merged.is_empty() && role == "assistant" {
            debug!("dropping leading assistant turn");
            continue;
        }
        match merged.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => merged.push((role, blocks)),
        }
    }

    merged
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

fn user_blocks(msg: &Message, supports_images: bool) -> Vec<Value> {
    let mut blocks = Vec::new();
    if supports_images {
        blocks.extend(msg.images().map(|img| {
            json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": img.mime_type,
                    "data": img.data,
                },
            })
        }));
    }
    blocks.extend(text_block(&msg.content));
    blocks
}

fn text_block(text: &str) -> Option<Value> {
    (!text.trim().is_empty()).then(|| json!({ "type": "text", "text": text }))
}
