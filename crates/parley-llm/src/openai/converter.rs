use serde_json::{json, Value};

use parley_core::{Message, Role, ToolDefinition, ToolRound};

/// Prefix marking a failed tool result; the wire format has no error flag.
pub const TOOL_ERROR_PREFIX: &str = "[error] ";

/// Build the Chat Completions request body. Vendor-specific extensions such
/// as `stream_options` are left to the caller.
pub fn build_request_body(
    messages: &[Message],
    rounds: &[ToolRound],
    model: &str,
    system_prompt: &str,
    tools: &[ToolDefinition],
    max_tokens: Option<u32>,
    supports_images: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
        "messages": convert_messages(messages, rounds, system_prompt, supports_images),
    });

    if let Some(max) = max_tokens {
        body["max_tokens"] = json!(max);
    }

    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect(),
        );
    }

    body
}

pub fn convert_messages(
    messages: &[Message],
    rounds: &[ToolRound],
    system_prompt: &str,
    supports_images: bool,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + rounds.len() * 2 + 1);
    if !system_prompt.is_empty() {
        out.push(json!({ "role": "system", "content": system_prompt }));
    }

    for msg in messages {
        match msg.role {
            Role::Log => {}
            Role::User => out.push(json!({
                "role": "user",
                "content": user_content(msg, supports_images),
            })),
            Role::Assistant => out.push(json!({ "role": "assistant", "content": msg.content })),
        }
    }

    for round in rounds {
        let calls: Vec<Value> = round
            .calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id.as_str(),
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.input.to_string(),
                    },
                })
            })
            .collect();
        let content = if round.assistant_text.is_empty() {
            Value::Null
        } else {
            json!(round.assistant_text)
        };
        out.push(json!({ "role": "assistant", "content": content, "tool_calls": calls }));

        for result in &round.results {
            let content = if result.is_error {
                format!("{TOOL_ERROR_PREFIX}{}", result.content)
            } else {
                result.content.clone()
            };
            out.push(json!({
                "role": "tool",
                "tool_call_id": result.tool_use_id.as_str(),
                "content": content,
            }));
        }
    }

    out
}

fn user_content(msg: &Message, supports_images: bool) -> Value {
    let mut images = msg.images().peekable();
    if !supports_images || images.peek().is_none() {
        return json!(msg.content);
    }
    let mut parts: Vec<Value> = Vec::new();
    if !msg.content.is_empty() {
        parts.push(json!({ "type": "text", "text": msg.content }));
    }
    parts.extend(images.map(|img| {
        json!({
            "type": "image_url",
            "image_url": { "url": img.data_url() },
        })
    }));
    Value::Array(parts)
}
