use parley_core::{AttachmentKind, Message, ToolDefinition};

/// Fixed per-message cost for role and framing.
pub const MESSAGE_OVERHEAD: usize = 4;
pub const MIN_IMAGE_TOKENS: usize = 85;

/// Approximation: bytes / 4, rounded up.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate from the base64 payload size; never below [`MIN_IMAGE_TOKENS`].
pub fn estimate_image_tokens(base64_data: &str) -> usize {
    let bytes = base64_data.len() * 3 / 4;
    let pixels = bytes / 3;
    (pixels / 750).max(MIN_IMAGE_TOKENS)
}

/// Everything in a message except its text content.
pub fn estimate_fixed_tokens(msg: &Message) -> usize {
    let attachments: usize = msg
        .attachments
        .iter()
        .map(|a| match a.kind {
            AttachmentKind::Image => estimate_image_tokens(&a.data),
            AttachmentKind::Document => estimate_text_tokens(&a.data),
        })
        .sum();
    let tool_use: usize = msg
        .tool_use
        .iter()
        .map(|t| {
            estimate_text_tokens(&t.name)
                + estimate_text_tokens(&t.input.to_string())
                + t.result.as_deref().map_or(0, estimate_text_tokens)
        })
        .sum();
    MESSAGE_OVERHEAD + attachments + tool_use
}

pub fn estimate_message_tokens(msg: &Message) -> usize {
    estimate_fixed_tokens(msg) + estimate_text_tokens(&msg.content)
}

/// Tools are costed as their serialized JSON.
pub fn estimate_tool_tokens(tools: &[ToolDefinition]) -> usize {
    if tools.is_empty() {
        return 0;
    }
    serde_json::to_string(tools).map_or(0, |s| estimate_text_tokens(&s))
}
