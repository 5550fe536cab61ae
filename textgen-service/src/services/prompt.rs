//! Chat prompt construction and output cleanup.

use crate::dtos::ChatMessage;

pub const SYSTEM_PREAMBLE: &str =
    "You are an ethical AI writing assistant trained on legally licensed materials.";

/// Manuscript excerpts are cut to this many characters.
pub const MAX_CONTEXT_CHARS: usize = 2000;

/// First `MAX_CONTEXT_CHARS` characters of `context` (not bytes).
pub fn truncate_context(context: &str) -> &str {
    match context.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((idx, _)) => &context[..idx],
        None => context,
    }
}

/// Render one message. User turns are wrapped in instruction tags.
fn render_message(message: &ChatMessage) -> String {
    if message.role == "user" {
        format!("[INST] {} [/INST]", message.content)
    } else {
        format!(" {} ", message.content)
    }
}

/// Preamble, optional manuscript excerpt, then the conversation.
pub fn build_chat_prompt(messages: &[ChatMessage], manuscript_context: Option<&str>) -> String {
    let mut prompt = String::from(SYSTEM_PREAMBLE);

    if let Some(context) = manuscript_context.filter(|c| !c.is_empty()) {
        prompt.push_str("\n\nManuscript context:\n");
        prompt.push_str(truncate_context(context));
    }

    let conversation = messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n");

    prompt.push_str("\n\n");
    prompt.push_str(&conversation);
    prompt
}

/// Remove the echoed prompt from a causal LM output.
///
/// The result never starts with `prompt` and is trimmed, so applying this
/// twice gives the same result as applying it once.
pub fn strip_prompt<'a>(generated: &'a str, prompt: &str) -> &'a str {
    // Compare trimmed: the output is trimmed and chat prompts end in a space.
    let prompt = prompt.trim();
    let mut rest = generated.trim();
    if prompt.is_empty() {
        return rest;
    }
    while let Some(stripped) = rest.strip_prefix(prompt) {
        rest = stripped.trim();
    }
    rest
}
