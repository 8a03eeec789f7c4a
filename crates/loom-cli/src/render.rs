//! Plain-text rendering of stored messages
//!
//! Only `user_data` and `display_data` are shown; `llm_data` belongs to the
//! model.

use serde_json::Value;

use loom_core::storage::{Conversation, Message, MessageType};

fn str_field<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a str> {
    value.and_then(|v| v.get(key)).and_then(Value::as_str)
}

pub fn render_message(message: &Message) -> String {
    let user = message.user_data.as_ref();
    let body = match message.message_type {
        MessageType::User => format!("> {}", str_field(user, "text").unwrap_or_default()),
        MessageType::Agent => render_agent(user),
        MessageType::Tool => render_tool(user, message.display_data.as_ref()),
        MessageType::System => str_field(user, "text").unwrap_or_default().to_string(),
        MessageType::Error => format!("error: {}", str_field(user, "error").unwrap_or("unknown")),
        MessageType::GitInfo => format!(
            "git: {} @ {}",
            str_field(user, "branch").unwrap_or("?"),
            short_hash(str_field(user, "head").unwrap_or("?"))
        ),
        MessageType::StartupHook => match str_field(user, "error") {
            Some(error) => format!("startup hook failed: {}", error),
            None => format!(
                "startup hook:\n{}",
                str_field(user, "output").unwrap_or_default()
            ),
        },
    };
    format!("[{}] {}", message.sequence_id, body)
}

fn render_agent(user: Option<&Value>) -> String {
    let mut out = str_field(user, "text").unwrap_or_default().to_string();
    let calls = user
        .and_then(|v| v.get("tool_calls"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for call in calls {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "  -> {}",
            call.get("name").and_then(Value::as_str).unwrap_or("?")
        ));
    }
    out
}

fn render_tool(user: Option<&Value>, display: Option<&Value>) -> String {
    let name = str_field(user, "name").unwrap_or("?");
    if let Some(error) = user.and_then(|v| v.get("error")).filter(|e| !e.is_null()) {
        let message = error.get("message").and_then(Value::as_str).unwrap_or("failed");
        return format!("{}: error: {}", name, message);
    }

    match str_field(display, "type") {
        Some("bash") => format!(
            "{}: $ {}\n{}",
            name,
            str_field(display, "command").unwrap_or_default(),
            str_field(display, "output").unwrap_or_default()
        ),
        Some("output_iframe") => format!(
            "{}: [html{}]",
            name,
            str_field(display, "title")
                .map(|t| format!(": {}", t))
                .unwrap_or_default()
        ),
        _ => format!("{}: ok", name),
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

pub fn render_conversation(conversation: &Conversation, message_count: usize) -> String {
    format!(
        "{}  {}  {} message(s)  {}",
        conversation.id,
        conversation.created_at.format("%Y-%m-%d %H:%M:%S"),
        message_count,
        conversation.working_dir.as_deref().unwrap_or("-")
    )
}
