//! Chat message model shared by the graph runtime, planner, and dispatcher.
//!
//! Every message carries a stable `id` so streaming observers can diff
//! consecutive state snapshots. Assistant messages own their tool calls;
//! each tool call is answered by exactly one `ToolResult` bound to its
//! `call_id` before the next assistant message (history cleaning enforces
//! this for anything headed back to the model).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique call id; the matching `ToolResult` echoes it.
    pub id: String,
    pub name: String,
    pub args: JsonValue,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    Other,
}

/// One part of a (possibly multipart) user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserPart {
    Text { text: String },
    ImageRef { path: String },
    /// Text file content injected at upload time.
    FileText { path: String, text: String },
}

/// Opaque payload returned by a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolPayload {
    Text(String),
    Json(JsonValue),
}

impl ToolPayload {
    pub fn render(&self) -> String {
        match self {
            ToolPayload::Text(s) => s.clone(),
            ToolPayload::Json(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        id: String,
        content: String,
    },
    User {
        id: String,
        content: Vec<UserPart>,
    },
    Assistant {
        id: String,
        content: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
        #[serde(default)]
        finish_reason: FinishReason,
    },
    ToolResult {
        id: String,
        call_id: String,
        name: String,
        content: ToolPayload,
        #[serde(default)]
        is_error: bool,
    },
}

pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            id: new_message_id(),
            content: content.into(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User {
            id: new_message_id(),
            content: vec![UserPart::Text { text: text.into() }],
        }
    }

    pub fn user_parts(content: Vec<UserPart>) -> Self {
        Message::User {
            id: new_message_id(),
            content,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            id: new_message_id(),
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn assistant_with_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        finish_reason: FinishReason,
    ) -> Self {
        Message::Assistant {
            id: new_message_id(),
            content: content.into(),
            tool_calls,
            finish_reason,
        }
    }

    pub fn tool_result(call_id: &str, name: &str, content: ToolPayload) -> Self {
        Message::ToolResult {
            id: new_message_id(),
            call_id: call_id.to_string(),
            name: name.to_string(),
            content,
            is_error: false,
        }
    }

    pub fn tool_error(call_id: &str, name: &str, error: impl Into<String>) -> Self {
        Message::ToolResult {
            id: new_message_id(),
            call_id: call_id.to_string(),
            name: name.to_string(),
            content: ToolPayload::Text(error.into()),
            is_error: true,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::System { id, .. }
            | Message::User { id, .. }
            | Message::Assistant { id, .. }
            | Message::ToolResult { id, .. } => id,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    /// Tool calls attached to this message (empty for non-assistant roles).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Flattened textual content, used for token estimation and summaries.
    pub fn text(&self) -> String {
        match self {
            Message::System { content, .. } => content.clone(),
            Message::User { content, .. } => content
                .iter()
                .map(|part| match part {
                    UserPart::Text { text } => text.clone(),
                    UserPart::ImageRef { path } => format!("[image: {}]", path),
                    UserPart::FileText { path, text } => {
                        format!("[file: {}]\n{}", path, text)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Message::Assistant { content, .. } => content.clone(),
            Message::ToolResult { name, content, .. } => {
                format!("[{}] {}", name, content.render())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// History cleaning
// ---------------------------------------------------------------------------

/// Remove assistant messages whose tool calls were never answered.
///
/// Chat APIs reject an assistant message with tool calls that is not
/// followed by one result per call id, so unanswered ones are pruned
/// before the history is re-sent to the model.
pub fn clean_history(messages: &[Message]) -> Vec<Message> {
    let answered: HashSet<&str> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    messages
        .iter()
        .filter(|m| {
            let calls = m.tool_calls();
            calls.is_empty() || calls.iter().all(|c| answered.contains(c.id.as_str()))
        })
        .cloned()
        .collect()
}

/// Keep the last `keep_recent` non-system messages, growing the kept tail
/// minimally so it never starts in the middle of a tool-call/result pair.
pub fn truncate_safely(messages: &[Message], keep_recent: usize) -> Vec<Message> {
    if messages.len() <= keep_recent {
        return messages.to_vec();
    }
    let mut start = messages.len() - keep_recent;
    // A ToolResult at the boundary belongs to an earlier assistant message;
    // walk back until the tail starts at the owning assistant.
    while start > 0 && matches!(messages[start], Message::ToolResult { .. }) {
        start -= 1;
    }
    messages[start..].to_vec()
}
