//! Todo tools: track multi-step task progress.
//!
//! `todo_write` replaces the whole list; the dispatcher folds the returned
//! list into session state. At most one item may be `in_progress`.

use crate::engine::message::ToolPayload;
use crate::engine::state::{TodoItem, TodoPriority, TodoStatus};
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

pub struct TodoReadTool;

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current todo list for this session."
    }

    fn args_schema(&self) -> JsonValue {
        json!({"type": "object", "properties": {}})
    }

    async fn run(&self, _args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        Ok(ToolPayload::Json(json!({
            "ok": true,
            "todos": ctx.todos,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct TodoWriteArgs {
    todos: Vec<IncomingTodo>,
}

#[derive(Debug, Deserialize)]
struct IncomingTodo {
    content: String,
    status: TodoStatus,
    id: Option<String>,
    #[serde(default)]
    priority: Option<TodoPriority>,
}

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the session todo list. Use for multi-step tasks (3+ steps); \
         keep exactly one item in_progress at a time and mark items completed \
         as soon as they are done."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Full todo list; replaces the previous one",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                            "id": {"type": "string"},
                            "priority": {"type": "string", "enum": ["low", "medium", "high"]}
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn run(&self, args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
        let args: TodoWriteArgs = serde_json::from_value(args)
            .map_err(|e| anyhow::anyhow!("each todo needs 'content' and 'status': {}", e))?;

        let in_progress = args
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if in_progress > 1 {
            anyhow::bail!(
                "only one todo can be 'in_progress' at a time, found {}",
                in_progress
            );
        }

        let todos: Vec<TodoItem> = args
            .todos
            .into_iter()
            .map(|t| TodoItem {
                id: t.id.unwrap_or_else(|| {
                    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
                }),
                content: t.content,
                status: t.status,
                priority: t.priority.unwrap_or_default(),
            })
            .collect();

        Ok(ToolPayload::Json(json!({"ok": true, "todos": todos})))
    }
}
