//! Per-session agent state and the partial-update record returned by nodes.
//!
//! Nodes never mutate state in place. Each node returns a [`StateUpdate`]
//! and the graph runtime merges it with [`AgentState::apply`]: messages are
//! appended (or replaced wholesale by the compressor), scalars replace,
//! counters add. This keeps rollback on a failed node trivial.

use crate::engine::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;

pub const MAIN_CONTEXT_ID: &str = "main";
pub const SUBAGENT_PREFIX: &str = "subagent-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedFile {
    /// Path relative to the workspace `uploads/` directory.
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub thread_id: String,
    /// `main` for the host agent, `subagent-<hex>` for delegated children.
    pub context_id: String,
    pub parent_context: Option<String>,
    pub messages: Vec<Message>,
    pub todos: Vec<TodoItem>,
    /// Planner executions in the current run.
    pub loops: usize,
    pub max_loops: usize,
    pub cumulative_prompt_tokens: usize,
    pub cumulative_completion_tokens: usize,
    pub needs_compression: bool,
    pub auto_compressed_this_request: bool,
    /// Completed compressions; drives the summarize escalation cycle.
    pub compact_count: usize,
    pub last_compression_ratio: Option<f64>,
    pub workspace_path: Option<PathBuf>,
    pub active_skill: Option<String>,
    /// Tool names promoted into this session's catalog via mentions.
    pub dynamic_tools: Vec<String>,
    pub uploaded_files: Vec<UploadedFile>,
    /// Current turn's uploads; drives the one-shot reminder.
    pub new_uploaded_files: Vec<UploadedFile>,
    pub mentioned_agents: Vec<String>,
    pub new_mentioned_agents: Vec<String>,
    /// Node to re-enter on resume after an interrupt.
    pub pending_node: Option<String>,
    /// Value supplied by `resume`; consumed once by the pending node.
    pub resume_value: Option<JsonValue>,
}

impl AgentState {
    pub fn new(thread_id: impl Into<String>, max_loops: usize) -> Self {
        Self {
            thread_id: thread_id.into(),
            context_id: MAIN_CONTEXT_ID.to_string(),
            parent_context: None,
            messages: Vec::new(),
            todos: Vec::new(),
            loops: 0,
            max_loops,
            cumulative_prompt_tokens: 0,
            cumulative_completion_tokens: 0,
            needs_compression: false,
            auto_compressed_this_request: false,
            compact_count: 0,
            last_compression_ratio: None,
            workspace_path: None,
            active_skill: None,
            dynamic_tools: Vec::new(),
            uploaded_files: Vec::new(),
            new_uploaded_files: Vec::new(),
            mentioned_agents: Vec::new(),
            new_mentioned_agents: Vec::new(),
            pending_node: None,
            resume_value: None,
        }
    }

    /// Fresh isolated state for a delegated child. Shares only the parent's
    /// workspace path; everything else starts empty.
    pub fn subagent(
        task: &str,
        parent_context: &str,
        workspace_path: Option<PathBuf>,
        max_loops: usize,
    ) -> Self {
        let context_id = format!(
            "{}{}",
            SUBAGENT_PREFIX,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut state = Self::new(context_id.clone(), max_loops);
        state.context_id = context_id;
        state.parent_context = Some(parent_context.to_string());
        state.workspace_path = workspace_path;
        state.messages.push(Message::user_text(task));
        state
    }

    pub fn is_subagent(&self) -> bool {
        self.context_id.starts_with(SUBAGENT_PREFIX)
    }

    /// Reset the one-shot flags at the top of a user turn. Prevents the
    /// compression anti-loop flag and the new-upload/mention reminders from
    /// leaking across turns.
    pub fn begin_user_turn(&mut self) {
        self.auto_compressed_this_request = false;
        self.new_uploaded_files.clear();
        self.new_mentioned_agents.clear();
        self.loops = 0;
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_result_for(&self, call_id: &str) -> bool {
        self.messages.iter().any(|m| {
            matches!(m, Message::ToolResult { call_id: c, .. } if c == call_id)
        })
    }

    /// Merge a node's partial update into this state.
    pub fn apply(&mut self, update: StateUpdate) {
        match update.messages {
            MessageUpdate::Keep => {}
            MessageUpdate::Append(new) => self.messages.extend(new),
            MessageUpdate::Replace(new) => self.messages = new,
        }
        if let Some(todos) = update.todos {
            self.todos = todos;
        }
        self.loops += update.loops_increment;
        self.cumulative_prompt_tokens += update.add_prompt_tokens;
        self.cumulative_completion_tokens += update.add_completion_tokens;
        if update.reset_token_counters {
            self.cumulative_prompt_tokens = 0;
            self.cumulative_completion_tokens = 0;
        }
        if let Some(v) = update.needs_compression {
            self.needs_compression = v;
        }
        if let Some(v) = update.auto_compressed_this_request {
            self.auto_compressed_this_request = v;
        }
        self.compact_count += update.compact_count_increment;
        if let Some(ratio) = update.last_compression_ratio {
            self.last_compression_ratio = Some(ratio);
        }
        for name in update.add_dynamic_tools {
            if !self.dynamic_tools.contains(&name) {
                self.dynamic_tools.push(name);
            }
        }
        if let Some(skill) = update.active_skill {
            self.active_skill = skill;
        }
    }
}

/// How a node changes the message list.
#[derive(Debug, Clone, Default)]
pub enum MessageUpdate {
    #[default]
    Keep,
    Append(Vec<Message>),
    /// Compressor output: the history is swapped wholesale.
    Replace(Vec<Message>),
}

/// Partial update returned by a node; merged by [`AgentState::apply`].
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: MessageUpdate,
    pub todos: Option<Vec<TodoItem>>,
    pub loops_increment: usize,
    pub add_prompt_tokens: usize,
    pub add_completion_tokens: usize,
    pub reset_token_counters: bool,
    pub needs_compression: Option<bool>,
    pub auto_compressed_this_request: Option<bool>,
    pub compact_count_increment: usize,
    pub last_compression_ratio: Option<f64>,
    pub add_dynamic_tools: Vec<String>,
    pub active_skill: Option<Option<String>>,
}

impl StateUpdate {
    pub fn append(messages: Vec<Message>) -> Self {
        Self {
            messages: MessageUpdate::Append(messages),
            ..Default::default()
        }
    }
}
