//! Planner node: assembles the prompt, invokes the model with the visible
//! tool catalog, and turns the reply into state updates.
//!
//! The system prompt is rebuilt on every pass (the stored history never
//! contains system messages for the host loop; they would go stale).
//! One-shot reminders (todos, new uploads, new mentions, token advisories)
//! are appended to the outgoing request only, never persisted.

use crate::engine::context::UsageLevel;
use crate::engine::graph::{NodeFn, NodeResult};
use crate::engine::message::{clean_history, FinishReason, Message, ToolCall, UserPart};
use crate::engine::state::{AgentState, MessageUpdate, StateUpdate, TodoStatus};
use crate::engine::tool::Tool;
use crate::engine::tool_registry::ToolRegistry;
use crate::engine::EngineDeps;
use crate::prompts::PromptKey;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub fn build_planner_node(deps: Arc<EngineDeps>) -> NodeFn {
    Arc::new(move |state: AgentState| {
        let deps = deps.clone();
        Box::pin(async move { run_planner(deps, state).await })
    })
}

async fn run_planner(deps: Arc<EngineDeps>, state: AgentState) -> Result<NodeResult> {
    let provider = deps.models.base();

    let visible = {
        let registry = deps.registry.read().expect("tool registry lock poisoned");
        registry.visible_for(&state)
    };
    let schemas = ToolRegistry::schemas(&visible);

    let system_text = deps.prompts.render(
        PromptKey::PlannerSystem,
        &[
            ("tool_catalog", &render_tool_catalog(&visible)),
            (
                "workspace_path",
                &state
                    .workspace_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(no workspace attached)".to_string()),
            ),
            // Minute precision keeps the prompt prefix cache-friendly.
            (
                "datetime",
                &chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
            ),
        ],
    );

    let mut request = vec![Message::system(system_text)];
    let history: Vec<Message> = state
        .messages
        .iter()
        .filter(|m| !m.is_system())
        .cloned()
        .collect();
    request.extend(clean_history(&history));

    let status = deps.tracker.status(
        state.cumulative_prompt_tokens,
        provider.context_window(),
        state.compact_count,
        state.last_compression_ratio,
    );
    let reminders = build_reminders(&deps, &state, &status);
    if !reminders.is_empty() {
        append_reminders(&mut request, &reminders);
    }

    debug!(
        "Planner pass {}: {} request messages, {} visible tools",
        state.loops + 1,
        request.len(),
        schemas.len()
    );

    let invoker = provider.bind_tools(schemas);
    // Model failures bubble to the session; state stays valid for resume.
    let turn = invoker
        .invoke(&request, Some(provider.max_completion_tokens()))
        .await?;

    let mut tool_calls: Vec<ToolCall> = turn.tool_calls;
    let mut synthetic_results = Vec::new();
    for invalid in turn.invalid_calls {
        let mut error = invalid.error;
        if turn.finish_reason == FinishReason::Length {
            error.push_str(
                "; the reply was truncated (finish_reason=length), raise \
                 max_completion_tokens for this model slot if this keeps happening",
            );
        }
        // The malformed call still appears on the assistant message, paired
        // with a synthetic error result, so the history stays well-formed
        // and the dispatcher never sees it unanswered.
        tool_calls.push(ToolCall {
            id: invalid.id.clone(),
            name: invalid.name.clone(),
            args: serde_json::json!({}),
        });
        synthetic_results.push(Message::tool_error(&invalid.id, &invalid.name, error));
    }

    let mut new_messages = vec![Message::assistant_with_calls(
        turn.content,
        tool_calls,
        turn.finish_reason,
    )];
    new_messages.extend(synthetic_results);

    let usage = turn.usage.unwrap_or_default();
    let status_after = deps.tracker.status(
        state.cumulative_prompt_tokens + usage.input_tokens,
        provider.context_window(),
        state.compact_count,
        state.last_compression_ratio,
    );
    if status_after.level >= UsageLevel::Warning {
        info!(
            "Token usage {:?}: {} / {} ({:.0}%)",
            status_after.level,
            status_after.cumulative_prompt_tokens,
            status_after.context_window,
            status_after.usage_ratio * 100.0
        );
    }

    Ok(NodeResult::Update(StateUpdate {
        messages: MessageUpdate::Append(new_messages),
        loops_increment: 1,
        add_prompt_tokens: usage.input_tokens,
        add_completion_tokens: usage.output_tokens,
        needs_compression: Some(state.needs_compression || status_after.needs_compression),
        ..Default::default()
    }))
}

/// Markdown tool catalog for the system prompt.
fn render_tool_catalog(tools: &[Arc<dyn Tool>]) -> String {
    let mut lines = Vec::new();
    for tool in tools {
        lines.push(format!("### {}\n{}", tool.name(), tool.description()));
        let schema = tool.args_schema();
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, prop) in props {
                let desc = prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("");
                let marker = if required.contains(&name.as_str()) {
                    " (required)"
                } else {
                    ""
                };
                lines.push(format!("- `{}`: {}{}", name, desc, marker));
            }
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

fn build_reminders(
    deps: &EngineDeps,
    state: &AgentState,
    status: &crate::engine::context::ContextStatus,
) -> Vec<String> {
    let mut reminders = Vec::new();

    if !state.todos.is_empty() {
        let mut lines = vec!["## Current todos".to_string()];
        for (idx, todo) in state.todos.iter().enumerate() {
            let status = match todo.status {
                TodoStatus::Pending => "pending",
                TodoStatus::InProgress => "in_progress",
                TodoStatus::Completed => "completed",
            };
            lines.push(format!("{}. [{}] {}", idx + 1, status, todo.content));
        }
        reminders.push(lines.join("\n"));
    }

    if !state.new_uploaded_files.is_empty() {
        let mut lines = vec!["## Newly uploaded files (under uploads/)".to_string()];
        for file in &state.new_uploaded_files {
            lines.push(format!("- `{}`", file.path));
        }
        reminders.push(lines.join("\n"));
    }

    if !state.new_mentioned_agents.is_empty() {
        let mut lines =
            vec!["## Capabilities the user just mentioned (now available)".to_string()];
        for name in &state.new_mentioned_agents {
            lines.push(format!("- `{}`", name));
        }
        reminders.push(lines.join("\n"));
    }

    if let Some(text) = deps.tracker.reminder_text(&deps.prompts, status) {
        reminders.push(text);
    }

    reminders
}

/// Attach reminders to the last user message of the outgoing request, or as
/// a fresh user message when the tail is not a user turn.
fn append_reminders(request: &mut Vec<Message>, reminders: &[String]) {
    let block = reminders.join("\n\n");
    if let Some(Message::User { content, .. }) = request.last_mut() {
        content.push(UserPart::Text { text: block });
        return;
    }
    request.push(Message::user_text(block));
}
