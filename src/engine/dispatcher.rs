//! Tool dispatcher node: executes the tool calls of the last assistant
//! message sequentially, in emission order.
//!
//! Before each call the approval engine is consulted; a call that needs
//! approval suspends the graph with a `tool_approval` payload, carrying the
//! results produced so far as a partial update. On resume the node re-runs,
//! skips calls that already have results, and applies the resume value to
//! the first unanswered call. The special `ask_human` tool is intercepted
//! here and suspends with a `user_input_request` payload instead of
//! executing.

use crate::engine::approval::Decision;
use crate::engine::graph::{InterruptPayload, NodeFn, NodeResult};
use crate::engine::message::{Message, ToolCall, ToolPayload};
use crate::engine::state::{AgentState, MessageUpdate, StateUpdate, TodoItem};
use crate::engine::tool::ToolContext;
use crate::engine::tool_registry::DELEGATE_TOOL_NAME;
use crate::engine::EngineDeps;
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

pub const ASK_HUMAN_TOOL: &str = "ask_human";
pub const COMPACT_CONTEXT_TOOL: &str = "compact_context";
pub const TODO_WRITE_TOOL: &str = "todo_write";

/// Cancellation text for a rejected tool call, bound to its `call_id`.
pub fn rejection_text(reason: &str) -> String {
    format!("❌ 操作已取消: {}", reason)
}

#[derive(Debug, Deserialize)]
struct AskHumanArgs {
    question: String,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default = "default_required")]
    required: bool,
}

fn default_required() -> bool {
    true
}

pub fn build_dispatcher_node(deps: Arc<EngineDeps>) -> NodeFn {
    Arc::new(move |state: AgentState| {
        let deps = deps.clone();
        Box::pin(async move { run_dispatcher(deps, state).await })
    })
}

async fn run_dispatcher(deps: Arc<EngineDeps>, mut state: AgentState) -> Result<NodeResult> {
    let calls: Vec<ToolCall> = state
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m, Message::Assistant { .. }))
        .map(|m| m.tool_calls().to_vec())
        .unwrap_or_default();

    let mut resume_value = state.resume_value.take();
    let mut new_messages: Vec<Message> = Vec::new();
    let mut todos_update: Option<Vec<TodoItem>> = None;
    let mut request_compression = false;
    let mut current_todos = state.todos.clone();

    for call in calls {
        let answered_now = new_messages.iter().any(|m| {
            matches!(m, Message::ToolResult { call_id, .. } if call_id == &call.id)
        });
        if answered_now || state.has_result_for(&call.id) {
            continue;
        }

        // `ask_human` never executes; it suspends for the hosting UI.
        if call.name == ASK_HUMAN_TOOL {
            match handle_ask_human(&call, resume_value.take()) {
                AskOutcome::Result(msg) => {
                    new_messages.push(msg);
                    continue;
                }
                AskOutcome::Suspend(payload) => {
                    return Ok(NodeResult::Interrupt {
                        update: StateUpdate {
                            messages: MessageUpdate::Append(new_messages),
                            todos: todos_update,
                            ..Default::default()
                        },
                        payload,
                    });
                }
            }
        }

        let decision = deps.approvals.check(&call.name, &call.args);
        if decision.needs_approval {
            match resume_value.take() {
                Some(JsonValue::String(s)) if s == "approve" => {
                    info!("Tool call approved by user: {}", call.name);
                }
                Some(_) => {
                    // "reject", null, or anything else cancels this call.
                    new_messages.push(Message::tool_result(
                        &call.id,
                        &call.name,
                        ToolPayload::Text(rejection_text(&decision.reason)),
                    ));
                    continue;
                }
                None => {
                    return Ok(NodeResult::Interrupt {
                        update: StateUpdate {
                            messages: MessageUpdate::Append(new_messages),
                            todos: todos_update,
                            ..Default::default()
                        },
                        payload: approval_payload(&call, &decision),
                    });
                }
            }
        }

        let result = execute_call(&deps, &state, &call, &current_todos).await;
        match &result {
            Message::ToolResult {
                name,
                content,
                is_error: false,
                ..
            } => {
                if name == TODO_WRITE_TOOL {
                    if let Some(todos) = parse_todo_payload(content) {
                        current_todos = todos.clone();
                        todos_update = Some(todos);
                    }
                }
                if name == COMPACT_CONTEXT_TOOL {
                    request_compression = true;
                }
            }
            _ => {}
        }
        new_messages.push(result);
    }

    Ok(NodeResult::Update(StateUpdate {
        messages: MessageUpdate::Append(new_messages),
        todos: todos_update,
        needs_compression: if request_compression { Some(true) } else { None },
        ..Default::default()
    }))
}

enum AskOutcome {
    Result(Message),
    Suspend(InterruptPayload),
}

fn handle_ask_human(call: &ToolCall, resume: Option<JsonValue>) -> AskOutcome {
    let args: AskHumanArgs = match serde_json::from_value(call.args.clone()) {
        Ok(args) => args,
        Err(e) => {
            return AskOutcome::Result(Message::tool_error(
                &call.id,
                ASK_HUMAN_TOOL,
                format!("invalid ask_human arguments: {}", e),
            ));
        }
    };

    match resume {
        None => AskOutcome::Suspend(InterruptPayload::UserInputRequest {
            question: args.question,
            context: args.context,
            default: args.default,
            required: args.required,
        }),
        // Resuming with null aborts the question.
        Some(JsonValue::Null) => AskOutcome::Result(Message::tool_error(
            &call.id,
            ASK_HUMAN_TOOL,
            "user cancelled the question",
        )),
        Some(value) => {
            let answer = match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            };
            if answer.is_empty() {
                if let Some(default) = args.default {
                    return AskOutcome::Result(Message::tool_result(
                        &call.id,
                        ASK_HUMAN_TOOL,
                        ToolPayload::Text(default),
                    ));
                }
                if args.required {
                    // Empty answer to a required question: ask again.
                    return AskOutcome::Suspend(InterruptPayload::UserInputRequest {
                        question: args.question,
                        context: args.context,
                        default: None,
                        required: true,
                    });
                }
            }
            AskOutcome::Result(Message::tool_result(
                &call.id,
                ASK_HUMAN_TOOL,
                ToolPayload::Text(answer),
            ))
        }
    }
}

fn approval_payload(call: &ToolCall, decision: &Decision) -> InterruptPayload {
    InterruptPayload::ToolApproval {
        tool: call.name.clone(),
        args: call.args.clone(),
        reason: decision.reason.clone(),
        risk_level: decision.risk_level.clone(),
    }
}

async fn execute_call(
    deps: &EngineDeps,
    state: &AgentState,
    call: &ToolCall,
    todos: &[TodoItem],
) -> Message {
    // Catalog filtering already hides delegation from subagents; this is the
    // structural backstop for a model that calls it anyway.
    if state.is_subagent() && call.name == DELEGATE_TOOL_NAME {
        return Message::tool_error(
            &call.id,
            &call.name,
            "delegation is not available inside a delegated task",
        );
    }

    let tool = {
        let registry = deps.registry.read().expect("tool registry lock poisoned");
        registry.get(&call.name)
    };
    let Some(tool) = tool else {
        return Message::tool_error(&call.id, &call.name, format!("unknown tool: {}", call.name));
    };

    let ctx = ToolContext {
        workspace_path: state.workspace_path.clone(),
        session_id: state.thread_id.clone(),
        context_id: state.context_id.clone(),
        todos: todos.to_vec(),
    };

    info!("Executing tool: {}", call.name);
    match tool.run(call.args.clone(), &ctx).await {
        Ok(payload) => Message::tool_result(&call.id, &call.name, payload),
        Err(e) => {
            warn!("Tool {} failed: {}", call.name, e);
            Message::tool_error(&call.id, &call.name, e.to_string())
        }
    }
}

fn parse_todo_payload(content: &ToolPayload) -> Option<Vec<TodoItem>> {
    let value = match content {
        ToolPayload::Json(v) => v.clone(),
        ToolPayload::Text(s) => serde_json::from_str(s).ok()?,
    };
    if value.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        return None;
    }
    serde_json::from_value(value.get("todos")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::engine::approval::ApprovalEngine;
    use crate::engine::context::{Compressor, TokenTracker};
    use crate::engine::message::FinishReason;
    use crate::engine::tool::Tool;
    use crate::engine::tool_registry::ToolRegistry;
    use crate::prompts::PromptStore;
    use crate::provider::testing::FakeProvider;
    use crate::provider::ModelRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::RwLock;

    struct NowTool;

    #[async_trait]
    impl Tool for NowTool {
        fn name(&self) -> &str {
            "now"
        }
        fn description(&self) -> &str {
            "current UTC time"
        }
        fn args_schema(&self) -> JsonValue {
            json!({"type": "object"})
        }
        async fn run(&self, _args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
            Ok(ToolPayload::Text("2026-08-01T00:00:00+00:00".into()))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn args_schema(&self) -> JsonValue {
            json!({"type": "object"})
        }
        async fn run(&self, _args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
            anyhow::bail!("boom")
        }
    }

    fn deps() -> Arc<EngineDeps> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NowTool));
        registry.register(Arc::new(FailTool));
        Arc::new(EngineDeps {
            registry: Arc::new(RwLock::new(registry)),
            approvals: Arc::new(ApprovalEngine::new(Default::default())),
            models: Arc::new(ModelRegistry::single(Arc::new(FakeProvider::new()))),
            tracker: Arc::new(TokenTracker::new(ContextConfig::default())),
            compressor: Arc::new(Compressor::new(ContextConfig::default())),
            prompts: Arc::new(PromptStore::load(None)),
        })
    }

    fn state_with_calls(calls: Vec<ToolCall>) -> AgentState {
        let mut state = AgentState::new("t", 100);
        state.messages.push(Message::user_text("go"));
        state.messages.push(Message::assistant_with_calls(
            "",
            calls,
            FinishReason::ToolCalls,
        ));
        state
    }

    fn call(id: &str, name: &str, args: JsonValue) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn test_dispatch_executes_in_emission_order() {
        let state = state_with_calls(vec![
            call("c1", "now", json!({})),
            call("c2", "now", json!({})),
        ]);
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state.clone())
            .await
            .unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        let ids: Vec<&str> = messages
            .iter()
            .map(|m| match m {
                Message::ToolResult { call_id, .. } => call_id.as_str(),
                _ => panic!("expected tool results"),
            })
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_result() {
        let state = state_with_calls(vec![call("c1", "explode", json!({}))]);
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        let Message::ToolResult {
            is_error, content, ..
        } = &messages[0]
        else {
            panic!("expected tool result");
        };
        assert!(*is_error);
        assert!(content.render().contains("boom"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let state = state_with_calls(vec![call("c1", "ghost", json!({}))]);
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        assert!(messages[0].text().contains("unknown tool: ghost"));
    }

    #[tokio::test]
    async fn test_risky_call_suspends_with_approval_payload() {
        let state = state_with_calls(vec![call(
            "c1",
            "run_command",
            json!({"command": "rm -rf /tmp/old"}),
        )]);
        let result = build_dispatcher_node(deps())(state).await.unwrap();
        let NodeResult::Interrupt { payload, .. } = result else {
            panic!("expected interrupt");
        };
        let InterruptPayload::ToolApproval {
            tool,
            reason,
            risk_level,
            ..
        } = payload
        else {
            panic!("expected tool_approval payload");
        };
        assert_eq!(tool, "run_command");
        assert_eq!(risk_level, "high");
        assert_eq!(reason, "detected high-risk rm -rf");
    }

    #[tokio::test]
    async fn test_reject_resume_produces_cancellation_result() {
        let mut state = state_with_calls(vec![call(
            "c1",
            "run_command",
            json!({"command": "rm -rf /tmp/old"}),
        )]);
        state.resume_value = Some(json!("reject"));
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        let Message::ToolResult {
            call_id, content, ..
        } = &messages[0]
        else {
            panic!("expected tool result");
        };
        assert_eq!(call_id, "c1");
        assert_eq!(
            content.render(),
            "❌ 操作已取消: detected high-risk rm -rf"
        );
    }

    #[tokio::test]
    async fn test_approve_resume_executes_the_call() {
        let mut state = state_with_calls(vec![call("c1", "now", json!({}))]);
        // Force approval via a custom checker on an otherwise-safe tool.
        let deps = deps();
        let mut approvals = ApprovalEngine::new(Default::default());
        approvals.register_checker("now", |_args| {
            Decision::require("always confirm the clock", "low")
        });
        let deps = Arc::new(EngineDeps {
            approvals: Arc::new(approvals),
            registry: deps.registry.clone(),
            models: deps.models.clone(),
            tracker: Arc::new(TokenTracker::new(ContextConfig::default())),
            compressor: Arc::new(Compressor::new(ContextConfig::default())),
            prompts: Arc::new(PromptStore::load(None)),
        });

        state.resume_value = Some(json!("approve"));
        let NodeResult::Update(update) = build_dispatcher_node(deps)(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        let Message::ToolResult { is_error, .. } = &messages[0] else {
            panic!("expected tool result");
        };
        assert!(!*is_error);
    }

    #[tokio::test]
    async fn test_ask_human_suspends_and_resumes() {
        let state = state_with_calls(vec![call(
            "c1",
            ASK_HUMAN_TOOL,
            json!({"question": "which city?"}),
        )]);
        let result = build_dispatcher_node(deps())(state.clone()).await.unwrap();
        let NodeResult::Interrupt { payload, .. } = result else {
            panic!("expected interrupt");
        };
        assert_eq!(
            payload,
            InterruptPayload::UserInputRequest {
                question: "which city?".into(),
                context: None,
                default: None,
                required: true,
            }
        );

        let mut resumed = state;
        resumed.resume_value = Some(json!("Berlin"));
        let NodeResult::Update(update) = build_dispatcher_node(deps())(resumed).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        assert_eq!(messages[0].text(), "[ask_human] Berlin");
    }

    #[tokio::test]
    async fn test_ask_human_null_resume_aborts() {
        let mut state = state_with_calls(vec![call(
            "c1",
            ASK_HUMAN_TOOL,
            json!({"question": "proceed?"}),
        )]);
        state.resume_value = Some(JsonValue::Null);
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        let Message::ToolResult { is_error, .. } = &messages[0] else {
            panic!("expected tool result");
        };
        assert!(*is_error);
    }

    #[tokio::test]
    async fn test_ask_human_empty_answer_uses_default() {
        let mut state = state_with_calls(vec![call(
            "c1",
            ASK_HUMAN_TOOL,
            json!({"question": "city?", "default": "Oslo"}),
        )]);
        state.resume_value = Some(json!(""));
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        assert_eq!(messages[0].text(), "[ask_human] Oslo");
    }

    #[tokio::test]
    async fn test_resume_skips_already_answered_calls() {
        // First call already has a result (from the pre-interrupt partial
        // update); the resume value belongs to the second call.
        let mut state = AgentState::new("t", 100);
        state.messages.push(Message::assistant_with_calls(
            "",
            vec![
                call("c1", "now", json!({})),
                call("c2", ASK_HUMAN_TOOL, json!({"question": "ok?"})),
            ],
            FinishReason::ToolCalls,
        ));
        state.messages.push(Message::tool_result(
            "c1",
            "now",
            ToolPayload::Text("t".into()),
        ));
        state.resume_value = Some(json!("yes"));
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "[ask_human] yes");
    }

    #[tokio::test]
    async fn test_subagent_delegation_blocked() {
        let mut state = AgentState::subagent("task", "main", None, 10);
        state.messages.push(Message::assistant_with_calls(
            "",
            vec![call("c1", DELEGATE_TOOL_NAME, json!({"task": "recurse"}))],
            FinishReason::ToolCalls,
        ));
        let NodeResult::Update(update) = build_dispatcher_node(deps())(state).await.unwrap()
        else {
            panic!("expected update");
        };
        let MessageUpdate::Append(messages) = update.messages else {
            panic!("expected append");
        };
        assert!(messages[0].text().contains("not available"));
    }
}
