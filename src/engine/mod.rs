//! Agent engine: the graph runtime, its nodes, and everything they share.

pub mod approval;
pub mod context;
pub mod dispatcher;
pub mod graph;
pub mod mentions;
pub mod message;
pub mod planner;
pub mod routing;
pub mod state;
pub mod tool;
pub mod tool_registry;
pub mod tools;

use crate::engine::approval::ApprovalEngine;
use crate::engine::context::{Compressor, TokenTracker};
use crate::engine::dispatcher::build_dispatcher_node;
use crate::engine::graph::{
    Checkpointer, Graph, GraphBuilder, NodeFn, NodeResult, COMPRESSOR_NODE, DISPATCHER_NODE,
    PLANNER_NODE,
};
use crate::engine::planner::build_planner_node;
use crate::engine::routing::{route_dispatcher, route_planner};
use crate::engine::state::{AgentState, MessageUpdate, StateUpdate};
use crate::engine::tool_registry::ToolRegistry;
use crate::prompts::{PromptKey, PromptStore};
use crate::provider::ModelRegistry;
use anyhow::Result;
use std::sync::{Arc, RwLock};

/// Shared dependencies every node closes over. The registry and approval
/// engine are the two process-wide items; both are effectively immutable
/// after startup (registry promotions are append-only).
pub struct EngineDeps {
    pub registry: Arc<RwLock<ToolRegistry>>,
    pub approvals: Arc<ApprovalEngine>,
    pub models: Arc<ModelRegistry>,
    pub tracker: Arc<TokenTracker>,
    pub compressor: Arc<Compressor>,
    pub prompts: Arc<PromptStore>,
}

/// Compression node: summarizes (or, on failure, truncates) the history,
/// swaps it wholesale, and resets the token accumulators.
pub fn build_compressor_node(deps: Arc<EngineDeps>) -> NodeFn {
    Arc::new(move |state: AgentState| {
        let deps = deps.clone();
        Box::pin(async move {
            let provider = deps.models.base();
            let status = deps.tracker.status(
                state.cumulative_prompt_tokens,
                provider.context_window(),
                state.compact_count,
                state.last_compression_ratio,
            );
            let outcome = deps
                .compressor
                .compress(&state.messages, status.strategy, provider, &deps.prompts)
                .await;
            Ok(NodeResult::Update(StateUpdate {
                messages: MessageUpdate::Replace(outcome.messages.clone()),
                reset_token_counters: true,
                needs_compression: Some(false),
                auto_compressed_this_request: Some(true),
                compact_count_increment: 1,
                last_compression_ratio: Some(outcome.ratio),
                ..Default::default()
            }))
        })
    })
}

/// Assemble the host agent graph:
///
/// ```text
/// START → planner --{route_planner}→ {compressor, dispatcher, END}
/// compressor → planner
/// dispatcher --{route_dispatcher}→ {planner, END}
/// ```
///
/// `checkpointer`, when given, persists state after every node transition.
pub fn build_host_graph(
    deps: Arc<EngineDeps>,
    checkpointer: Option<Checkpointer>,
) -> Result<Arc<Graph>> {
    let budget_text = deps.prompts.text(PromptKey::BudgetExhausted).trim().to_string();
    let mut builder = GraphBuilder::new()
        .entry(PLANNER_NODE)
        .add_node(PLANNER_NODE, build_planner_node(deps.clone()))
        .add_node(DISPATCHER_NODE, build_dispatcher_node(deps.clone()))
        .add_node(COMPRESSOR_NODE, build_compressor_node(deps))
        .add_router(PLANNER_NODE, Arc::new(route_planner))
        .add_router(DISPATCHER_NODE, Arc::new(route_dispatcher))
        .add_edge(COMPRESSOR_NODE, PLANNER_NODE)
        .budget_message(&budget_text);
    if let Some(checkpointer) = checkpointer {
        builder = builder.checkpointer(checkpointer);
    }
    Ok(Arc::new(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::engine::graph::{InterruptPayload, RunOutcome};
    use crate::engine::message::{FinishReason, Message, ToolCall};
    use crate::engine::tools::{register_builtins, Delegator};
    use crate::provider::testing::FakeProvider;
    use crate::provider::{AssistantTurn, TokenUsage};
    use serde_json::json;

    fn scripted_app(provider: Arc<FakeProvider>) -> (Arc<Graph>, Arc<EngineDeps>) {
        let delegator = Arc::new(Delegator::new(50));
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, delegator.clone());
        let deps = Arc::new(EngineDeps {
            registry: Arc::new(RwLock::new(registry)),
            approvals: Arc::new(ApprovalEngine::new(Default::default())),
            models: Arc::new(ModelRegistry::single(provider)),
            tracker: Arc::new(TokenTracker::new(ContextConfig::default())),
            compressor: Arc::new(Compressor::new(ContextConfig::default())),
            prompts: Arc::new(PromptStore::load(None)),
        });
        let graph = build_host_graph(deps.clone(), None).unwrap();
        delegator.attach_graph(graph.clone());
        (graph, deps)
    }

    fn tool_turn(id: &str, name: &str, args: serde_json::Value, tokens: usize) -> AssistantTurn {
        AssistantTurn {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                args,
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: Some(TokenUsage {
                input_tokens: tokens,
                output_tokens: 10,
            }),
            ..Default::default()
        }
    }

    fn text_turn(content: &str, tokens: usize) -> AssistantTurn {
        AssistantTurn {
            content: content.into(),
            usage: Some(TokenUsage {
                input_tokens: tokens,
                output_tokens: 10,
            }),
            ..Default::default()
        }
    }

    // Simple tool use: one tool call, then a natural-language answer.
    #[tokio::test]
    async fn test_scenario_simple_tool_use() {
        let provider = Arc::new(FakeProvider::new());
        provider.push_turn(tool_turn("c1", "now", json!({}), 300));
        provider.push_turn(text_turn("It is just past midnight UTC.", 350));
        let (graph, _deps) = scripted_app(provider.clone());

        let mut state = AgentState::new("s1", 100);
        state.messages.push(Message::user_text("what time is it?"));
        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };

        assert_eq!(state.loops, 2);
        // user, assistant+call, tool result, assistant answer
        assert_eq!(state.messages.len(), 4);
        let Message::ToolResult { content, .. } = &state.messages[2] else {
            panic!("expected tool result");
        };
        // ISO-8601 UTC timestamp from the builtin clock tool.
        assert!(content.render().contains('T'));
        assert!(content.render().contains("+00:00"));
        assert_eq!(state.messages[3].text(), "It is just past midnight UTC.");
    }

    // Approval interrupt: rm -rf triggers the builtin high-risk rule;
    // rejecting yields a cancellation result and the loop continues.
    #[tokio::test]
    async fn test_scenario_approval_reject() {
        let provider = Arc::new(FakeProvider::new());
        provider.push_turn(tool_turn(
            "c1",
            "run_command",
            json!({"command": "rm -rf /tmp/old"}),
            400,
        ));
        provider.push_turn(text_turn("I did not run the destructive command.", 450));
        let (graph, _deps) = scripted_app(provider);

        let mut state = AgentState::new("s3", 100);
        state
            .messages
            .push(Message::user_text("run `rm -rf /tmp/old`"));
        let outcome = graph.run(state, None).await.unwrap();
        let RunOutcome::Interrupted { state, payload } = outcome else {
            panic!("expected approval interrupt");
        };
        let InterruptPayload::ToolApproval {
            risk_level, reason, ..
        } = &payload
        else {
            panic!("expected tool_approval payload");
        };
        assert_eq!(risk_level, "high");
        assert_eq!(reason, "detected high-risk rm -rf");

        let RunOutcome::Finished(state) =
            graph.resume(state, json!("reject"), None).await.unwrap()
        else {
            panic!("expected finished run after reject");
        };
        let cancellation = state
            .messages
            .iter()
            .find_map(|m| match m {
                Message::ToolResult { content, .. } => Some(content.render()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cancellation, "❌ 操作已取消: detected high-risk rm -rf");
        assert_eq!(
            state.messages.last().unwrap().text(),
            "I did not run the destructive command."
        );
    }

    // Critical usage forces one compression, and only one, per turn.
    #[tokio::test]
    async fn test_scenario_critical_compression_once() {
        let provider = Arc::new(FakeProvider::new());
        // Planner pass pushing usage over 0.95 of a 128k window.
        provider.push_turn(text_turn("still working through the backlog", 123_000));
        // Summarizer reply consumed by the compressor.
        provider.push_text("digest: looked up the clock repeatedly");
        // Post-compression planner pass, again with critical usage, must NOT
        // re-enter the compressor in the same request.
        provider.push_turn(text_turn("done after compression", 123_500));
        let (graph, _deps) = scripted_app(provider.clone());

        let mut state = AgentState::new("s4", 100);
        // Bulky history so the 15%-of-window recent tail leaves an old
        // partition for the summarizer.
        let filler = "lorem ".repeat(700);
        for i in 0..30 {
            state
                .messages
                .push(Message::user_text(format!("question {}: {}", i, filler)));
            state
                .messages
                .push(Message::assistant(format!("answer {}: {}", i, filler)));
        }
        state.messages.push(Message::user_text("and now?"));
        let before_len = state.messages.len();

        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };

        assert_eq!(state.compact_count, 1);
        assert!(state.auto_compressed_this_request);
        assert!(state.messages.len() < before_len);
        // Counters were reset at compression, then fed by the final pass.
        assert_eq!(state.cumulative_prompt_tokens, 123_500);
        assert_eq!(state.messages.last().unwrap().text(), "done after compression");
        assert!(state
            .messages
            .iter()
            .any(|m| m.text().contains("digest: looked up the clock")));
    }

    // Summarizer failure degrades to truncation; the loop survives.
    #[tokio::test]
    async fn test_scenario_truncation_fallback() {
        let provider = Arc::new(FakeProvider::new());
        provider.push_turn(text_turn("gathering more context", 123_000));
        provider.push_failure("summarizer unavailable");
        provider.push_turn(text_turn("recovered fine", 500));
        let (graph, _deps) = scripted_app(provider);

        let mut state = AgentState::new("s6", 100);
        let filler = "data ".repeat(250);
        for i in 0..120 {
            state
                .messages
                .push(Message::user_text(format!("filler {}: {}", i, filler)));
            state
                .messages
                .push(Message::assistant(format!("reply {}: {}", i, filler)));
        }
        state.messages.push(Message::user_text("continue"));

        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };
        assert_eq!(state.messages.last().unwrap().text(), "recovered fine");
        assert!(state.auto_compressed_this_request);
        // No assistant with unanswered calls survived the boundary.
        let answered: Vec<&str> = state
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        for msg in &state.messages {
            for call in msg.tool_calls() {
                assert!(answered.contains(&call.id.as_str()));
            }
        }
    }

    // The loop ceiling ends the run with a synthetic message.
    #[tokio::test]
    async fn test_loop_budget_exhaustion() {
        let provider = Arc::new(FakeProvider::new());
        for i in 0..5 {
            provider.push_turn(tool_turn(&format!("c{}", i), "now", json!({}), 100));
        }
        let (graph, _deps) = scripted_app(provider);

        let mut state = AgentState::new("budget", 2);
        state.messages.push(Message::user_text("loop forever"));
        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };
        assert_eq!(state.loops, 2);
        assert!(state
            .messages
            .last()
            .unwrap()
            .text()
            .contains("Loop budget exhausted"));
    }

    // Snapshot streaming: observers see planner/dispatcher steps in order.
    #[tokio::test]
    async fn test_snapshot_stream_order() {
        let provider = Arc::new(FakeProvider::new());
        provider.push_turn(tool_turn("c1", "now", json!({}), 100));
        provider.push_turn(text_turn("done", 120));
        let (graph, _deps) = scripted_app(provider);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut state = AgentState::new("snap", 100);
        state.messages.push(Message::user_text("time?"));
        graph.run(state, Some(&tx)).await.unwrap();
        drop(tx);

        let mut nodes = Vec::new();
        while let Some(snapshot) = rx.recv().await {
            nodes.push(snapshot.node);
        }
        assert_eq!(nodes, vec!["planner", "dispatcher", "planner"]);
    }
}
