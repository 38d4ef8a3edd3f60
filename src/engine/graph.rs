//! Graph runtime: executes a directed graph of named nodes against
//! [`AgentState`].
//!
//! Nodes are values of a shared function type, not a class hierarchy; each
//! is a closure over its dependencies and returns either a state update or
//! an interrupt. Edges are a static table plus conditional routers. The
//! runtime applies updates, emits `(node, state)` snapshots in execution
//! order, enforces the loop and recursion budgets, and suspends/resumes
//! cooperatively at interrupts.

use crate::engine::message::Message;
use crate::engine::state::{AgentState, StateUpdate};
use anyhow::Result;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const PLANNER_NODE: &str = "planner";
pub const DISPATCHER_NODE: &str = "dispatcher";
pub const COMPRESSOR_NODE: &str = "compressor";

/// Structured suspension payload handed to the hosting UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterruptPayload {
    UserInputRequest {
        question: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        default: Option<String>,
        required: bool,
    },
    ToolApproval {
        tool: String,
        args: JsonValue,
        reason: String,
        risk_level: String,
    },
}

/// What a node hands back to the runtime: either a plain update, or an
/// update made so far plus a suspension payload. Interrupts are data, not
/// exceptions.
pub enum NodeResult {
    Update(StateUpdate),
    Interrupt {
        update: StateUpdate,
        payload: InterruptPayload,
    },
}

pub type NodeFn =
    Arc<dyn Fn(AgentState) -> BoxFuture<'static, Result<NodeResult>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Node(String),
    End,
}

pub type RouterFn = Arc<dyn Fn(&AgentState) -> Route + Send + Sync>;

/// Persistence hook invoked after every applied node update. Failures are
/// the hook's own concern; the runtime never blocks on them.
pub type Checkpointer = Arc<dyn Fn(&AgentState) + Send + Sync>;

/// One observable step: the node that just ran and the state after its
/// update was applied. Observers diff consecutive snapshots by message id.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub node: String,
    pub state: AgentState,
}

pub type SnapshotSender = mpsc::UnboundedSender<Snapshot>;

pub enum RunOutcome {
    Finished(AgentState),
    Interrupted {
        state: AgentState,
        payload: InterruptPayload,
    },
}

pub struct Graph {
    entry: String,
    nodes: HashMap<String, NodeFn>,
    static_edges: HashMap<String, String>,
    routers: HashMap<String, RouterFn>,
    checkpointer: Option<Checkpointer>,
    /// Text of the synthetic assistant message appended on budget ceilings.
    budget_message: String,
}

pub struct GraphBuilder {
    entry: Option<String>,
    nodes: HashMap<String, NodeFn>,
    static_edges: HashMap<String, String>,
    routers: HashMap<String, RouterFn>,
    checkpointer: Option<Checkpointer>,
    budget_message: String,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            entry: None,
            nodes: HashMap::new(),
            static_edges: HashMap::new(),
            routers: HashMap::new(),
            checkpointer: None,
            budget_message: "Loop budget exhausted.".to_string(),
        }
    }

    pub fn entry(mut self, name: &str) -> Self {
        self.entry = Some(name.to_string());
        self
    }

    pub fn add_node(mut self, name: &str, node: NodeFn) -> Self {
        self.nodes.insert(name.to_string(), node);
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.static_edges.insert(from.to_string(), to.to_string());
        self
    }

    pub fn add_router(mut self, from: &str, router: RouterFn) -> Self {
        self.routers.insert(from.to_string(), router);
        self
    }

    pub fn budget_message(mut self, text: &str) -> Self {
        self.budget_message = text.to_string();
        self
    }

    /// Persist state after every node transition.
    pub fn checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Validate the topology. A misconfigured graph is a programmer error
    /// and the only way the runtime surfaces an error to its caller.
    pub fn build(self) -> Result<Graph> {
        let entry = self
            .entry
            .ok_or_else(|| anyhow::anyhow!("graph has no entry node"))?;
        if !self.nodes.contains_key(&entry) {
            anyhow::bail!("entry node '{}' is not registered", entry);
        }
        for (from, to) in &self.static_edges {
            if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
                anyhow::bail!("edge {} -> {} references an unknown node", from, to);
            }
        }
        Ok(Graph {
            entry,
            nodes: self.nodes,
            static_edges: self.static_edges,
            routers: self.routers,
            checkpointer: self.checkpointer,
            budget_message: self.budget_message,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Execute the graph until END or an interrupt. If the state carries a
    /// pending node (set by a previous interrupt), execution re-enters it.
    pub async fn run(
        &self,
        mut state: AgentState,
        snapshots: Option<&SnapshotSender>,
    ) -> Result<RunOutcome> {
        let mut current = match state.pending_node.take() {
            Some(node) => node,
            None => self.entry.clone(),
        };

        // Safety valve over the semantic loop budget: helper nodes
        // (compressor, dispatcher) also count as steps.
        let recursion_limit = state.max_loops.saturating_mul(3).max(1);
        let mut steps = 0usize;

        loop {
            steps += 1;
            if steps > recursion_limit {
                warn!(
                    "Recursion limit reached ({} steps) for thread {}",
                    recursion_limit, state.thread_id
                );
                state.messages.push(Message::assistant(&self.budget_message));
                self.checkpoint(&state);
                emit(snapshots, &current, &state);
                return Ok(RunOutcome::Finished(state));
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| anyhow::anyhow!("unknown node: {}", current))?;

            let result = node(state.clone()).await?;
            // A resume value is consumed by exactly one node entry; clear it
            // here so a later interrupt can never observe a stale value.
            state.resume_value = None;

            match result {
                NodeResult::Update(update) => {
                    state.apply(update);
                    self.checkpoint(&state);
                    emit(snapshots, &current, &state);

                    let route = if let Some(router) = self.routers.get(&current) {
                        router(&state)
                    } else if let Some(next) = self.static_edges.get(&current) {
                        Route::Node(next.clone())
                    } else {
                        Route::End
                    };

                    match route {
                        Route::Node(next) => current = next,
                        Route::End => {
                            if self.ended_on_budget(&state) {
                                info!(
                                    "Loop budget exhausted ({}/{}) for thread {}",
                                    state.loops, state.max_loops, state.thread_id
                                );
                                state.messages.push(Message::assistant(&self.budget_message));
                                self.checkpoint(&state);
                                emit(snapshots, &current, &state);
                            }
                            return Ok(RunOutcome::Finished(state));
                        }
                    }
                }
                NodeResult::Interrupt { update, payload } => {
                    state.apply(update);
                    state.pending_node = Some(current.clone());
                    self.checkpoint(&state);
                    emit(snapshots, &current, &state);
                    return Ok(RunOutcome::Interrupted { state, payload });
                }
            }
        }
    }

    /// Re-enter a suspended run. `value` becomes the return value of the
    /// interrupting call site; resuming with `null` aborts that call.
    pub async fn resume(
        &self,
        mut state: AgentState,
        value: JsonValue,
        snapshots: Option<&SnapshotSender>,
    ) -> Result<RunOutcome> {
        if state.pending_node.is_none() {
            anyhow::bail!("resume called without a pending interrupt");
        }
        state.resume_value = Some(value);
        self.run(state, snapshots).await
    }

    fn checkpoint(&self, state: &AgentState) {
        if let Some(checkpointer) = &self.checkpointer {
            checkpointer(state);
        }
    }

    /// The loop ceiling ended this run with work still pending: the last
    /// assistant message carries unanswered tool calls (or the tail is a
    /// tool result awaiting another planner pass). A terminal-tool result
    /// is a normal completion even at the ceiling.
    fn ended_on_budget(&self, state: &AgentState) -> bool {
        if state.loops < state.max_loops {
            return false;
        }
        match state.messages.last() {
            Some(Message::Assistant { tool_calls, .. }) => !tool_calls.is_empty(),
            Some(Message::ToolResult { name, .. }) => {
                name != crate::engine::routing::TERMINAL_TOOL
            }
            Some(_) => true,
            None => false,
        }
    }
}

fn emit(snapshots: Option<&SnapshotSender>, node: &str, state: &AgentState) {
    if let Some(tx) = snapshots {
        let _ = tx.send(Snapshot {
            node: node.to_string(),
            state: state.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::MessageUpdate;

    fn append_node(text: &'static str) -> NodeFn {
        Arc::new(move |_state: AgentState| {
            Box::pin(async move {
                Ok(NodeResult::Update(StateUpdate {
                    messages: MessageUpdate::Append(vec![Message::assistant(text)]),
                    loops_increment: 1,
                    ..Default::default()
                }))
            })
        })
    }

    fn interrupt_node() -> NodeFn {
        Arc::new(move |state: AgentState| {
            Box::pin(async move {
                let mut state = state;
                match state.resume_value.take() {
                    Some(value) => Ok(NodeResult::Update(StateUpdate {
                        messages: MessageUpdate::Append(vec![Message::assistant(format!(
                            "resumed with {}",
                            value
                        ))]),
                        ..Default::default()
                    })),
                    None => Ok(NodeResult::Interrupt {
                        update: StateUpdate::default(),
                        payload: InterruptPayload::UserInputRequest {
                            question: "which city?".into(),
                            context: None,
                            default: None,
                            required: true,
                        },
                    }),
                }
            })
        })
    }

    #[tokio::test]
    async fn test_single_node_runs_to_end() {
        let graph = GraphBuilder::new()
            .entry("a")
            .add_node("a", append_node("done"))
            .build()
            .unwrap();
        let state = AgentState::new("t", 10);
        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.loops, 1);
    }

    #[tokio::test]
    async fn test_router_chooses_next_node() {
        let router: RouterFn = Arc::new(|state: &AgentState| {
            if state.messages.len() < 3 {
                Route::Node("a".into())
            } else {
                Route::End
            }
        });
        let graph = GraphBuilder::new()
            .entry("a")
            .add_node("a", append_node("step"))
            .add_router("a", router)
            .build()
            .unwrap();
        let state = AgentState::new("t", 10);
        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };
        assert_eq!(state.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_snapshots_in_execution_order() {
        let graph = GraphBuilder::new()
            .entry("a")
            .add_node("a", append_node("one"))
            .add_node("b", append_node("two"))
            .add_edge("a", "b")
            .build()
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = AgentState::new("t", 10);
        graph.run(state, Some(&tx)).await.unwrap();
        drop(tx);
        let mut nodes = Vec::new();
        while let Some(snap) = rx.recv().await {
            nodes.push((snap.node, snap.state.messages.len()));
        }
        assert_eq!(nodes, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_interrupt_then_resume_reenters_same_node() {
        let graph = GraphBuilder::new()
            .entry("ask")
            .add_node("ask", interrupt_node())
            .build()
            .unwrap();
        let state = AgentState::new("t", 10);
        let outcome = graph.run(state, None).await.unwrap();
        let RunOutcome::Interrupted { state, payload } = outcome else {
            panic!("expected interrupt");
        };
        assert!(matches!(payload, InterruptPayload::UserInputRequest { .. }));
        assert_eq!(state.pending_node.as_deref(), Some("ask"));

        let outcome = graph
            .resume(state, JsonValue::String("Stockholm".into()), None)
            .await
            .unwrap();
        let RunOutcome::Finished(state) = outcome else {
            panic!("expected finished run after resume");
        };
        assert!(state.messages[0].text().contains("Stockholm"));
        assert!(state.pending_node.is_none());
    }

    #[tokio::test]
    async fn test_resume_without_interrupt_fails() {
        let graph = GraphBuilder::new()
            .entry("a")
            .add_node("a", append_node("x"))
            .build()
            .unwrap();
        let state = AgentState::new("t", 10);
        assert!(graph.resume(state, JsonValue::Null, None).await.is_err());
    }

    #[tokio::test]
    async fn test_recursion_limit_emits_budget_message() {
        // A node that always routes back to itself without incrementing loops.
        let node: NodeFn = Arc::new(|_state| {
            Box::pin(async { Ok(NodeResult::Update(StateUpdate::default())) })
        });
        let router: RouterFn = Arc::new(|_state| Route::Node("spin".into()));
        let graph = GraphBuilder::new()
            .entry("spin")
            .add_node("spin", node)
            .add_router("spin", router)
            .budget_message("budget exhausted")
            .build()
            .unwrap();
        let state = AgentState::new("t", 2); // recursion limit = 6
        let RunOutcome::Finished(state) = graph.run(state, None).await.unwrap() else {
            panic!("expected finished run");
        };
        assert_eq!(state.messages.last().unwrap().text(), "budget exhausted");
    }

    #[tokio::test]
    async fn test_checkpointer_called_per_transition() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let graph = GraphBuilder::new()
            .entry("a")
            .add_node("a", append_node("one"))
            .add_node("b", append_node("two"))
            .add_edge("a", "b")
            .checkpointer(Arc::new(move |_state: &AgentState| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .build()
            .unwrap();
        let state = AgentState::new("t", 10);
        graph.run(state, None).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_build_rejects_bad_topology() {
        assert!(GraphBuilder::new().build().is_err());
        assert!(GraphBuilder::new().entry("missing").build().is_err());
        let err = GraphBuilder::new()
            .entry("a")
            .add_node("a", append_node("x"))
            .add_edge("a", "ghost")
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_interrupt_payload_wire_shape() {
        let payload = InterruptPayload::ToolApproval {
            tool: "run_command".into(),
            args: serde_json::json!({"command": "rm -rf /tmp/old"}),
            reason: "detected high-risk rm -rf".into(),
            risk_level: "high".into(),
        };
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["type"], "tool_approval");
        assert_eq!(wire["risk_level"], "high");
    }
}
