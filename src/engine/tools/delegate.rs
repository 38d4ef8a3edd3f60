//! Subagent delegation: run an isolated child agent loop for a
//! self-contained task and return a summary.
//!
//! The child gets a fresh [`AgentState`] sharing only the parent's
//! workspace path, and runs the same graph the host runs; the registry
//! filters this tool out of subagent catalogs, so children cannot delegate
//! further. Children are non-interactive: any interrupt they raise is
//! resumed with `null`, which aborts the interrupting call and lets the
//! child continue.

use crate::engine::graph::{Graph, RunOutcome};
use crate::engine::message::{Message, ToolPayload};
use crate::engine::state::AgentState;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// A child reply shorter than this triggers the one-shot continuation
/// prompt asking for a comprehensive summary.
const MIN_SUMMARY_CHARS: usize = 200;

/// Runs child graphs. Holds the compiled application graph, which is built
/// after the tool registry (and therefore after this delegator) exists, so
/// the graph is attached once at startup.
pub struct Delegator {
    graph: OnceLock<Arc<Graph>>,
    default_max_loops: usize,
}

impl Delegator {
    pub fn new(default_max_loops: usize) -> Self {
        Self {
            graph: OnceLock::new(),
            default_max_loops,
        }
    }

    /// Attach the compiled graph. Called once during application build.
    pub fn attach_graph(&self, graph: Arc<Graph>) {
        let _ = self.graph.set(graph);
    }

    pub fn default_max_loops(&self) -> usize {
        self.default_max_loops
    }

    /// Execute a delegated task to completion and return its summary state.
    pub async fn delegate(
        &self,
        task: &str,
        max_loops: usize,
        parent_context: &str,
        workspace_path: Option<PathBuf>,
    ) -> Result<AgentState> {
        let graph = self
            .graph
            .get()
            .ok_or_else(|| anyhow::anyhow!("delegation runtime not initialized"))?;

        let state = AgentState::subagent(task, parent_context, workspace_path, max_loops);
        info!(
            "Delegating task to {} (max_loops={}): {:.120}",
            state.context_id, max_loops, task
        );

        let mut state = self.run_to_completion(graph, state).await?;

        // Continuation policy: a terse final reply gets exactly one chance
        // to become a real summary.
        if last_assistant_text(&state).chars().count() < MIN_SUMMARY_CHARS {
            info!(
                "Subagent {} replied too briefly, requesting a full summary",
                state.context_id
            );
            let continuation = crate::prompts::PromptStore::embedded()
                .text(crate::prompts::PromptKey::SubagentContinuation)
                .trim()
                .to_string();
            state.messages.push(Message::user_text(continuation));
            state = self.run_to_completion(graph, state).await?;
        }

        Ok(state)
    }

    /// Drive the child graph to END, aborting any interactive suspension.
    async fn run_to_completion(&self, graph: &Arc<Graph>, state: AgentState) -> Result<AgentState> {
        let mut outcome = graph.run(state, None).await?;
        loop {
            match outcome {
                RunOutcome::Finished(state) => return Ok(state),
                RunOutcome::Interrupted { state, payload } => {
                    warn!(
                        "Subagent {} raised an interrupt ({:?}); aborting that call",
                        state.context_id, payload
                    );
                    outcome = graph.resume(state, JsonValue::Null, None).await?;
                }
            }
        }
    }
}

fn last_assistant_text(state: &AgentState) -> String {
    state
        .messages
        .iter()
        .rev()
        .find_map(|m| match m {
            Message::Assistant { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    task: String,
    #[serde(default)]
    max_loops: Option<usize>,
}

pub struct DelegateTaskTool {
    delegator: Arc<Delegator>,
}

impl DelegateTaskTool {
    pub fn new(delegator: Arc<Delegator>) -> Self {
        Self { delegator }
    }
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        crate::engine::tool_registry::DELEGATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Launch an isolated agent for a self-contained multi-step task \
         (research, broad searches, multi-file analysis). Provide a detailed, \
         self-contained task description and say what the final response must \
         contain; the result is not shown to the user, so summarize it."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "Detailed self-contained task: what to do and what to return"},
                "max_loops": {"type": "integer", "description": "Plan-act cycle budget for the child (default 50)"}
            },
            "required": ["task"]
        })
    }

    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        let args: DelegateArgs = serde_json::from_value(args)?;
        let max_loops = args
            .max_loops
            .unwrap_or_else(|| self.delegator.default_max_loops());

        match self
            .delegator
            .delegate(
                &args.task,
                max_loops,
                &ctx.context_id,
                ctx.workspace_path.clone(),
            )
            .await
        {
            Ok(state) => Ok(ToolPayload::Json(json!({
                "ok": true,
                "result": last_assistant_text(&state),
                "context_id": state.context_id,
                "loops": state.loops,
            }))),
            // Failures go back to the model as data, not as a crash.
            Err(e) => Ok(ToolPayload::Json(json!({
                "ok": false,
                "error": format!("delegated agent execution failed: {}", e),
            }))),
        }
    }
}
