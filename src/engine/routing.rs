//! Conditional routing for the host agent graph.
//!
//! ```text
//! START → planner
//! planner --{route_planner}→ {compressor, dispatcher, END}
//! compressor → planner
//! dispatcher --{route_dispatcher}→ {planner, END}
//! ```

use crate::engine::graph::{Route, COMPRESSOR_NODE, DISPATCHER_NODE, PLANNER_NODE};
use crate::engine::message::Message;
use crate::engine::state::AgentState;
use std::collections::HashSet;

/// Tool whose result ends the run directly (orchestration terminal tool).
pub const TERMINAL_TOOL: &str = "done_and_report";

/// After the planner: budget check, then the compression detour, then tool
/// dispatch, otherwise the turn is complete.
pub fn route_planner(state: &AgentState) -> Route {
    if state.loops >= state.max_loops {
        return Route::End;
    }
    if state.needs_compression && !state.auto_compressed_this_request {
        return Route::Node(COMPRESSOR_NODE.to_string());
    }
    if has_unanswered_tool_calls(state) {
        return Route::Node(DISPATCHER_NODE.to_string());
    }
    Route::End
}

/// After the dispatcher: end if the terminal tool just reported, otherwise
/// feed the results back to the planner.
pub fn route_dispatcher(state: &AgentState) -> Route {
    let last_result_name = state.messages.iter().rev().find_map(|m| match m {
        Message::ToolResult { name, .. } => Some(name.as_str()),
        _ => None,
    });
    if last_result_name == Some(TERMINAL_TOOL) {
        return Route::End;
    }
    Route::Node(PLANNER_NODE.to_string())
}

/// True when the last assistant message still has tool calls without a
/// matching result. The planner may append synthetic error results for
/// malformed calls in the same update, so the check is per call id, not
/// "is the last message an assistant".
fn has_unanswered_tool_calls(state: &AgentState) -> bool {
    let answered: HashSet<&str> = state
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    let last_assistant = state
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m, Message::Assistant { .. }));
    match last_assistant {
        Some(msg) => msg
            .tool_calls()
            .iter()
            .any(|c| !answered.contains(c.id.as_str())),
        None => false,
    }
}
