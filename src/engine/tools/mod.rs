//! Builtin tools shipped with the runtime.

mod ask_human;
mod compact;
mod delegate;
mod files;
mod report;
mod shell;
mod time;
mod todo;
mod web;

pub use ask_human::AskHumanTool;
pub use compact::CompactContextTool;
pub use delegate::{DelegateTaskTool, Delegator};
pub use files::{ListFilesTool, ReadFileTool, WriteFileTool};
pub use report::DoneAndReportTool;
pub use shell::RunCommandTool;
pub use time::NowTool;
pub use todo::{TodoReadTool, TodoWriteTool};
pub use web::HttpFetchTool;

use crate::engine::tool_registry::{ToolMeta, ToolRegistry, DELEGATE_TOOL_NAME};
use std::sync::Arc;

/// Register every builtin as discovered + enabled, with default governance
/// metadata. The tools config may override the metadata afterwards.
pub fn register_builtins(registry: &mut ToolRegistry, delegator: Arc<Delegator>) {
    registry.register(Arc::new(NowTool));
    registry.register(Arc::new(TodoReadTool));
    registry.register(Arc::new(TodoWriteTool));
    registry.register(Arc::new(AskHumanTool));
    registry.register(Arc::new(CompactContextTool));
    registry.register(Arc::new(DoneAndReportTool));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(RunCommandTool));
    registry.register(Arc::new(HttpFetchTool::new()));
    registry.register(Arc::new(DelegateTaskTool::new(delegator)));

    for (name, risk, available_to_subagent) in [
        ("now", "low", true),
        ("todo_read", "low", true),
        ("todo_write", "low", true),
        ("ask_human", "low", false),
        ("compact_context", "low", true),
        ("done_and_report", "low", false),
        ("read_file", "low", true),
        ("write_file", "medium", true),
        ("list_files", "low", true),
        ("run_command", "high", true),
        ("http_fetch", "medium", true),
        (DELEGATE_TOOL_NAME, "low", false),
    ] {
        registry.register_meta(ToolMeta {
            name: name.to_string(),
            risk: risk.to_string(),
            tags: Vec::new(),
            available_to_subagent,
        });
    }
}
