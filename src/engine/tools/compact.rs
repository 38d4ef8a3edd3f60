use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

/// Request a context compression ahead of the forced threshold.
///
/// The dispatcher recognizes a successful call and raises the session's
/// compression flag; the router then detours through the compressor before
/// the next planner pass.
pub struct CompactContextTool;

#[async_trait]
impl Tool for CompactContextTool {
    fn name(&self) -> &str {
        "compact_context"
    }

    fn description(&self) -> &str {
        "Compress older conversation history to free context-window space. \
         Call this when the token-usage reminder suggests it."
    }

    fn args_schema(&self) -> JsonValue {
        json!({"type": "object", "properties": {}})
    }

    async fn run(&self, _args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
        Ok(ToolPayload::Json(json!({
            "ok": true,
            "action": "request_compression",
        })))
    }
}
