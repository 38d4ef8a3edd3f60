use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

/// Ask the user a question when required information is missing.
///
/// This tool never executes: the dispatcher intercepts it by name and
/// suspends the graph with a `user_input_request` payload. The struct exists
/// so the catalog carries its schema and description.
pub struct AskHumanTool;

#[async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask the user a question when you are missing information required to \
         continue. The answer is returned to you as the tool result."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "The question to ask, clear and specific"},
                "context": {"type": "string", "description": "Why the answer is needed"},
                "default": {"type": "string", "description": "Value used when the user answers with nothing"},
                "required": {"type": "boolean", "description": "Whether an answer is mandatory (default true)"}
            },
            "required": ["question"]
        })
    }

    async fn run(&self, _args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
        anyhow::bail!("ask_human is handled by the dispatcher and never executes directly")
    }
}
