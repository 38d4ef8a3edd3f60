use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Deserialize)]
struct ReportArgs {
    final_result: String,
}

/// Orchestration terminal tool: deliver the final result to the user and
/// end the run (the dispatcher route ends when this tool just reported).
pub struct DoneAndReportTool;

#[async_trait]
impl Tool for DoneAndReportTool {
    fn name(&self) -> &str {
        "done_and_report"
    }

    fn description(&self) -> &str {
        "Report the final, synthesized result to the user and finish the task. \
         Call exactly once, when all sub-tasks are complete."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "final_result": {"type": "string", "description": "The complete result to show the user"}
            },
            "required": ["final_result"]
        })
    }

    async fn run(&self, args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
        let args: ReportArgs = serde_json::from_value(args)?;
        Ok(ToolPayload::Text(args.final_result))
    }
}
