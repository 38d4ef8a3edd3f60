use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

/// Current UTC datetime as an ISO-8601 string.
pub struct NowTool;

#[async_trait]
impl Tool for NowTool {
    fn name(&self) -> &str {
        "now"
    }

    fn description(&self) -> &str {
        "Return the current UTC date and time as an ISO 8601 string."
    }

    fn args_schema(&self) -> JsonValue {
        json!({"type": "object", "properties": {}})
    }

    async fn run(&self, _args: JsonValue, _ctx: &ToolContext) -> Result<ToolPayload> {
        Ok(ToolPayload::Text(chrono::Utc::now().to_rfc3339()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_now_is_iso_utc() {
        let out = NowTool
            .run(json!({}), &ToolContext::default())
            .await
            .unwrap()
            .render();
        assert!(out.contains('T'));
        assert!(out.ends_with("+00:00"));
    }
}
