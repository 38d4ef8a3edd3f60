//! Shell execution inside the session workspace. Risky invocations are
//! gated by the approval engine before the dispatcher ever calls `run`.

use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::process::Stdio;
use tracing::info;

const OUTPUT_CAP_CHARS: usize = 16_000;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command inside the session workspace and return its \
         output."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"},
                "timeout_ms": {"type": "integer", "description": "Kill the command after this many milliseconds (default 60000)"}
            },
            "required": ["command"]
        })
    }

    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        let args: RunCommandArgs = serde_json::from_value(args)?;
        let workspace = ctx.workspace()?.to_path_buf();
        let timeout =
            std::time::Duration::from_millis(args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));

        info!("Running command in {}: {}", workspace.display(), args.command);
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("command timed out after {:?}", timeout),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.to_string();
        if !stderr.is_empty() {
            text.push_str("\n[stderr]\n");
            text.push_str(&stderr);
        }
        if text.chars().count() > OUTPUT_CAP_CHARS {
            text = text.chars().take(OUTPUT_CAP_CHARS).collect::<String>() + "\n… (truncated)";
        }

        if !output.status.success() {
            anyhow::bail!("command exited with {}: {}", output.status, text.trim());
        }
        Ok(ToolPayload::Text(text))
    }
}
