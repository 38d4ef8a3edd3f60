//! Tool capability: the interface every executable tool implements, the
//! ambient context passed to each call, and the manifest-declared command
//! tools picked up by the registry's directory scan.

use crate::engine::message::ToolPayload;
use crate::engine::state::TodoItem;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::info;

/// Ambient per-call context: the session's sandbox and identity, plus a
/// read-only snapshot of the parts of state that tools may inspect.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub workspace_path: Option<PathBuf>,
    pub session_id: String,
    pub context_id: String,
    pub todos: Vec<TodoItem>,
}

impl ToolContext {
    /// Workspace root, failing loudly for tools that require a sandbox.
    pub fn workspace(&self) -> Result<&Path> {
        self.workspace_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no workspace attached to this session"))
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-schema object describing the tool's parameters.
    fn args_schema(&self) -> JsonValue;
    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload>;
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Manifest-declared command tools
// ---------------------------------------------------------------------------

fn default_param_type() -> String {
    "string".to_string()
}

fn default_timeout() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestParamDef {
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub description: String,
}

/// A tool declared in a YAML manifest under one of the registry's scan
/// roots. `cmd` is a template whose `{{param}}` placeholders are replaced
/// with shell-escaped argument values and run via `sh -c` inside the
/// session workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestToolDef {
    pub name: String,
    pub description: String,
    pub cmd: String,
    #[serde(default)]
    pub args: HashMap<String, ManifestParamDef>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl ManifestToolDef {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&content)?)
    }

    fn render_command(&self, args: &JsonValue) -> Result<String> {
        let obj = args.as_object();
        for (name, param) in &self.args {
            if param.required {
                let has_arg = obj.map(|o| o.contains_key(name)).unwrap_or(false);
                if !has_arg {
                    anyhow::bail!("missing required argument: {}", name);
                }
            }
        }

        let mut rendered = self.cmd.clone();
        for (name, param) in &self.args {
            let placeholder = format!("{{{{{}}}}}", name);
            let value = obj.and_then(|o| o.get(name)).or(param.default.as_ref());
            if let Some(val) = value {
                let str_val = match val {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                rendered = rendered.replace(&placeholder, &shell_escape_arg(&str_val));
            } else {
                rendered = rendered.replace(&placeholder, "");
            }
        }
        Ok(rendered)
    }
}

#[async_trait]
impl Tool for ManifestToolDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> JsonValue {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, param) in &self.args {
            properties.insert(
                name.clone(),
                serde_json::json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(JsonValue::String(name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        let rendered = self.render_command(&args)?;
        info!("Manifest tool '{}' rendered command: {}", self.name, rendered);

        let workspace = ctx.workspace()?.to_path_buf();
        let timeout = std::time::Duration::from_millis(self.timeout_ms);
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .current_dir(&workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!(
                "tool '{}' timed out after {}ms",
                self.name,
                self.timeout_ms
            ),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            anyhow::bail!(
                "tool '{}' exited with {}: {}",
                self.name,
                output.status,
                if stderr.is_empty() { &stdout } else { &stderr }
            );
        }
        Ok(ToolPayload::Text(stdout))
    }
}

/// Single-quote an argument for `sh -c` interpolation.
fn shell_escape_arg(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
