//! Workspace file tools. Every path is resolved inside the session sandbox;
//! absolute paths and `..` traversal are rejected.

use crate::engine::message::ToolPayload;
use crate::engine::tool::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::{Component, Path, PathBuf};

const READ_CAP_BYTES: usize = 256 * 1024;

/// Resolve `relative` inside `workspace`, refusing escapes.
pub fn resolve_sandboxed(workspace: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        anyhow::bail!("absolute paths are not allowed: {}", relative);
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            anyhow::bail!("path escapes the workspace: {}", relative);
        }
    }
    Ok(workspace.join(candidate))
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the session workspace (uploads/, outputs/, \
         skills/, temp/)."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        let args: ReadFileArgs = serde_json::from_value(args)?;
        let path = resolve_sandboxed(ctx.workspace()?, &args.path)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", args.path, e))?;
        if content.len() > READ_CAP_BYTES {
            let truncated: String = content.chars().take(READ_CAP_BYTES).collect();
            return Ok(ToolPayload::Text(format!(
                "{}\n… (truncated, {} bytes total)",
                truncated,
                content.len()
            )));
        }
        Ok(ToolPayload::Text(content))
    }
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a text file into the session workspace. Deliverables belong \
         under outputs/."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        let args: WriteFileArgs = serde_json::from_value(args)?;
        let path = resolve_sandboxed(ctx.workspace()?, &args.path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &args.content)?;
        Ok(ToolPayload::Text(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    dir: Option<String>,
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory (defaults to the root)."
    }

    fn args_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "dir": {"type": "string", "description": "Directory relative to the workspace root"}
            }
        })
    }

    async fn run(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolPayload> {
        let args: ListFilesArgs = serde_json::from_value(args)?;
        let dir = resolve_sandboxed(ctx.workspace()?, args.dir.as_deref().unwrap_or("."))?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                entries.push(format!("{}/", name));
            } else {
                entries.push(name);
            }
        }
        entries.sort();
        Ok(ToolPayload::Text(entries.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (ToolContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            workspace_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        (ctx, dir)
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (ctx, _dir) = ctx();
        WriteFileTool
            .run(
                json!({"path": "outputs/report.md", "content": "# Findings"}),
                &ctx,
            )
            .await
            .unwrap();
        let out = ReadFileTool
            .run(json!({"path": "outputs/report.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.render(), "# Findings");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (ctx, _dir) = ctx();
        assert!(ReadFileTool
            .run(json!({"path": "../../etc/passwd"}), &ctx)
            .await
            .is_err());
        assert!(WriteFileTool
            .run(json!({"path": "/etc/evil", "content": "x"}), &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_files_marks_directories() {
        let (ctx, dir) = ctx();
        std::fs::create_dir(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let out = ListFilesTool.run(json!({}), &ctx).await.unwrap().render();
        assert_eq!(out, "notes.txt\nuploads/");
    }

    #[tokio::test]
    async fn test_missing_workspace_fails() {
        let ctx = ToolContext::default();
        assert!(ReadFileTool.run(json!({"path": "a"}), &ctx).await.is_err());
    }
}
