//! Per-session workspace sandboxes.
//!
//! Directory layout per session:
//! ```text
//! <root>/<session_id>/
//!   skills/          # mounted skill directories (symlink, copy fallback)
//!   uploads/         # user-referenced files (#path mentions)
//!   outputs/         # agent-produced deliverables
//!   temp/            # scratch
//!   .metadata.json   # {session_id, created_at, mentioned_skills}
//! ```
//!
//! Skill mounting is idempotent, and a workspace never owns skill sources:
//! deleting it cannot affect the skill trees it links to.

use crate::skills::Skill;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const METADATA_FILE: &str = ".metadata.json";

#[derive(Debug, Serialize, Deserialize, Default)]
struct WorkspaceMetadata {
    session_id: String,
    created_at: u64,
    #[serde(default)]
    mentioned_skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceInfo {
    pub exists: bool,
    pub path: Option<PathBuf>,
    pub created_at: Option<u64>,
    pub mentioned_skills: Vec<String>,
    pub uploads_count: usize,
    pub outputs_count: usize,
    pub temp_count: usize,
}

pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (or reuse) the sandbox for a session, mounting `skills`.
    pub fn create_session_workspace(
        &self,
        session_id: &str,
        skills: &[Skill],
    ) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        let workspace = self.root.join(session_id);

        if !workspace.exists() {
            info!("Creating workspace for session {}", session_id);
            std::fs::create_dir_all(&workspace)?;
            for sub in ["uploads", "outputs", "temp"] {
                std::fs::create_dir_all(workspace.join(sub))?;
            }
            let metadata = WorkspaceMetadata {
                session_id: session_id.to_string(),
                created_at: now_secs(),
                mentioned_skills: Vec::new(),
            };
            write_metadata(&workspace, &metadata)?;
        }

        if !skills.is_empty() {
            self.add_skills(&workspace, skills)?;
        }
        Ok(workspace)
    }

    /// Mount skills into an existing workspace. Already-mounted skills are
    /// left untouched.
    pub fn add_skills(&self, workspace: &Path, skills: &[Skill]) -> Result<()> {
        let skills_dir = workspace.join("skills");
        std::fs::create_dir_all(&skills_dir)?;

        let mut metadata = read_metadata(workspace).unwrap_or_default();

        for skill in skills {
            if metadata.mentioned_skills.iter().any(|s| s == &skill.id) {
                continue;
            }
            let dst = skills_dir.join(&skill.id);
            if dst.exists() {
                metadata.mentioned_skills.push(skill.id.clone());
                continue;
            }
            match mount_link(&skill.path, &dst) {
                Ok(()) => info!("Mounted skill {} -> {}", skill.id, skill.path.display()),
                Err(e) => {
                    // Symlinks can fail (e.g. restricted filesystems); a copy
                    // keeps the contract at the cost of staleness.
                    warn!("Symlink failed for {}, copying instead: {}", skill.id, e);
                    copy_dir_recursive(&skill.path, &dst)?;
                }
            }
            metadata.mentioned_skills.push(skill.id.clone());
        }

        write_metadata(workspace, &metadata)
    }

    pub fn get_workspace(&self, session_id: &str) -> Option<PathBuf> {
        let workspace = self.root.join(session_id);
        workspace.exists().then_some(workspace)
    }

    /// Remove workspaces whose metadata `created_at` is older than
    /// `age_days`. Returns how many were deleted.
    pub fn cleanup(&self, age_days: u64) -> usize {
        let cutoff = now_secs().saturating_sub(age_days * 86_400);
        let mut cleaned = 0usize;
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        for entry in entries.flatten() {
            let workspace = entry.path();
            if !workspace.is_dir() {
                continue;
            }
            let Some(metadata) = read_metadata(&workspace) else {
                continue;
            };
            if metadata.created_at < cutoff {
                info!("Cleaning old workspace: {}", workspace.display());
                match std::fs::remove_dir_all(&workspace) {
                    Ok(()) => cleaned += 1,
                    Err(e) => warn!("Failed to clean {}: {}", workspace.display(), e),
                }
            }
        }
        cleaned
    }

    pub fn info(&self, session_id: &str) -> WorkspaceInfo {
        let Some(workspace) = self.get_workspace(session_id) else {
            return WorkspaceInfo {
                exists: false,
                path: None,
                created_at: None,
                mentioned_skills: Vec::new(),
                uploads_count: 0,
                outputs_count: 0,
                temp_count: 0,
            };
        };
        let metadata = read_metadata(&workspace).unwrap_or_default();
        WorkspaceInfo {
            exists: true,
            created_at: Some(metadata.created_at),
            mentioned_skills: metadata.mentioned_skills,
            uploads_count: count_files(&workspace.join("uploads")),
            outputs_count: count_files(&workspace.join("outputs")),
            temp_count: count_files(&workspace.join("temp")),
            path: Some(workspace),
        }
    }
}

fn mount_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(src, dst)
    }
    #[cfg(not(unix))]
    {
        let _ = (src, dst);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlinks unavailable on this platform",
        ))
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        anyhow::bail!("session id must not be empty");
    }
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        anyhow::bail!("session id contains invalid characters: {}", id);
    }
    Ok(())
}

fn read_metadata(workspace: &Path) -> Option<WorkspaceMetadata> {
    let content = std::fs::read_to_string(workspace.join(METADATA_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_metadata(workspace: &Path, metadata: &WorkspaceMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(workspace.join(METADATA_FILE), json)?;
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries.flatten().count()
}
