//! Tool registry: tracks every scanned tool, which of them the planner may
//! select, and per-tool governance metadata.
//!
//! Tools move through three lifecycle states: *discovered* (found by scan,
//! not selectable), *enabled* (in the catalog passed to the model), and
//! *promoted on demand* (discovered tool raised to enabled for a session,
//! typically because the user @mentioned it). Promotion is append-only and
//! idempotent; nothing is ever removed after startup scan.

use crate::config::ToolsConfig;
use crate::engine::state::AgentState;
use crate::engine::tool::{ManifestToolDef, Tool};
use crate::provider::ToolSchema;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Name of the delegation tool; always filtered out of subagent catalogs.
pub const DELEGATE_TOOL_NAME: &str = "delegate_task";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Governance attributes for a tool.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub name: String,
    pub risk: String,
    pub tags: Vec<String>,
    pub available_to_subagent: bool,
}

impl ToolMeta {
    fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            risk: "unknown".to_string(),
            tags: Vec::new(),
            available_to_subagent: false,
        }
    }

    /// `skill:<id>` tag scoping this tool to one skill's activation.
    fn skill_scope(&self) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|t| t.strip_prefix("skill:"))
    }
}

pub struct ToolRegistry {
    discovered: HashMap<String, Arc<dyn Tool>>,
    enabled: HashSet<String>,
    meta: HashMap<String, ToolMeta>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            discovered: HashMap::new(),
            enabled: HashSet::new(),
            meta: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Registration & scan
    // ------------------------------------------------------------------

    /// Track a scanned tool without exposing it to the planner.
    pub fn register_discovered(&mut self, tool: Arc<dyn Tool>) {
        self.discovered.insert(tool.name().to_string(), tool);
    }

    /// Promote a discovered tool into the model-visible catalog.
    /// Idempotent; unknown names fail with [`RegistryError::UnknownTool`].
    pub fn register_enabled(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.discovered.contains_key(name) {
            return Err(RegistryError::UnknownTool(name.to_string()));
        }
        self.enabled.insert(name.to_string());
        Ok(())
    }

    /// Discover and enable in one step (builtin tools).
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.register_discovered(tool);
        self.enabled.insert(name);
    }

    pub fn register_meta(&mut self, meta: ToolMeta) {
        self.meta.insert(meta.name.clone(), meta);
    }

    /// Scan directories for YAML tool manifests. Later directories override
    /// earlier ones on name collision, which lets user tool trees shadow
    /// builtin manifests.
    pub fn scan(&mut self, directories: &[impl AsRef<Path>]) {
        for dir in directories {
            let dir = dir.as_ref();
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(_) => {
                    info!("Tool scan root missing, skipping: {}", dir.display());
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_yaml = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e == "yml" || e == "yaml")
                    .unwrap_or(false);
                if !is_yaml {
                    continue;
                }
                match ManifestToolDef::from_yaml_file(&path) {
                    Ok(def) => {
                        info!("Discovered tool '{}' from {}", def.name, path.display());
                        self.register_discovered(Arc::new(def));
                    }
                    Err(e) => {
                        warn!("Skipping invalid tool manifest {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    /// Apply a tools config: enable configured names and record metadata.
    pub fn apply_config(&mut self, config: &ToolsConfig) {
        for name in config.enabled_tools() {
            if let Err(e) = self.register_enabled(&name) {
                warn!("Tool configured but not discovered: {}", e);
            }
        }
        for (name, entry) in &config.core {
            self.register_meta(ToolMeta {
                name: name.clone(),
                risk: entry.risk.clone(),
                tags: entry.tags.clone(),
                available_to_subagent: entry.available_to_subagent,
            });
        }
        for (name, entry) in &config.optional {
            self.register_meta(ToolMeta {
                name: name.clone(),
                risk: entry.risk.clone(),
                tags: entry.tags.clone(),
                available_to_subagent: entry.available_to_subagent,
            });
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn is_discovered(&self, name: &str) -> bool {
        self.discovered.contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Fetch an enabled tool for execution.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if !self.enabled.contains(name) {
            return None;
        }
        self.discovered.get(name).cloned()
    }

    /// Promote a discovered-but-disabled tool and return it. Used when the
    /// planner sees a `@tool` mention for a presently-disabled tool.
    pub fn load_on_demand(&mut self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        if let Some(tool) = self.get(name) {
            return Ok(tool);
        }
        match self.discovered.get(name) {
            Some(tool) => {
                info!("Promoting tool on demand: {}", name);
                self.enabled.insert(name.to_string());
                Ok(tool.clone())
            }
            None => Err(RegistryError::UnknownTool(name.to_string())),
        }
    }

    /// Governance metadata; undeclared tools get `{risk: "unknown"}`.
    pub fn metadata_for(&self, name: &str) -> ToolMeta {
        self.meta
            .get(name)
            .cloned()
            .unwrap_or_else(|| ToolMeta::unknown(name))
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// The tool catalog passed to the model for this session:
    /// enabled tools, minus skill-scoped tools for inactive skills, minus
    /// subagent-forbidden tools when the context is a subagent.
    pub fn visible_for(&self, state: &AgentState) -> Vec<Arc<dyn Tool>> {
        let mut names: Vec<&String> = self.enabled.iter().collect();
        names.sort();

        let is_subagent = state.is_subagent();
        names
            .into_iter()
            .filter(|name| {
                let meta = self.metadata_for(name);
                if let Some(skill_id) = meta.skill_scope() {
                    if state.active_skill.as_deref() != Some(skill_id) {
                        return false;
                    }
                }
                if is_subagent {
                    // Delegation is structurally forbidden for subagents,
                    // independent of its configured metadata.
                    if name.as_str() == DELEGATE_TOOL_NAME {
                        return false;
                    }
                    if !meta.available_to_subagent {
                        return false;
                    }
                }
                true
            })
            .filter_map(|name| self.discovered.get(name).cloned())
            .collect()
    }

    /// Provider-facing schemas for a tool list.
    pub fn schemas(tools: &[Arc<dyn Tool>]) -> Vec<ToolSchema> {
        tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.args_schema(),
            })
            .collect()
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.enabled.iter().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
