//! Application assembly: load configuration, build the two process-wide
//! singletons (tool registry, approval engine), compile the host graph,
//! and wire the session manager. Everything here happens once at startup;
//! after that the registry only grows through idempotent on-demand
//! promotions.

use crate::config::{Config, HitlRules, SkillsConfig, ToolsConfig};
use crate::engine::approval::ApprovalEngine;
use crate::engine::context::{Compressor, TokenTracker};
use crate::engine::graph::Graph;
use crate::engine::tool_registry::ToolRegistry;
use crate::engine::tools::{register_builtins, Delegator};
use crate::engine::{build_host_graph, EngineDeps};
use crate::prompts::PromptStore;
use crate::provider::ModelRegistry;
use crate::session::SessionManager;
use crate::skills::SkillRegistry;
use crate::state_fs::SessionStore;
use crate::workspace::WorkspaceManager;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

pub struct Application {
    pub config: Config,
    pub deps: Arc<EngineDeps>,
    pub graph: Arc<Graph>,
    pub sessions: SessionManager,
}

/// Resolve a side-config file: the working directory wins over
/// `~/.axon/config/`.
fn side_config_path(file_name: &str) -> PathBuf {
    let local = PathBuf::from(file_name);
    if local.exists() {
        return local;
    }
    crate::paths::config_dir().join(file_name)
}

pub fn build_application(config: Config) -> Result<Application> {
    // Tool registry: builtins, then scanned manifests, then config.
    let delegator = Arc::new(Delegator::new(config.governance.subagent_max_loops));
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, delegator.clone());

    let tools_config = ToolsConfig::load(&side_config_path("tools.yml"))?;
    let mut scan_dirs = tools_config.scan_directories();
    if scan_dirs.is_empty() {
        scan_dirs.push(crate::paths::custom_tools_dir());
    }
    registry.scan(&scan_dirs);
    registry.apply_config(&tools_config);
    info!("Tool registry ready: {} enabled", registry.enabled_names().len());
    let registry = Arc::new(RwLock::new(registry));

    // Approval rules are loaded once and frozen.
    let hitl_rules = HitlRules::load(&side_config_path("hitl_rules.yml"))?;
    let approvals = Arc::new(ApprovalEngine::new(hitl_rules));

    let models = Arc::new(ModelRegistry::from_slots(&config.models));
    let prompts = Arc::new(PromptStore::load(Some(
        PromptStore::default_override_dir().as_path(),
    )));

    let deps = Arc::new(EngineDeps {
        registry: registry.clone(),
        approvals,
        models,
        tracker: Arc::new(TokenTracker::new(config.context.clone())),
        compressor: Arc::new(Compressor::new(config.context.clone())),
        prompts,
    });

    // One store backs both the per-transition checkpointer and the session
    // manager's explicit save/load/list surface.
    let store = Arc::new(SessionStore::new(
        config.sessions_dir(),
        config.sessions.persist,
    ));
    let checkpointer: crate::engine::graph::Checkpointer = {
        let store = store.clone();
        Arc::new(move |state: &crate::engine::state::AgentState| store.save(state))
    };

    let graph = build_host_graph(deps.clone(), Some(checkpointer))?;
    delegator.attach_graph(graph.clone());

    // Skills: shipped tree first, user tree overrides.
    let mut skills = SkillRegistry::new();
    skills.load_all(&[PathBuf::from("skills"), crate::paths::skills_dir()])?;
    info!("Skill registry ready: {} skills", skills.len());
    let skills_config = SkillsConfig::load(&side_config_path("skills.yml"))?;

    let sessions = SessionManager::new(
        store,
        WorkspaceManager::new(config.workspace_root())?,
        skills,
        skills_config,
        registry,
        config.governance.max_loops,
    );

    Ok(Application {
        config,
        deps,
        graph,
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_application_with_defaults() {
        // Point every path at a temp home so the build touches nothing real.
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.root = Some(dir.path().join("workspace"));
        config.sessions.dir = Some(dir.path().join("sessions"));
        config.sessions.persist = false;

        let app = build_application(config).unwrap();
        let registry = app.deps.registry.read().unwrap();
        assert!(registry.is_enabled("now"));
        assert!(registry.is_enabled("delegate_task"));
    }
}
