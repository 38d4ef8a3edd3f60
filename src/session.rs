//! Session lifecycle: creating, loading, and saving sessions, and turning
//! raw user input into state ready for the graph (mention resolution,
//! on-demand tool promotion, skill mounting, upload tracking).

use crate::config::SkillsConfig;
use crate::engine::mentions::{
    classify_mentions, expand_file_patterns, parse_file_mentions, parse_mentions, MentionKind,
};
use crate::engine::message::{Message, UserPart};
use crate::engine::state::{AgentState, UploadedFile};
use crate::engine::tool_registry::ToolRegistry;
use crate::skills::SkillRegistry;
use crate::state_fs::{SessionRecord, SessionStore};
use crate::workspace::WorkspaceManager;
use anyhow::Result;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Text files up to this size are injected into the user message directly;
/// larger files are only listed and left to the file tools.
const INLINE_FILE_CAP_BYTES: u64 = 16 * 1024;

/// What turn preparation surfaced for the UI (unknown mentions and the
/// like; never fatal).
#[derive(Debug, Default)]
pub struct TurnSetup {
    pub diagnostics: Vec<String>,
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    workspaces: WorkspaceManager,
    skills: SkillRegistry,
    skills_config: SkillsConfig,
    registry: Arc<RwLock<ToolRegistry>>,
    max_loops: usize,
}

impl SessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        workspaces: WorkspaceManager,
        skills: SkillRegistry,
        skills_config: SkillsConfig,
        registry: Arc<RwLock<ToolRegistry>>,
        max_loops: usize,
    ) -> Self {
        Self {
            store,
            workspaces,
            skills,
            skills_config,
            registry,
            max_loops,
        }
    }

    /// Fresh session: new thread id, new workspace with core skills mounted.
    pub fn create_session(&self) -> Result<AgentState> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        let mut state = AgentState::new(thread_id.clone(), self.max_loops);

        let core_skills: Vec<_> = self
            .skills_config
            .core
            .iter()
            .filter_map(|id| self.skills.get(id).cloned())
            .collect();
        let workspace = self
            .workspaces
            .create_session_workspace(&thread_id, &core_skills)?;
        state.workspace_path = Some(workspace);

        info!("Created session {}", &thread_id[..16.min(thread_id.len())]);
        Ok(state)
    }

    /// Load a saved session by thread-id prefix. Ambiguous or unknown
    /// prefixes return `None`.
    pub fn load_session(&self, prefix: &str) -> Result<Option<AgentState>> {
        let records = self.store.list()?;
        let matching: Vec<&SessionRecord> = records
            .iter()
            .filter(|r| r.thread_id.starts_with(prefix))
            .collect();
        if matching.len() != 1 {
            if matching.len() > 1 {
                warn!(
                    "Session prefix '{}' is ambiguous ({} matches)",
                    prefix,
                    matching.len()
                );
            }
            return Ok(None);
        }

        let thread_id = matching[0].thread_id.clone();
        let Some(mut state) = self.store.load(&thread_id)? else {
            return Ok(None);
        };
        // Recreate the workspace if it was cleaned away in the meantime.
        if state
            .workspace_path
            .as_ref()
            .map(|p| !p.exists())
            .unwrap_or(true)
        {
            let workspace = self.workspaces.create_session_workspace(&thread_id, &[])?;
            state.workspace_path = Some(workspace);
        }
        info!(
            "Loaded session {} with {} messages",
            &thread_id[..16.min(thread_id.len())],
            state.messages.len()
        );
        Ok(Some(state))
    }

    pub fn save(&self, state: &AgentState) {
        self.store.save(state);
    }

    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        self.store.list()
    }

    pub fn remove(&self, thread_id: &str) -> Result<()> {
        self.store.remove(thread_id)
    }

    pub fn cleanup_workspaces(&self, age_days: u64) -> usize {
        self.workspaces.cleanup(age_days)
    }

    pub fn workspace_info(&self, session_id: &str) -> crate::workspace::WorkspaceInfo {
        self.workspaces.info(session_id)
    }

    /// Prepare a user turn: reset one-shot flags, resolve `@` and `#`
    /// mentions, promote tools, mount skills, record uploads, and append
    /// the user message.
    pub fn prepare_turn(&self, state: &mut AgentState, input: &str) -> Result<TurnSetup> {
        state.begin_user_turn();
        let mut setup = TurnSetup::default();

        let (at_mentions, cleaned) = parse_mentions(input);
        let (file_refs, cleaned) = parse_file_mentions(&cleaned);

        self.resolve_at_mentions(state, &at_mentions, &mut setup);
        let inline_parts = self.resolve_file_refs(state, &file_refs, &mut setup);

        let mut parts = vec![UserPart::Text { text: cleaned }];
        parts.extend(inline_parts);
        state.messages.push(Message::user_parts(parts));
        Ok(setup)
    }

    fn resolve_at_mentions(
        &self,
        state: &mut AgentState,
        mentions: &[String],
        setup: &mut TurnSetup,
    ) {
        if mentions.is_empty() {
            return;
        }
        let classifications = {
            let registry = self.registry.read().expect("tool registry lock poisoned");
            classify_mentions(mentions, &registry, &self.skills)
        };

        for classification in classifications {
            match classification.kind {
                MentionKind::Tool { needs_loading } => {
                    if needs_loading {
                        let mut registry =
                            self.registry.write().expect("tool registry lock poisoned");
                        match registry.load_on_demand(&classification.name) {
                            Ok(_) => {
                                info!("Promoted mentioned tool: {}", classification.name);
                            }
                            Err(e) => {
                                // Raced discovery state; surface, don't fail.
                                setup.diagnostics.push(e.to_string());
                                continue;
                            }
                        }
                    }
                    if !state.dynamic_tools.contains(&classification.name) {
                        state.dynamic_tools.push(classification.name.clone());
                    }
                    note_mention(state, &classification.name);
                }
                MentionKind::Skill => {
                    let Some(skill) = self.skills.get(&classification.name).cloned() else {
                        continue;
                    };
                    if let Some(workspace) = &state.workspace_path {
                        if let Err(e) = self.workspaces.add_skills(workspace, &[skill]) {
                            warn!("Failed to mount skill {}: {}", classification.name, e);
                        }
                    }
                    state.active_skill = Some(classification.name.clone());
                    note_mention(state, &classification.name);
                }
                MentionKind::Agent => {
                    note_mention(state, &classification.name);
                }
                MentionKind::Unknown => {
                    warn!("Unknown mention: @{}", classification.name);
                    setup
                        .diagnostics
                        .push(format!("unknown mention: @{}", classification.name));
                }
            }
        }
    }

    fn resolve_file_refs(
        &self,
        state: &mut AgentState,
        file_refs: &[String],
        setup: &mut TurnSetup,
    ) -> Vec<UserPart> {
        if file_refs.is_empty() {
            return Vec::new();
        }
        let Some(workspace) = state.workspace_path.clone() else {
            setup
                .diagnostics
                .push("file mentions need a session workspace".to_string());
            return Vec::new();
        };
        let uploads_dir = workspace.join("uploads");

        let mut inline_parts = Vec::new();
        for pattern in file_refs {
            let matched = expand_file_patterns(std::slice::from_ref(pattern), &uploads_dir);
            if matched.is_empty() {
                setup
                    .diagnostics
                    .push(format!("no uploaded files match #{}", pattern));
                continue;
            }
            for rel_path in matched {
                let record = UploadedFile {
                    name: rel_path.rsplit('/').next().unwrap_or(&rel_path).to_string(),
                    path: format!("uploads/{}", rel_path),
                };
                if let Ok(meta) = std::fs::metadata(uploads_dir.join(&rel_path)) {
                    info!(
                        "Referenced upload {} ({})",
                        record.path,
                        crate::engine::mentions::format_file_size(meta.len())
                    );
                }
                if !state.new_uploaded_files.iter().any(|f| f.path == record.path) {
                    state.new_uploaded_files.push(record.clone());
                }
                if !state.uploaded_files.iter().any(|f| f.path == record.path) {
                    state.uploaded_files.push(record.clone());
                }

                for skill_id in self.skills_config.skills_for_upload(&record.name) {
                    if let Some(skill) = self.skills.get(&skill_id).cloned() {
                        if let Err(e) = self.workspaces.add_skills(&workspace, &[skill]) {
                            warn!("Failed to auto-mount skill {}: {}", skill_id, e);
                        } else {
                            info!("Auto-mounted skill {} for {}", skill_id, record.name);
                        }
                    }
                }

                if let Some(part) = inline_file_part(&uploads_dir, &rel_path) {
                    inline_parts.push(part);
                }
            }
        }
        inline_parts
    }
}

fn note_mention(state: &mut AgentState, name: &str) {
    if !state.new_mentioned_agents.iter().any(|m| m == name) {
        state.new_mentioned_agents.push(name.to_string());
    }
    if !state.mentioned_agents.iter().any(|m| m == name) {
        state.mentioned_agents.push(name.to_string());
    }
}

/// Inject small UTF-8 text files into the user message; everything else is
/// referenced by path only.
fn inline_file_part(uploads_dir: &std::path::Path, rel_path: &str) -> Option<UserPart> {
    let full = uploads_dir.join(rel_path);
    let size = std::fs::metadata(&full).ok()?.len();
    if size > INLINE_FILE_CAP_BYTES {
        return None;
    }
    let text = std::fs::read_to_string(&full).ok()?;
    Some(UserPart::FileText {
        path: format!("uploads/{}", rel_path),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::message::ToolPayload;
    use crate::engine::tool::{Tool, ToolContext};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    struct Dummy(&'static str);

    #[async_trait]
    impl Tool for Dummy {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "dummy"
        }
        fn args_schema(&self) -> JsonValue {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, _: JsonValue, _: &ToolContext) -> Result<ToolPayload> {
            Ok(ToolPayload::Text(String::new()))
        }
    }

    fn manager_with(
        registry: ToolRegistry,
        skills_yaml: Option<&str>,
    ) -> (SessionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        // Install a skill source tree for mount tests.
        let skill_dir = dir.path().join("skill-src/pdf");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            "---\nid: pdf\nname: pdf\ndescription: PDF handling\n---\nDocs here.\n",
        )
        .unwrap();
        let mut skills = SkillRegistry::new();
        skills.load_all(&[dir.path().join("skill-src")]).unwrap();

        let skills_config: SkillsConfig = skills_yaml
            .map(|y| serde_yml::from_str(y).unwrap())
            .unwrap_or_default();

        let manager = SessionManager::new(
            Arc::new(SessionStore::new(dir.path().join("sessions"), true)),
            WorkspaceManager::new(dir.path().join("workspace")).unwrap(),
            skills,
            skills_config,
            Arc::new(RwLock::new(registry)),
            100,
        );
        (manager, dir)
    }

    #[test]
    fn test_create_and_reload_session() {
        let (manager, _dir) = manager_with(ToolRegistry::new(), None);
        let mut state = manager.create_session().unwrap();
        state.messages.push(Message::user_text("hi"));
        manager.save(&state);

        let loaded = manager
            .load_session(&state.thread_id[..8])
            .unwrap()
            .unwrap();
        assert_eq!(loaded.thread_id, state.thread_id);
        assert_eq!(loaded.messages.len(), 1);
        assert!(loaded.workspace_path.as_ref().unwrap().exists());
    }

    #[test]
    fn test_load_unknown_prefix_is_none() {
        let (manager, _dir) = manager_with(ToolRegistry::new(), None);
        assert!(manager.load_session("nope").unwrap().is_none());
    }

    // A mention promotes a discovered-but-disabled tool into the
    // session catalog.
    #[test]
    fn test_mention_promotes_tool() {
        let mut registry = ToolRegistry::new();
        registry.register_discovered(std::sync::Arc::new(Dummy("extract_links")));
        let (manager, _dir) = manager_with(registry, None);

        let mut state = manager.create_session().unwrap();
        let setup = manager
            .prepare_turn(&mut state, "@extract_links from https://x")
            .unwrap();

        assert!(setup.diagnostics.is_empty());
        assert_eq!(state.new_mentioned_agents, vec!["extract_links"]);
        assert!(state.dynamic_tools.contains(&"extract_links".to_string()));
        {
            let registry = manager.registry.read().unwrap();
            assert!(registry.is_enabled("extract_links"));
            let visible: Vec<String> = registry
                .visible_for(&state)
                .iter()
                .map(|t| t.name().to_string())
                .collect();
            assert!(visible.contains(&"extract_links".to_string()));
        }
        // The cleaned user message kept the tool name without the marker.
        assert!(state.messages[0].text().contains("extract_links from https://x"));
    }

    #[test]
    fn test_unknown_mention_is_diagnostic_not_error() {
        let (manager, _dir) = manager_with(ToolRegistry::new(), None);
        let mut state = manager.create_session().unwrap();
        let setup = manager.prepare_turn(&mut state, "@nonexistent help").unwrap();
        assert_eq!(setup.diagnostics, vec!["unknown mention: @nonexistent"]);
        // The turn still went through.
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_skill_mention_mounts_and_activates() {
        let (manager, _dir) = manager_with(ToolRegistry::new(), None);
        let mut state = manager.create_session().unwrap();
        manager
            .prepare_turn(&mut state, "use @pdf for this")
            .unwrap();
        assert_eq!(state.active_skill.as_deref(), Some("pdf"));
        let mounted = state.workspace_path.as_ref().unwrap().join("skills/pdf");
        assert!(mounted.exists());
    }

    #[test]
    fn test_file_mentions_record_uploads_and_inline_text() {
        let (manager, _dir) = manager_with(ToolRegistry::new(), None);
        let mut state = manager.create_session().unwrap();
        let uploads = state.workspace_path.as_ref().unwrap().join("uploads");
        std::fs::write(uploads.join("notes.txt"), "remember the milk").unwrap();

        let setup = manager
            .prepare_turn(&mut state, "summarize #notes.txt and #missing.txt")
            .unwrap();

        assert_eq!(state.new_uploaded_files.len(), 1);
        assert_eq!(state.uploaded_files[0].path, "uploads/notes.txt");
        assert_eq!(setup.diagnostics, vec!["no uploaded files match #missing.txt"]);
        // Small text files are injected into the message.
        assert!(state.messages[0].text().contains("remember the milk"));
    }

    #[test]
    fn test_upload_auto_mounts_configured_skill() {
        let skills_yaml = r#"
optional:
  pdf:
    enabled: true
    auto_load_on_file_types: [pdf]
global:
  auto_load_on_file_upload: true
"#;
        let (manager, _dir) = manager_with(ToolRegistry::new(), Some(skills_yaml));
        let mut state = manager.create_session().unwrap();
        let uploads = state.workspace_path.as_ref().unwrap().join("uploads");
        std::fs::write(uploads.join("paper.pdf"), b"%PDF-1.4").unwrap();

        manager.prepare_turn(&mut state, "read #paper.pdf").unwrap();
        let mounted = state.workspace_path.as_ref().unwrap().join("skills/pdf");
        assert!(mounted.exists());
    }

    #[test]
    fn test_prepare_turn_clears_one_shot_state() {
        let (manager, _dir) = manager_with(ToolRegistry::new(), None);
        let mut state = manager.create_session().unwrap();
        state.auto_compressed_this_request = true;
        state.new_mentioned_agents.push("stale".into());
        manager.prepare_turn(&mut state, "plain question").unwrap();
        assert!(!state.auto_compressed_this_request);
        assert!(state.new_mentioned_agents.is_empty());
    }
}
