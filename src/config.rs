use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Main config (axon.toml)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelSlots,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One configured model endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelSlot {
    pub id: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub context_window: usize,
    pub max_completion_tokens: usize,
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self {
            id: "base-quick".to_string(),
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            api_key: None,
            context_window: 128_000,
            max_completion_tokens: 8_192,
        }
    }
}

/// Model routing slots. Every slot falls back to `base` when absent.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ModelSlots {
    #[serde(default)]
    pub base: ModelSlot,
    pub reason: Option<ModelSlot>,
    pub vision: Option<ModelSlot>,
    pub code: Option<ModelSlot>,
    pub chat: Option<ModelSlot>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub enabled: bool,
    /// Usage ratio where the advisory reminder starts (level `info`).
    pub warning_threshold: f64,
    /// Usage ratio where the reminder becomes insistent (level `warning`).
    pub strong_warning_threshold: f64,
    /// Usage ratio that forces compression (level `critical`).
    pub force_compact_threshold: f64,
    /// Minimum number of recent non-system messages kept verbatim.
    pub keep_recent_messages: usize,
    /// Minimum size of the middle window for the `compact` strategy.
    pub compact_middle_messages: usize,
    /// Every Nth consecutive compaction escalates to `summarize`.
    pub summarize_cycle: usize,
    /// Messages kept by the emergency truncation fallback.
    pub max_history_messages: usize,
    /// Output cap for summarization calls.
    pub summary_max_completion_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_threshold: 0.75,
            strong_warning_threshold: 0.85,
            force_compact_threshold: 0.95,
            keep_recent_messages: 10,
            compact_middle_messages: 20,
            summarize_cycle: 3,
            max_history_messages: 100,
            summary_max_completion_tokens: 1440,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GovernanceConfig {
    pub max_loops: usize,
    pub subagent_max_loops: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_loops: 100,
            subagent_max_loops: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory under which per-session sandboxes are created.
    pub root: Option<PathBuf>,
    /// Workspaces older than this are removed by `cleanup`.
    pub cleanup_age_days: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            cleanup_age_days: 7,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionsConfig {
    pub dir: Option<PathBuf>,
    /// Disable to skip all persistence without touching call sites (tests, CI).
    pub persist: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            persist: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load `axon.toml` from the current directory, then `~/.axon/config/`,
    /// falling back to built-in defaults.
    pub fn load() -> Result<Self> {
        for path in [
            PathBuf::from("axon.toml"),
            crate::paths::config_dir().join("axon.toml"),
        ] {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&content)?;
                return Ok(config);
            }
        }
        Ok(Config::default())
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .root
            .clone()
            .unwrap_or_else(crate::paths::workspace_root)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions
            .dir
            .clone()
            .unwrap_or_else(crate::paths::sessions_dir)
    }
}

// ---------------------------------------------------------------------------
// Tools config (tools.yml)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    /// Always-enabled tools, keyed by name.
    #[serde(default)]
    pub core: HashMap<String, CoreToolEntry>,
    /// Tools that may be enabled by config or promoted on demand.
    #[serde(default)]
    pub optional: HashMap<String, OptionalToolEntry>,
    #[serde(default)]
    pub directories: ToolDirectories,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CoreToolEntry {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_risk")]
    pub risk: String,
    #[serde(default = "default_true")]
    pub available_to_subagent: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OptionalToolEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub available_to_subagent: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_risk")]
    pub risk: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolDirectories {
    #[serde(default)]
    pub builtin: Vec<PathBuf>,
    #[serde(default)]
    pub custom: Vec<PathBuf>,
}

fn default_risk() -> String {
    "low".to_string()
}

impl ToolsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&content)?)
    }

    /// Scan roots in override order: builtin first, custom later
    /// (later directories override earlier on name collision).
    pub fn scan_directories(&self) -> Vec<PathBuf> {
        let mut dirs = self.directories.builtin.clone();
        dirs.extend(self.directories.custom.clone());
        dirs
    }

    /// Names enabled at startup: all core + enabled optional.
    pub fn enabled_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.core.keys().cloned().collect();
        names.extend(
            self.optional
                .iter()
                .filter(|(_, e)| e.enabled)
                .map(|(n, _)| n.clone()),
        );
        names.sort();
        names
    }

}

// ---------------------------------------------------------------------------
// HITL rules (hitl_rules.yml)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HitlRules {
    #[serde(default)]
    pub global: GlobalRules,
    #[serde(default)]
    pub tools: HashMap<String, ToolRules>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GlobalRules {
    /// Severity → pattern group. Scanned critical → high → medium → low.
    #[serde(default)]
    pub risk_patterns: HashMap<String, RiskPatternGroup>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RiskPatternGroup {
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolRules {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scanned in declared order, so severity ordering is the file's.
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
    /// Severity → action override (default `require_approval`).
    #[serde(default)]
    pub actions: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PatternRule {
    pub level: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_action() -> String {
    "require_approval".to_string()
}

impl HitlRules {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&content)?)
    }
}

// ---------------------------------------------------------------------------
// Skills config (skills.yml)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SkillsConfig {
    /// Skills mounted into every new session workspace.
    #[serde(default)]
    pub core: Vec<String>,
    #[serde(default)]
    pub optional: HashMap<String, OptionalSkillEntry>,
    #[serde(default)]
    pub global: SkillsGlobal,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OptionalSkillEntry {
    #[serde(default)]
    pub enabled: bool,
    /// File extensions (without dot) that auto-mount this skill on upload.
    #[serde(default)]
    pub auto_load_on_file_types: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SkillsGlobal {
    #[serde(default = "default_true")]
    pub auto_load_on_file_upload: bool,
}

impl Default for SkillsGlobal {
    fn default() -> Self {
        Self {
            auto_load_on_file_upload: true,
        }
    }
}

impl SkillsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&content)?)
    }

    /// Skill ids whose `auto_load_on_file_types` match the uploaded file's
    /// extension. Disabled unless `global.auto_load_on_file_upload`.
    pub fn skills_for_upload(&self, file_name: &str) -> Vec<String> {
        if !self.global.auto_load_on_file_upload {
            return Vec::new();
        }
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if ext.is_empty() {
            return Vec::new();
        }
        let mut ids: Vec<String> = self
            .optional
            .iter()
            .filter(|(_, e)| e.enabled && e.auto_load_on_file_types.iter().any(|t| t.eq_ignore_ascii_case(&ext)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
