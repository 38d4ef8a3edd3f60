//! Filesystem locations for axon's per-user data.
//!
//! Everything lives under one home directory: `$AXON_HOME` when set,
//! otherwise `~/.axon`, otherwise a temp-dir fallback for environments
//! without a resolvable home (bare containers, CI sandboxes).

use std::path::PathBuf;

pub fn axon_home() -> PathBuf {
    if let Some(val) = std::env::var_os("AXON_HOME") {
        if !val.is_empty() {
            return PathBuf::from(val);
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".axon"),
        None => std::env::temp_dir().join("axon"),
    }
}

fn home_subdir(name: &str) -> PathBuf {
    axon_home().join(name)
}

/// Side-config files (`tools.yml`, `hitl_rules.yml`, `skills.yml`).
pub fn config_dir() -> PathBuf {
    home_subdir("config")
}

pub fn logs_dir() -> PathBuf {
    home_subdir("logs")
}

/// Default root for per-session sandboxes.
pub fn workspace_root() -> PathBuf {
    home_subdir("workspace")
}

/// Default session persistence directory.
pub fn sessions_dir() -> PathBuf {
    home_subdir("sessions")
}

/// User skill bundle source tree.
pub fn skills_dir() -> PathBuf {
    home_subdir("skills")
}

/// User prompt template overrides.
pub fn prompts_dir() -> PathBuf {
    home_subdir("prompts")
}

/// Custom tool scan root.
pub fn custom_tools_dir() -> PathBuf {
    home_subdir("tools")
}
