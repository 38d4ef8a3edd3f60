//! Prompt templates.
//!
//! Each template has a compiled-in default under `prompts/` in the source
//! tree and may be replaced by a matching `.md` file in the user's prompt
//! directory (`~/.axon/prompts/`). Lookups fall back lazily: only user
//! replacements are held in memory. Templates use `{variable}`
//! placeholders, filled by [`PromptStore::render`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    /// Planner system prompt.
    /// Vars: `{tool_catalog}`, `{workspace_path}`, `{datetime}`.
    PlannerSystem,
    /// Summarization instruction for the `compact` strategy.
    CompactInstruction,
    /// Summarization instruction for the `summarize` strategy.
    SummarizeInstruction,
    /// Follow-up when a subagent's final reply is too short.
    SubagentContinuation,
    /// Synthetic assistant message on an exhausted loop budget.
    BudgetExhausted,
    /// Advisory reminder at elevated token usage.
    /// Vars: `{level}`, `{used}`, `{total}`, `{percent}`, `{strategy}`.
    TokenReminder,
}

impl PromptKey {
    pub const ALL: [PromptKey; 6] = [
        PromptKey::PlannerSystem,
        PromptKey::CompactInstruction,
        PromptKey::SummarizeInstruction,
        PromptKey::SubagentContinuation,
        PromptKey::BudgetExhausted,
        PromptKey::TokenReminder,
    ];

    /// File stem of the template's override file.
    pub fn file_stem(self) -> &'static str {
        match self {
            PromptKey::PlannerSystem => "planner-system",
            PromptKey::CompactInstruction => "compact-instruction",
            PromptKey::SummarizeInstruction => "summarize-instruction",
            PromptKey::SubagentContinuation => "subagent-continuation",
            PromptKey::BudgetExhausted => "budget-exhausted",
            PromptKey::TokenReminder => "token-reminder",
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            PromptKey::PlannerSystem => include_str!("../prompts/planner-system.md"),
            PromptKey::CompactInstruction => include_str!("../prompts/compact-instruction.md"),
            PromptKey::SummarizeInstruction => include_str!("../prompts/summarize-instruction.md"),
            PromptKey::SubagentContinuation => include_str!("../prompts/subagent-continuation.md"),
            PromptKey::BudgetExhausted => include_str!("../prompts/budget-exhausted.md"),
            PromptKey::TokenReminder => include_str!("../prompts/token-reminder.md"),
        }
    }
}

pub struct PromptStore {
    overrides: HashMap<PromptKey, String>,
}

impl PromptStore {
    /// Compiled-in defaults only.
    pub fn embedded() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// Pick up user replacements: for every known key, a readable
    /// `<stem>.md` in `override_dir` shadows the embedded default.
    /// Unrelated files in the directory are ignored.
    pub fn load(override_dir: Option<&Path>) -> Self {
        let mut overrides = HashMap::new();
        if let Some(dir) = override_dir {
            for key in PromptKey::ALL {
                let path = dir.join(key.file_stem()).with_extension("md");
                if let Ok(text) = std::fs::read_to_string(&path) {
                    overrides.insert(key, text);
                }
            }
        }
        Self { overrides }
    }

    /// Template text: the user override when present, else the default.
    pub fn text(&self, key: PromptKey) -> &str {
        match self.overrides.get(&key) {
            Some(text) => text.as_str(),
            None => key.embedded(),
        }
    }

    /// Render a template, filling `{name}` placeholders from `vars`.
    pub fn render(&self, key: PromptKey, vars: &[(&str, &str)]) -> String {
        substitute(self.text(key), vars)
    }

    /// Default override dir: `~/.axon/prompts/`.
    pub fn default_override_dir() -> PathBuf {
        crate::paths::prompts_dir()
    }
}

/// Single left-to-right pass over the template: each `{name}` span is
/// replaced by its value from `vars`; unknown names and unclosed braces
/// pass through untouched. Substituted values are never re-scanned.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        let name = &after[..close];
        match vars.iter().find(|(var, _)| *var == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_has_embedded_text() {
        let store = PromptStore::embedded();
        for key in PromptKey::ALL {
            assert!(!store.text(key).is_empty(), "{:?} is empty", key);
        }
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let out = substitute("hi {name}, {name}! {missing} {", &[("name", "world")]);
        assert_eq!(out, "hi world, world! {missing} {");
    }

    #[test]
    fn test_substituted_values_not_rescanned() {
        // A value containing a placeholder-looking span stays literal.
        let out = substitute("{a} {b}", &[("a", "{b}"), ("b", "two")]);
        assert_eq!(out, "{b} two");
    }

    #[test]
    fn test_render_planner_vars() {
        let store = PromptStore::embedded();
        let out = store.render(
            PromptKey::PlannerSystem,
            &[
                ("tool_catalog", "### now"),
                ("workspace_path", "/tmp/ws"),
                ("datetime", "2026-01-01 00:00 UTC"),
            ],
        );
        assert!(out.contains("### now"));
        assert!(out.contains("/tmp/ws"));
        assert!(!out.contains("{tool_catalog}"));
    }

    #[test]
    fn test_override_file_shadows_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("planner-system.md"), "custom {datetime}").unwrap();
        // Unrelated files are ignored rather than loaded as templates.
        std::fs::write(dir.path().join("README.md"), "not a template").unwrap();
        let store = PromptStore::load(Some(dir.path()));
        assert_eq!(store.text(PromptKey::PlannerSystem), "custom {datetime}");
        assert!(store
            .text(PromptKey::CompactInstruction)
            .contains("compressing"));
    }

    #[test]
    fn test_load_without_dir_is_all_defaults() {
        let store = PromptStore::load(None);
        assert_eq!(
            store.text(PromptKey::TokenReminder),
            PromptStore::embedded().text(PromptKey::TokenReminder)
        );
    }
}
