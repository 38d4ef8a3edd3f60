//! Mention parsing and classification.
//!
//! `@name` resolves to a tool (enabled or discoverable), a skill, or an
//! agent keyword; anything else is reported as unknown and otherwise
//! ignored. `#path` references files under the session's `uploads/`
//! directory: a plain path, a directory suffix `/`, a glob, or a recursive
//! `**` pattern. `##` is a Markdown heading, not a file reference.

use crate::engine::tool_registry::ToolRegistry;
use crate::skills::SkillRegistry;
use globset::GlobBuilder;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionKind {
    /// A tool; `needs_loading` when it is discovered but not yet enabled.
    Tool { needs_loading: bool },
    Skill,
    Agent,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionClassification {
    pub name: String,
    pub kind: MentionKind,
}

fn at_mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A leading non-word char (or start of text) keeps email addresses out.
    RE.get_or_init(|| Regex::new(r"(^|[^\w@])@([\w\-]+)").expect("mention pattern is valid"))
}

fn file_mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `#` not preceded by `#` (heading escape), followed by a path that is a
    // file with an extension, a directory `dir/`, or a glob.
    RE.get_or_init(|| {
        Regex::new(
            r"(^|[^#\w])#((?:[\w\-.*]+/)*(?:[\w\-.*]+\.[A-Za-z0-9]{1,5}|[\w\-]+/|\*\*/?|[\w\-]*\*[\w\-.*]*))",
        )
        .expect("file mention pattern is valid")
    })
}

/// Extract `@name` mentions. Returns the unique names in order of first
/// appearance and the text with the `@` markers stripped.
pub fn parse_mentions(text: &str) -> (Vec<String>, String) {
    let re = at_mention_regex();
    let mut seen = Vec::new();
    for caps in re.captures_iter(text) {
        let name = caps[2].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    let cleaned = re.replace_all(text, "$1$2").to_string();
    (seen, collapse_whitespace(&cleaned))
}

/// Extract `#path` file references. Returns the unique patterns in order
/// and the text with the `#` markers stripped.
pub fn parse_file_mentions(text: &str) -> (Vec<String>, String) {
    let re = file_mention_regex();
    let mut seen = Vec::new();
    for caps in re.captures_iter(text) {
        let pattern = caps[2].to_string();
        if !seen.contains(&pattern) {
            seen.push(pattern);
        }
    }
    let cleaned = re.replace_all(text, "$1$2").to_string();
    (seen, collapse_whitespace(&cleaned))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Classify one `@mention`. Priority: enabled tool, discoverable tool,
/// skill, agent keyword, unknown.
pub fn classify_mention(
    name: &str,
    registry: &ToolRegistry,
    skills: &SkillRegistry,
) -> MentionClassification {
    if registry.is_enabled(name) {
        return MentionClassification {
            name: name.to_string(),
            kind: MentionKind::Tool {
                needs_loading: false,
            },
        };
    }
    if registry.is_discovered(name) {
        return MentionClassification {
            name: name.to_string(),
            kind: MentionKind::Tool { needs_loading: true },
        };
    }
    if skills.get(name).is_some() {
        return MentionClassification {
            name: name.to_string(),
            kind: MentionKind::Skill,
        };
    }
    if matches!(
        name.to_ascii_lowercase().as_str(),
        "agent" | "subagent" | "delegate_task"
    ) {
        return MentionClassification {
            name: name.to_string(),
            kind: MentionKind::Agent,
        };
    }
    MentionClassification {
        name: name.to_string(),
        kind: MentionKind::Unknown,
    }
}

pub fn classify_mentions(
    mentions: &[String],
    registry: &ToolRegistry,
    skills: &SkillRegistry,
) -> Vec<MentionClassification> {
    mentions
        .iter()
        .map(|m| classify_mention(m, registry, skills))
        .collect()
}

/// Expand file patterns against `base_dir` (the session `uploads/` root).
/// Returns existing files as sorted, base-relative paths.
pub fn expand_file_patterns(patterns: &[String], base_dir: &Path) -> Vec<String> {
    let mut expanded = Vec::new();
    for pattern in patterns {
        if let Some(dir) = pattern.strip_suffix('/') {
            // Directory: direct children only.
            let dir_path = base_dir.join(dir);
            if let Ok(entries) = std::fs::read_dir(&dir_path) {
                for entry in entries.flatten() {
                    if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        let name = entry.file_name().to_string_lossy().to_string();
                        if !name.starts_with('.') {
                            push_unique(&mut expanded, format!("{}/{}", dir, name));
                        }
                    }
                }
            }
        } else if pattern.contains('*') {
            // `*` must not cross directory separators; `**` still recurses.
            let Ok(glob) = GlobBuilder::new(pattern).literal_separator(true).build() else {
                continue;
            };
            let matcher = glob.compile_matcher();
            for file in walk_files(base_dir, base_dir) {
                if matcher.is_match(&file) {
                    push_unique(&mut expanded, file);
                }
            }
        } else if base_dir.join(pattern).is_file() {
            push_unique(&mut expanded, pattern.clone());
        }
    }
    expanded.sort();
    expanded
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn walk_files(base: &Path, dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            files.extend(walk_files(base, &path));
        } else if let Ok(rel) = path.strip_prefix(base) {
            files.push(rel.to_string_lossy().to_string());
        }
    }
    files
}

/// Human-readable file size for upload reminders.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}
