//! Human-in-the-loop approval engine.
//!
//! Decides, for a pending `(tool_name, args)` pair, whether execution needs
//! human confirmation. Four layers are consulted in priority order, first
//! hit wins:
//!
//! 1. a custom checker registered in code for this tool,
//! 2. global risk patterns (critical → high → medium → low),
//! 3. per-tool patterns from the rules file, in declared order,
//! 4. builtin fallbacks for known-risky tools.
//!
//! The engine only decides; it never executes anything. Given fixed rules
//! and checkers, the same input always yields the same decision.

use crate::config::HitlRules;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::warn;

pub const SEVERITY_ORDER: [&str; 4] = ["critical", "high", "medium", "low"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub needs_approval: bool,
    pub reason: String,
    pub risk_level: String,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            needs_approval: false,
            reason: String::new(),
            risk_level: "low".to_string(),
        }
    }

    pub fn require(reason: impl Into<String>, risk_level: impl Into<String>) -> Self {
        Self {
            needs_approval: true,
            reason: reason.into(),
            risk_level: risk_level.into(),
        }
    }
}

/// Programmatic per-tool checker; overrides every rule layer.
pub type RiskChecker = dyn Fn(&JsonValue) -> Decision + Send + Sync;

struct CompiledGroup {
    level: String,
    patterns: Vec<Regex>,
    reason: String,
    action: String,
}

struct CompiledToolRules {
    enabled: bool,
    groups: Vec<CompiledGroup>,
    actions: HashMap<String, String>,
}

pub struct ApprovalEngine {
    global: Vec<CompiledGroup>,
    tools: HashMap<String, CompiledToolRules>,
    checkers: HashMap<String, Box<RiskChecker>>,
    builtin_command: Vec<(Regex, String, &'static str)>,
    builtin_medium_command: Vec<Regex>,
    builtin_private_hosts: Vec<Regex>,
}

impl ApprovalEngine {
    pub fn new(rules: HitlRules) -> Self {
        let mut global = Vec::new();
        // Fixed severity order for the global layer.
        for level in SEVERITY_ORDER {
            if let Some(group) = rules.global.risk_patterns.get(level) {
                if group.action != "require_approval" {
                    continue;
                }
                global.push(CompiledGroup {
                    level: level.to_string(),
                    patterns: compile_patterns(&group.patterns, level),
                    reason: group
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("matched global {} risk pattern", level)),
                    action: group.action.clone(),
                });
            }
        }

        let mut tools = HashMap::new();
        for (name, tool_rules) in &rules.tools {
            let groups = tool_rules
                .patterns
                .iter()
                .map(|rule| CompiledGroup {
                    level: rule.level.clone(),
                    patterns: compile_patterns(&rule.patterns, &rule.level),
                    reason: rule.reason.clone().unwrap_or_else(|| {
                        format!("matched {} risk pattern for {}", rule.level, name)
                    }),
                    action: String::new(),
                })
                .collect();
            tools.insert(
                name.clone(),
                CompiledToolRules {
                    enabled: tool_rules.enabled,
                    groups,
                    actions: tool_rules.actions.clone(),
                },
            );
        }

        let builtin_command = [
            (r"\brm\s+-rf\b", "rm -rf"),
            (r"\bsudo\b", "sudo"),
            (r"\bchmod\s+777\b", "chmod 777"),
            (r"\bmkfs\b", "mkfs"),
            (r"\bdd\b.*\bif=/dev/", "dd from a device"),
            (r">\s*/dev/", "redirection into a device"),
        ]
        .into_iter()
        .map(|(pattern, label)| {
            (
                Regex::new(&format!("(?i){}", pattern)).expect("builtin pattern is valid"),
                format!("detected high-risk {}", label),
                label,
            )
        })
        .collect();

        let builtin_medium_command = [
            r"\bcurl\b",
            r"\bwget\b",
            r"\bgit\s+clone\b",
            r"\bpip\s+install\b",
            r"\bnpm\s+install\b",
        ]
        .into_iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("builtin pattern is valid"))
        .collect();

        let builtin_private_hosts = [
            r"localhost",
            r"127\.0\.0\.1",
            r"192\.168\.",
            r"\b10\.",
            r"172\.(1[6-9]|2[0-9]|3[0-1])\.",
        ]
        .into_iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("builtin pattern is valid"))
        .collect();

        Self {
            global,
            tools,
            checkers: HashMap::new(),
            builtin_command,
            builtin_medium_command,
            builtin_private_hosts,
        }
    }

    /// Register a custom checker for one tool; highest priority layer.
    pub fn register_checker(
        &mut self,
        tool_name: &str,
        checker: impl Fn(&JsonValue) -> Decision + Send + Sync + 'static,
    ) {
        self.checkers.insert(tool_name.to_string(), Box::new(checker));
    }

    /// Decide whether `(tool_name, args)` needs human approval.
    pub fn check(&self, tool_name: &str, args: &JsonValue) -> Decision {
        // 1. Custom checker wins outright.
        if let Some(checker) = self.checkers.get(tool_name) {
            return checker(args);
        }

        let args_text = stringify_args(args);

        // 2. Global risk patterns, severity order.
        for group in &self.global {
            if group.action != "require_approval" {
                continue;
            }
            if group.patterns.iter().any(|re| re.is_match(&args_text)) {
                return Decision::require(group.reason.clone(), group.level.clone());
            }
        }

        // 3. Per-tool rules, declared order.
        if let Some(tool_rules) = self.tools.get(tool_name) {
            if tool_rules.enabled {
                for group in &tool_rules.groups {
                    let action = tool_rules
                        .actions
                        .get(&group.level)
                        .map(|s| s.as_str())
                        .unwrap_or("require_approval");
                    if action != "require_approval" {
                        continue;
                    }
                    if group.patterns.iter().any(|re| re.is_match(&args_text)) {
                        return Decision::require(group.reason.clone(), group.level.clone());
                    }
                }
            }
        }

        // 4. Builtins for known-risky tools.
        self.check_builtin(tool_name, args)
    }

    fn check_builtin(&self, tool_name: &str, args: &JsonValue) -> Decision {
        match tool_name {
            "run_command" => {
                let command = args
                    .get("command")
                    .or_else(|| args.get("cmd"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                for (re, reason, _) in &self.builtin_command {
                    if re.is_match(command) {
                        return Decision::require(reason.clone(), "high");
                    }
                }
                for re in &self.builtin_medium_command {
                    if re.is_match(command) {
                        return Decision::require("detected network/install operation", "medium");
                    }
                }
                Decision::allow()
            }
            "http_fetch" => {
                let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("");
                for re in &self.builtin_private_hosts {
                    if re.is_match(url) {
                        return Decision::require(
                            "target resolves to a local/private address",
                            "medium",
                        );
                    }
                }
                Decision::allow()
            }
            _ => Decision::allow(),
        }
    }
}

/// All argument values joined with spaces, the text the pattern layers scan.
fn stringify_args(args: &JsonValue) -> String {
    match args {
        JsonValue::Object(map) => map
            .values()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compile_patterns(patterns: &[String], level: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Ignoring invalid {} risk pattern '{}': {}", level, p, e);
                None
            }
        })
        .collect()
}
