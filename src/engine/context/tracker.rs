//! Token usage tracking and threshold classification.

use crate::config::ContextConfig;
use crate::prompts::{PromptKey, PromptStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Normal,
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    Compact,
    Summarize,
}

#[derive(Debug, Clone)]
pub struct ContextStatus {
    pub cumulative_prompt_tokens: usize,
    pub context_window: usize,
    pub usage_ratio: f64,
    pub level: UsageLevel,
    /// True only at `critical`; forces the compression route.
    pub needs_compression: bool,
    pub strategy: CompressionStrategy,
}

/// Classifies cumulative prompt-token usage against a model's context
/// window and recommends a compression strategy.
pub struct TokenTracker {
    config: ContextConfig,
}

impl TokenTracker {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, usage_ratio: f64) -> UsageLevel {
        if !self.config.enabled {
            return UsageLevel::Normal;
        }
        if usage_ratio >= self.config.force_compact_threshold {
            UsageLevel::Critical
        } else if usage_ratio >= self.config.strong_warning_threshold {
            UsageLevel::Warning
        } else if usage_ratio >= self.config.warning_threshold {
            UsageLevel::Info
        } else {
            UsageLevel::Normal
        }
    }

    /// Current status for a session. `compact_count` and
    /// `last_compression_ratio` feed the strategy escalation cycle.
    pub fn status(
        &self,
        cumulative_prompt_tokens: usize,
        context_window: usize,
        compact_count: usize,
        last_compression_ratio: Option<f64>,
    ) -> ContextStatus {
        let usage_ratio = if context_window > 0 {
            cumulative_prompt_tokens as f64 / context_window as f64
        } else {
            0.0
        };
        let level = self.classify(usage_ratio);
        ContextStatus {
            cumulative_prompt_tokens,
            context_window,
            usage_ratio,
            level,
            needs_compression: level == UsageLevel::Critical,
            strategy: self.recommend_strategy(level, compact_count, last_compression_ratio),
        }
    }

    /// `compact` by default; escalate to `summarize` when compaction has
    /// stopped paying off: critical usage, a previous compression that
    /// shrank poorly (> 0.4 output/input), or every Nth consecutive
    /// compaction.
    pub fn recommend_strategy(
        &self,
        level: UsageLevel,
        compact_count: usize,
        last_compression_ratio: Option<f64>,
    ) -> CompressionStrategy {
        if level == UsageLevel::Critical {
            return CompressionStrategy::Summarize;
        }
        if last_compression_ratio.map(|r| r > 0.4).unwrap_or(false) {
            return CompressionStrategy::Summarize;
        }
        let cycle = self.config.summarize_cycle.max(1);
        if (compact_count + 1) % cycle == 0 {
            return CompressionStrategy::Summarize;
        }
        CompressionStrategy::Compact
    }

    /// Advisory system-reminder shown at `info` and `warning`; `None` at
    /// `normal` (nothing to say) and `critical` (compression is forced
    /// instead of advised).
    pub fn reminder_text(&self, prompts: &PromptStore, status: &ContextStatus) -> Option<String> {
        let level = match status.level {
            UsageLevel::Info => "notice",
            UsageLevel::Warning => "warning",
            _ => return None,
        };
        let strategy = match status.strategy {
            CompressionStrategy::Compact => "compact",
            CompressionStrategy::Summarize => "summarize",
        };
        Some(prompts.render(
            PromptKey::TokenReminder,
            &[
                ("level", level),
                ("used", &status.cumulative_prompt_tokens.to_string()),
                ("total", &status.context_window.to_string()),
                ("percent", &format!("{:.0}", status.usage_ratio * 100.0)),
                ("strategy", strategy),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TokenTracker {
        TokenTracker::new(ContextConfig::default())
    }

    #[test]
    fn test_boundary_ratios() {
        let t = tracker();
        assert_eq!(t.classify(0.749), UsageLevel::Normal);
        assert_eq!(t.classify(0.75), UsageLevel::Info);
        assert_eq!(t.classify(0.85), UsageLevel::Warning);
        assert_eq!(t.classify(0.95), UsageLevel::Critical);
        assert_eq!(t.classify(0.9499), UsageLevel::Warning);
    }

    #[test]
    fn test_disabled_always_normal() {
        let mut config = ContextConfig::default();
        config.enabled = false;
        let t = TokenTracker::new(config);
        assert_eq!(t.classify(0.99), UsageLevel::Normal);
    }

    #[test]
    fn test_status_critical_sets_needs_compression() {
        let t = tracker();
        // 123000 / 128000 ≈ 0.96
        let status = t.status(123_000, 128_000, 0, None);
        assert_eq!(status.level, UsageLevel::Critical);
        assert!(status.needs_compression);
        assert_eq!(status.strategy, CompressionStrategy::Summarize);
    }

    #[test]
    fn test_strategy_default_compact() {
        let t = tracker();
        let s = t.recommend_strategy(UsageLevel::Info, 0, None);
        assert_eq!(s, CompressionStrategy::Compact);
    }

    #[test]
    fn test_strategy_escalates_on_poor_ratio() {
        let t = tracker();
        let s = t.recommend_strategy(UsageLevel::Info, 0, Some(0.5));
        assert_eq!(s, CompressionStrategy::Summarize);
    }

    #[test]
    fn test_strategy_escalates_every_nth_compaction() {
        let t = tracker(); // summarize_cycle = 3
        assert_eq!(
            t.recommend_strategy(UsageLevel::Info, 1, None),
            CompressionStrategy::Compact
        );
        // Third consecutive compaction (count 2 means this is the 3rd).
        assert_eq!(
            t.recommend_strategy(UsageLevel::Info, 2, None),
            CompressionStrategy::Summarize
        );
    }

    #[test]
    fn test_reminder_only_at_info_and_warning() {
        let t = tracker();
        let prompts = PromptStore::load(None);
        let normal = t.status(1_000, 128_000, 0, None);
        assert!(t.reminder_text(&prompts, &normal).is_none());
        let info = t.status(100_000, 128_000, 0, None);
        let text = t.reminder_text(&prompts, &info).unwrap();
        assert!(text.contains("100000"));
        assert!(text.contains("compact"));
        let critical = t.status(125_000, 128_000, 0, None);
        assert!(t.reminder_text(&prompts, &critical).is_none());
    }
}
