//! Layered history compression.
//!
//! Partitions the conversation into system / old / middle / recent layers,
//! summarizes the old and middle layers through the model provider, and
//! reassembles `system ++ [old summary?, middle summary?] ++ recent`.
//! System messages are always preserved verbatim and the recent tail stays
//! byte-identical. If the summarization call fails, the compressor discards
//! its work and falls back to plain truncation, so compression is never
//! fatal to the session.

use crate::config::ContextConfig;
use crate::engine::context::{estimate_tokens_for_text, CompressionStrategy};
use crate::engine::message::{clean_history, truncate_safely, Message};
use crate::prompts::{PromptKey, PromptStore};
use crate::provider::ModelProvider;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedStrategy {
    Compact,
    Summarize,
    /// Fallback used when the summarizer call failed.
    EmergencyTruncate,
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub messages: Vec<Message>,
    pub before_count: usize,
    pub after_count: usize,
    /// Output bytes / input bytes over the message text.
    pub ratio: f64,
    pub strategy: AppliedStrategy,
}

impl CompressionOutcome {
    /// One-line report for logs and the snapshot observer.
    pub fn report(&self) -> String {
        let strategy = match self.strategy {
            AppliedStrategy::Compact => "compact",
            AppliedStrategy::Summarize => "summarize",
            AppliedStrategy::EmergencyTruncate => "emergency truncation",
        };
        format!(
            "Context compressed via {}: {} -> {} messages ({:.0}% of original text)",
            strategy,
            self.before_count,
            self.after_count,
            self.ratio * 100.0
        )
    }
}

pub struct Partitions {
    pub system: Vec<Message>,
    pub old: Vec<Message>,
    pub middle: Vec<Message>,
    pub recent: Vec<Message>,
}

pub struct Compressor {
    config: ContextConfig,
}

impl Compressor {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Number of tail messages covering roughly `share` of the context
    /// window by the chars/4 estimate, floored at `min_count`.
    fn count_for_share(
        messages: &[Message],
        context_window: usize,
        share: f64,
        min_count: usize,
    ) -> usize {
        let budget = (context_window as f64 * share) as usize;
        let mut tokens = 0usize;
        let mut count = 0usize;
        for msg in messages.iter().rev() {
            tokens += estimate_tokens_for_text(&msg.text());
            if tokens > budget && count > 0 {
                break;
            }
            count += 1;
        }
        count.max(min_count)
    }

    pub fn partition(
        &self,
        messages: &[Message],
        strategy: CompressionStrategy,
        context_window: usize,
    ) -> Partitions {
        let system: Vec<Message> = messages.iter().filter(|m| m.is_system()).cloned().collect();
        let non_system: Vec<Message> =
            messages.iter().filter(|m| !m.is_system()).cloned().collect();
        let cleaned = clean_history(&non_system);

        let keep = Self::count_for_share(
            &cleaned,
            context_window,
            0.15,
            self.config.keep_recent_messages,
        );
        let recent = truncate_safely(&cleaned, keep);
        let recent_start = cleaned.len() - recent.len();

        let (old, middle) = match strategy {
            CompressionStrategy::Compact => {
                let before_recent = &cleaned[..recent_start];
                let middle_count = Self::count_for_share(
                    before_recent,
                    context_window,
                    0.30,
                    self.config.compact_middle_messages,
                )
                .min(before_recent.len());
                let middle_start = recent_start - middle_count;
                (
                    cleaned[..middle_start].to_vec(),
                    cleaned[middle_start..recent_start].to_vec(),
                )
            }
            CompressionStrategy::Summarize => (cleaned[..recent_start].to_vec(), Vec::new()),
        };

        Partitions {
            system,
            old,
            middle,
            recent,
        }
    }

    /// Compress the history. On summarizer failure this degrades to
    /// [`Compressor::truncate_fallback`] instead of erroring.
    pub async fn compress(
        &self,
        messages: &[Message],
        strategy: CompressionStrategy,
        provider: Arc<dyn ModelProvider>,
        prompts: &PromptStore,
    ) -> CompressionOutcome {
        let before_count = messages.len();
        let before_bytes = text_bytes(messages);
        let parts = self.partition(messages, strategy, provider.context_window());

        match self
            .summarize_partitions(&parts, strategy, provider, prompts)
            .await
        {
            Ok(compressed) => {
                let after_bytes = text_bytes(&compressed);
                let outcome = CompressionOutcome {
                    after_count: compressed.len(),
                    messages: compressed,
                    before_count,
                    ratio: if before_bytes > 0 {
                        after_bytes as f64 / before_bytes as f64
                    } else {
                        1.0
                    },
                    strategy: match strategy {
                        CompressionStrategy::Compact => AppliedStrategy::Compact,
                        CompressionStrategy::Summarize => AppliedStrategy::Summarize,
                    },
                };
                info!("{}", outcome.report());
                outcome
            }
            Err(e) => {
                warn!("Context compression failed, falling back to truncation: {}", e);
                let truncated = self.truncate_fallback(messages);
                let after_bytes = text_bytes(&truncated);
                let outcome = CompressionOutcome {
                    after_count: truncated.len(),
                    messages: truncated,
                    before_count,
                    ratio: if before_bytes > 0 {
                        after_bytes as f64 / before_bytes as f64
                    } else {
                        1.0
                    },
                    strategy: AppliedStrategy::EmergencyTruncate,
                };
                info!("{}", outcome.report());
                outcome
            }
        }
    }

    async fn summarize_partitions(
        &self,
        parts: &Partitions,
        strategy: CompressionStrategy,
        provider: Arc<dyn ModelProvider>,
        prompts: &PromptStore,
    ) -> Result<Vec<Message>> {
        let invoker = provider.bind_tools(Vec::new());
        let cap = Some(self.config.summary_max_completion_tokens);

        let mut compressed: Vec<Message> = parts.system.clone();

        if !parts.old.is_empty() {
            let (key, label) = match strategy {
                CompressionStrategy::Compact => (PromptKey::CompactInstruction, "compact"),
                CompressionStrategy::Summarize => (PromptKey::SummarizeInstruction, "summarize"),
            };
            let mut request = vec![Message::system(prompts.text(key))];
            request.extend(parts.old.iter().cloned());
            let turn = invoker.invoke(&request, cap).await?;
            compressed.push(Message::user_text(format!(
                "[Context summary - {}]\n{}",
                label, turn.content
            )));
        }

        if !parts.middle.is_empty() && strategy == CompressionStrategy::Compact {
            let mut request = vec![Message::system(prompts.text(PromptKey::CompactInstruction))];
            request.extend(parts.middle.iter().cloned());
            let turn = invoker.invoke(&request, cap).await?;
            compressed.push(Message::user_text(format!(
                "[Context summary - compact middle]\n{}",
                turn.content
            )));
        }

        compressed.extend(parts.recent.iter().cloned());
        Ok(compressed)
    }

    /// Emergency truncation: system messages plus the last
    /// `max_history_messages`, with tool-call pairing kept intact.
    pub fn truncate_fallback(&self, messages: &[Message]) -> Vec<Message> {
        let system: Vec<Message> = messages.iter().filter(|m| m.is_system()).cloned().collect();
        let non_system: Vec<Message> =
            messages.iter().filter(|m| !m.is_system()).cloned().collect();
        let cleaned = clean_history(&non_system);
        let recent = truncate_safely(&cleaned, self.config.max_history_messages);
        let mut out = system;
        out.extend(recent);
        out
    }
}

fn text_bytes(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.text().len()).sum()
}
