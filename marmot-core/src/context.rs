//! Context manager — token accounting and two-phase compaction.
//!
//! Tracks the most recent usage report and, once the context window passes
//! the configured threshold, reclaims space in two phases:
//!
//! 1. Truncate old tool results in place (no model call).
//! 2. Summarize the early conversation through the provider and replace it
//!    with a two-turn summary exchange.
//!
//! Both phases preserve the tool_use/tool_result pairing invariant.

use crate::provider::{approximate_tokens, Provider, ProviderRequest};
use crate::types::{ContentBlock, Message, MessageContent, Role, ToolResultContent, UsageInfo};

/// Replacement content for truncated tool results.
pub const TRUNCATED_MARKER: &str = "[compacted: tool result omitted]";

/// System prompt for the phase-2 summarization call. Part of the behavior
/// contract: it affects token counts and test determinism.
pub const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the conversation so far preserving: user \
goals, key facts discovered, and pending tasks. Omit tool chatter and full file contents.";

/// Prefix of the user turn that carries the summary after phase 2.
pub const SUMMARY_PREFIX: &str = "[Conversation summary] ";

/// Assistant acknowledgement paired with the summary turn.
pub const SUMMARY_ACK: &str = "Understood. Continuing.";

/// Max tokens for the summarization response.
const SUMMARY_MAX_TOKENS: u32 = 2048;

/// Preview length for tool results rendered into the summary request.
const RESULT_PREVIEW_CHARS: usize = 200;

/// Outcome of one compaction pass, carried on the `compact` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactReport {
    /// 1 = tool-result truncation, 2 = LLM summarization.
    pub phase: u8,
    pub before_tokens: u64,
    pub after_tokens: u64,
    /// Number of tool_result blocks replaced in phase 1.
    pub truncated: usize,
}

/// Token accounting plus compaction trigger/execution.
#[derive(Debug, Clone)]
pub struct ContextManager {
    context_window: u64,
    threshold: f64,
    /// Turn-pairs kept verbatim by phase 2.
    keep_recent_pairs: usize,
    last_input_tokens: u64,
    last_output_tokens: u64,
}

impl ContextManager {
    pub fn new(context_window: u64, threshold: f64) -> Self {
        Self {
            context_window,
            threshold,
            keep_recent_pairs: 4,
            last_input_tokens: 0,
            last_output_tokens: 0,
        }
    }

    pub fn with_keep_recent_pairs(mut self, pairs: usize) -> Self {
        self.keep_recent_pairs = pairs;
        self
    }

    /// Update counters from a provider usage report.
    pub fn record_usage(&mut self, usage: &UsageInfo) {
        self.last_input_tokens = usage.input_tokens
            + usage.cache_creation_input_tokens
            + usage.cache_read_input_tokens;
        self.last_output_tokens = usage.output_tokens;
        tracing::debug!(
            context_tokens = self.current_tokens(),
            context_window = self.context_window,
            "token count updated"
        );
    }

    /// Set counters from a precise pre-call count (no output yet).
    pub fn set_input_count(&mut self, input_tokens: u64) {
        self.last_input_tokens = input_tokens;
        self.last_output_tokens = 0;
    }

    /// Estimated context occupancy after the last response.
    pub fn current_tokens(&self) -> u64 {
        self.last_input_tokens + self.last_output_tokens
    }

    /// Fraction of the context window in use (0..1).
    pub fn usage_percent(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        self.current_tokens() as f64 / self.context_window as f64
    }

    /// Whether compaction should run before the next provider call.
    pub fn should_compact(&self) -> bool {
        self.usage_percent() >= self.threshold
    }

    /// Run the compaction flow against `messages` in place.
    ///
    /// Phase 2 only runs when phase 1 did not bring usage back under the
    /// threshold. A provider failure during summarization is returned to
    /// the caller; `messages` keeps the phase-1 truncations in that case.
    pub async fn compact(
        &mut self,
        messages: &mut Vec<Message>,
        system: &str,
        provider: &dyn Provider,
    ) -> Result<CompactReport, crate::error::ProviderError> {
        let before_tokens = self.current_tokens();

        // Phase 1: truncate old tool results.
        let truncated = truncate_tool_results(messages);
        let after_phase1 = self.recount(messages, system, provider).await;
        if truncated > 0 {
            tracing::info!(truncated, after_tokens = after_phase1, "compaction phase 1");
        }
        if self.usage_percent() < self.threshold {
            return Ok(CompactReport {
                phase: 1,
                before_tokens,
                after_tokens: after_phase1,
                truncated,
            });
        }

        // Phase 2: summarize the early conversation.
        let split = summary_split_point(messages, self.keep_recent_pairs);
        if split < 2 {
            // Not enough early history to summarize.
            return Ok(CompactReport {
                phase: 1,
                before_tokens,
                after_tokens: after_phase1,
                truncated,
            });
        }

        let rendered = render_for_summary(&messages[..split]);
        let request = ProviderRequest::new(
            vec![Message::user(format!(
                "Summarize the following conversation:\n\n{rendered}"
            ))],
            SUMMARY_SYSTEM_PROMPT,
        )
        .with_max_tokens(SUMMARY_MAX_TOKENS);

        let summary = provider.create(&request).await?.text();

        let mut rebuilt = Vec::with_capacity(messages.len() - split + 2);
        rebuilt.push(Message::user(format!("{SUMMARY_PREFIX}{summary}")));
        rebuilt.push(Message::assistant(SUMMARY_ACK));
        rebuilt.extend(messages.drain(split..));
        *messages = rebuilt;

        let after_tokens = self.recount(messages, system, provider).await;
        tracing::info!(
            summarized_up_to = split,
            after_tokens,
            "compaction phase 2"
        );

        Ok(CompactReport {
            phase: 2,
            before_tokens,
            after_tokens,
            truncated,
        })
    }

    async fn recount(
        &mut self,
        messages: &[Message],
        system: &str,
        provider: &dyn Provider,
    ) -> u64 {
        let request = ProviderRequest::new(messages.to_vec(), system);
        let tokens = match provider.count_tokens(&request).await {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!(error = %err, "count_tokens failed, using local estimate");
                approximate_tokens(&request)
            }
        };
        self.set_input_count(tokens);
        tokens
    }
}

/// Phase 1: replace the content of every tool_result block with the
/// truncation marker, preserving the final tool-result turn.
///
/// The matching tool_use blocks stay verbatim so pairing holds. Returns the
/// number of blocks truncated.
pub fn truncate_tool_results(messages: &mut [Message]) -> usize {
    let result_turns: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User && has_tool_result(m))
        .map(|(i, _)| i)
        .collect();

    let Some((_last, to_truncate)) = result_turns.split_last() else {
        return 0;
    };

    let mut truncated = 0;
    for &idx in to_truncate {
        if let MessageContent::Blocks(blocks) = &mut messages[idx].content {
            for block in blocks {
                if let ContentBlock::ToolResult { content, .. } = block {
                    if matches!(content, ToolResultContent::Text(t) if t == TRUNCATED_MARKER) {
                        continue;
                    }
                    *content = ToolResultContent::Text(TRUNCATED_MARKER.to_string());
                    truncated += 1;
                }
            }
        }
    }
    truncated
}

fn has_tool_result(message: &Message) -> bool {
    message
        .blocks()
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
}

/// Index at which the "recent" slice begins: the start of the K-th-from-last
/// turn-pair. A turn-pair starts at a user message that is not a tool-result
/// turn, so tool_use/tool_result groups are never split.
fn summary_split_point(messages: &[Message], keep_recent_pairs: usize) -> usize {
    let turn_starts: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User && !has_tool_result(m))
        .map(|(i, _)| i)
        .collect();

    if keep_recent_pairs == 0 {
        return messages.len();
    }
    if turn_starts.len() <= keep_recent_pairs {
        return 0;
    }
    turn_starts[turn_starts.len() - keep_recent_pairs]
}

/// Render messages as plain text for the summarization request.
fn render_for_summary(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let body = match &message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(text.clone()),
                        ContentBlock::ToolUse { name, .. } => {
                            parts.push(format!("[tool call: {name}]"));
                        }
                        ContentBlock::ToolResult { content, .. } => {
                            let text = content.as_text();
                            if text == TRUNCATED_MARKER {
                                parts.push(text);
                            } else {
                                let preview: String =
                                    text.chars().take(RESULT_PREVIEW_CHARS).collect();
                                parts.push(format!("[tool result: {preview}...]"));
                            }
                        }
                        ContentBlock::Image { .. } => parts.push("[image]".to_string()),
                        ContentBlock::Document { .. } => parts.push("[document]".to_string()),
                    }
                }
                parts.join(" ")
            }
        };
        lines.push(format!("{role}: {body}"));
    }
    lines.join("\n")
}
