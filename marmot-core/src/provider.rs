//! Provider abstraction — one streaming call to an LLM.
//!
//! Each implementation normalizes its backend's streaming protocol into
//! `ProviderEvent`s and its failures into `ProviderError`. Retry with
//! backoff happens inside the provider; the loop only observes the inline
//! `Retrying` notices and the final error.

use crate::error::ProviderError;
use crate::types::{ContentBlock, Message, StopReason, ToolDef, UsageInfo};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// A request to the model.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,
    pub system: String,
    pub tools: Vec<ToolDef>,
    pub max_tokens: u32,
}

impl ProviderRequest {
    pub fn new(messages: Vec<Message>, system: impl Into<String>) -> Self {
        Self {
            messages,
            system: system.into(),
            tools: Vec::new(),
            max_tokens: 8192,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The fully assembled response once a stream finishes.
#[derive(Debug, Clone)]
pub struct StreamFinal {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: UsageInfo,
}

impl StreamFinal {
    /// Concatenated text content of the response.
    pub fn text(&self) -> String {
        let mut buf = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                buf.push_str(text);
            }
        }
        buf
    }

    /// Whether the response requested any tool calls.
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

/// Normalized streaming events from the model.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Incremental text output.
    TextDelta { delta: String },

    /// A transient failure is being retried.
    Retrying {
        attempt: u32,
        max_retries: u32,
        error_kind: &'static str,
    },

    /// Terminal event: the assembled response.
    Final(StreamFinal),
}

/// Boxed event stream returned by `Provider::stream`.
pub type ProviderStream<'a> =
    Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'a>>;

/// Abstraction over LLM backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream a completion. Yields text deltas and retry notices, then
    /// exactly one `Final`. Dropping the stream cancels the call.
    fn stream<'a>(&'a self, request: &'a ProviderRequest) -> ProviderStream<'a>;

    /// Non-streaming completion, used for short responses such as
    /// compaction summaries.
    async fn create(&self, request: &ProviderRequest) -> Result<StreamFinal, ProviderError>;

    /// Count input tokens for a prospective request. Precise when the
    /// backend exposes a counting endpoint, a local approximation otherwise.
    async fn count_tokens(&self, request: &ProviderRequest) -> Result<u64, ProviderError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Local token approximation: serialized JSON length / 4.
///
/// Used by providers as the fallback when the backend has no counting
/// endpoint, and by tests.
pub fn approximate_tokens(request: &ProviderRequest) -> u64 {
    let messages = serde_json::to_string(&request.messages)
        .map(|s| s.len())
        .unwrap_or(0);
    let tools = serde_json::to_string(&request.tools)
        .map(|s| s.len())
        .unwrap_or(0);
    ((messages + tools + request.system.len()) as u64) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_final_text() {
        let response = StreamFinal {
            content: vec![
                ContentBlock::text("Hello "),
                ContentBlock::ToolUse {
                    id: "tu_1".to_string(),
                    name: "read_file".to_string(),
                    input: serde_json::json!({}),
                },
                ContentBlock::text("world"),
            ],
            stop_reason: StopReason::ToolUse,
            usage: UsageInfo::default(),
        };
        assert_eq!(response.text(), "Hello world");
        assert!(response.has_tool_use());
    }

    #[test]
    fn test_approximate_tokens_scales_with_content() {
        let short = ProviderRequest::new(vec![Message::user("hi")], "system");
        let long = ProviderRequest::new(vec![Message::user("hi ".repeat(500))], "system");
        assert!(approximate_tokens(&long) > approximate_tokens(&short));
    }
}
