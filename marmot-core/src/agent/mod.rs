//! Agent — the conversational loop orchestrator.
//!
//! The `Agent` ties together the provider, tool dispatcher, skill registry,
//! and session backend, and drives the model-call / tool-execution loop.
//! Each `stream_message` call runs in its own task; the caller consumes a
//! lazy event stream whose pace back-pressures the loop.

mod runner;

use crate::config::AgentCoreConfig;
use crate::error::AgentError;
use crate::event::AgentEvent;
use crate::event_store::EventStore;
use crate::provider::Provider;
use crate::session::SessionBackend;
use crate::skills::SkillRegistry;
use crate::types::{
    ContentBlock, MediaSource, Message, MessageContent, ToolDef, ToolResultContent,
    MAX_DOCUMENT_BYTES, MAX_IMAGE_BYTES,
};
use futures::Stream;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Capacity of the event channel between the loop task and the caller.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One tool call requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Result of one tool execution. Failures are data, not errors: the loop
/// reports them back to the model and continues.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: ToolResultContent,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: ToolResultContent::Text(content.into()),
            is_error: false,
        }
    }

    pub fn blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            content: ToolResultContent::Blocks(blocks),
            is_error: false,
        }
    }

    /// Uniform error wrapping: the model sees `error: <message>`.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: ToolResultContent::Text(format!("error: {message}")),
            is_error: true,
        }
    }

    /// Short error message for the `tool_call` event, if this is an error.
    pub fn error_message(&self) -> Option<String> {
        self.is_error.then(|| self.content.as_text())
    }
}

/// Tool dispatch as seen by the loop.
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Definitions presented to the model.
    fn definitions(&self) -> Vec<ToolDef>;

    /// Execute one call. Never fails upward: handler errors become error
    /// outcomes.
    async fn execute(&self, name: &str, input: &Value) -> ToolOutcome;

    /// Execute all calls concurrently, returning outcomes in input order.
    async fn execute_many(&self, calls: &[ToolInvocation]) -> Vec<ToolOutcome> {
        let futures: Vec<_> = calls
            .iter()
            .map(|call| self.execute(&call.name, &call.input))
            .collect();
        futures::future::join_all(futures).await
    }
}

/// A dispatcher view with some tools removed. Used to hand sub-agents the
/// parent's toolset minus the spawn tool itself.
pub struct FilteredDispatcher {
    inner: Arc<dyn ToolDispatcher>,
    excluded: HashSet<String>,
}

impl FilteredDispatcher {
    pub fn excluding(
        inner: Arc<dyn ToolDispatcher>,
        excluded: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            inner,
            excluded: excluded.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for FilteredDispatcher {
    fn definitions(&self) -> Vec<ToolDef> {
        self.inner
            .definitions()
            .into_iter()
            .filter(|def| !self.excluded.contains(&def.name))
            .collect()
    }

    async fn execute(&self, name: &str, input: &Value) -> ToolOutcome {
        if self.excluded.contains(name) {
            return ToolOutcome::error(format!("tool not found: {name}"));
        }
        self.inner.execute(name, input).await
    }
}

/// Dispatcher with no tools; every call reports not-found.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDispatcher;

#[async_trait::async_trait]
impl ToolDispatcher for EmptyDispatcher {
    fn definitions(&self) -> Vec<ToolDef> {
        Vec::new()
    }

    async fn execute(&self, name: &str, _input: &Value) -> ToolOutcome {
        ToolOutcome::error(format!("tool not found: {name}"))
    }
}

/// User input to `stream_message`: plain text or mixed content blocks.
#[derive(Debug, Clone)]
pub enum UserInput {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentBlock>> for UserInput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

impl UserInput {
    /// Validate and convert into a user turn.
    fn into_message(self) -> Result<Message, AgentError> {
        match self {
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(AgentError::InvalidInput(
                        "message must not be blank".to_string(),
                    ));
                }
                Ok(Message::user(trimmed))
            }
            Self::Blocks(blocks) => {
                if blocks.is_empty() {
                    return Err(AgentError::InvalidInput(
                        "message must contain at least one block".to_string(),
                    ));
                }
                for block in &blocks {
                    validate_input_block(block)?;
                }
                Ok(Message {
                    role: crate::types::Role::User,
                    content: MessageContent::Blocks(blocks),
                })
            }
        }
    }
}

/// Attachment limits are enforced here, at the input boundary.
fn validate_input_block(block: &ContentBlock) -> Result<(), AgentError> {
    match block {
        ContentBlock::Text { .. } => Ok(()),
        ContentBlock::Image { source } => {
            if let MediaSource::Base64 { media_type, data } = source {
                let size = (data.len() as u64 / 4) * 3;
                if size > MAX_IMAGE_BYTES {
                    return Err(AgentError::InvalidInput(format!(
                        "image attachment exceeds {MAX_IMAGE_BYTES} bytes"
                    )));
                }
                if !media_type.starts_with("image/") {
                    return Err(AgentError::InvalidInput(format!(
                        "unsupported image media type: {media_type}"
                    )));
                }
            }
            Ok(())
        }
        ContentBlock::Document { source } => {
            if let MediaSource::Base64 { media_type, data } = source {
                let size = (data.len() as u64 / 4) * 3;
                if size > MAX_DOCUMENT_BYTES {
                    return Err(AgentError::InvalidInput(format!(
                        "document attachment exceeds {MAX_DOCUMENT_BYTES} bytes"
                    )));
                }
                if media_type != "application/pdf" {
                    return Err(AgentError::InvalidInput(format!(
                        "unsupported document media type: {media_type}"
                    )));
                }
            }
            Ok(())
        }
        ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => {
            Err(AgentError::InvalidInput(
                "tool blocks are not valid user input".to_string(),
            ))
        }
    }
}

/// The agent: immutable capability bundle, one loop task per call.
#[derive(Clone)]
pub struct Agent {
    pub(crate) config: AgentCoreConfig,
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) tools: Arc<dyn ToolDispatcher>,
    pub(crate) skills: Arc<RwLock<SkillRegistry>>,
    pub(crate) sessions: Arc<dyn SessionBackend>,
    pub(crate) event_store: Option<Arc<dyn EventStore>>,
}

impl Agent {
    pub fn new(
        config: AgentCoreConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolDispatcher>,
        sessions: Arc<dyn SessionBackend>,
    ) -> Self {
        Self {
            config,
            provider,
            tools,
            skills: Arc::new(RwLock::new(SkillRegistry::new())),
            sessions,
            event_store: None,
        }
    }

    pub fn with_skills(mut self, skills: Arc<RwLock<SkillRegistry>>) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn config(&self) -> &AgentCoreConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn tools(&self) -> &Arc<dyn ToolDispatcher> {
        &self.tools
    }

    pub fn skills(&self) -> &Arc<RwLock<SkillRegistry>> {
        &self.skills
    }

    pub fn sessions(&self) -> &Arc<dyn SessionBackend> {
        &self.sessions
    }

    /// Send a user turn and stream the resulting events.
    ///
    /// The loop runs in a background task; dropping the returned stream
    /// cancels it at the next suspension point. When `stream_id` is
    /// non-empty and an event store is configured, every event is also
    /// appended there before it is delivered.
    pub fn stream_message(
        &self,
        input: impl Into<UserInput>,
        session_id: impl Into<String>,
        stream_id: Option<String>,
    ) -> Result<impl Stream<Item = AgentEvent> + Send + 'static, AgentError> {
        let message = input.into().into_message()?;
        let session_id = session_id.into();
        let stream_id = stream_id.filter(|s| !s.is_empty());

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let sink = EventSink {
            tx,
            store: stream_id.as_ref().and(self.event_store.clone()),
            stream_id,
        };

        let agent = self.clone();
        tokio::spawn(async move {
            agent.drive(message, session_id, sink).await;
        });

        Ok(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    async fn drive(self, message: Message, session_id: String, sink: EventSink) {
        match self.run_loop(message, &session_id, &sink).await {
            Ok(()) => {}
            Err(AgentError::Cancelled) => {
                tracing::debug!(session_id, "run cancelled by caller");
                sink.mark_failed().await;
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "run failed");
                sink.emit(AgentEvent::Error {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                })
                .await;
                sink.mark_failed().await;
            }
        }
    }
}

/// Fan-out point for emitted events: event store first (synchronous with
/// emission), then the caller's channel. A closed channel signals
/// cancellation to the loop.
pub(crate) struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    store: Option<Arc<dyn EventStore>>,
    stream_id: Option<String>,
}

impl EventSink {
    /// Returns false when the caller has gone away.
    pub(crate) async fn emit(&self, event: AgentEvent) -> bool {
        if let (Some(store), Some(stream_id)) = (&self.store, &self.stream_id) {
            if let Err(err) = store
                .append(stream_id, event.kind(), event.data_json())
                .await
            {
                tracing::warn!(stream_id, error = %err, "event store append failed");
            }
        }
        self.tx.send(event).await.is_ok()
    }

    pub(crate) async fn mark_completed(&self) {
        if let (Some(store), Some(stream_id)) = (&self.store, &self.stream_id) {
            if let Err(err) = store.mark_completed(stream_id).await {
                tracing::warn!(stream_id, error = %err, "failed to mark stream completed");
            }
        }
    }

    pub(crate) async fn mark_failed(&self) {
        if let (Some(store), Some(stream_id)) = (&self.store, &self.stream_id) {
            if let Err(err) = store.mark_failed(stream_id).await {
                tracing::warn!(stream_id, error = %err, "failed to mark stream failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_input_rejected() {
        assert!(matches!(
            UserInput::from("   \n\t ").into_message(),
            Err(AgentError::InvalidInput(_))
        ));
        assert!(UserInput::from("hello").into_message().is_ok());
    }

    #[test]
    fn test_input_text_is_trimmed() {
        let message = UserInput::from("  hi  ").into_message().unwrap();
        assert_eq!(message.text(), "hi");
    }

    #[test]
    fn test_tool_blocks_rejected_as_input() {
        let input = UserInput::Blocks(vec![ContentBlock::tool_result("tu_1", "x")]);
        assert!(input.into_message().is_err());

        let input = UserInput::Blocks(vec![ContentBlock::ToolUse {
            id: "tu_1".to_string(),
            name: "read".to_string(),
            input: serde_json::json!({}),
        }]);
        assert!(input.into_message().is_err());
    }

    #[test]
    fn test_oversized_image_block_rejected() {
        let input = UserInput::Blocks(vec![ContentBlock::Image {
            source: MediaSource::Base64 {
                media_type: "image/png".to_string(),
                data: "A".repeat(28 * 1024 * 1024),
            },
        }]);
        assert!(input.into_message().is_err());
    }

    #[test]
    fn test_outcome_error_wrapping() {
        let outcome = ToolOutcome::error("boom");
        assert!(outcome.is_error);
        assert_eq!(outcome.content.as_text(), "error: boom");
        assert_eq!(outcome.error_message().unwrap(), "error: boom");

        assert!(ToolOutcome::text("fine").error_message().is_none());
    }

    #[tokio::test]
    async fn test_filtered_dispatcher_hides_excluded() {
        struct OneTool;

        #[async_trait::async_trait]
        impl ToolDispatcher for OneTool {
            fn definitions(&self) -> Vec<ToolDef> {
                vec![
                    ToolDef {
                        name: "keep".to_string(),
                        description: String::new(),
                        input_schema: serde_json::json!({"type": "object"}),
                    },
                    ToolDef {
                        name: "drop".to_string(),
                        description: String::new(),
                        input_schema: serde_json::json!({"type": "object"}),
                    },
                ]
            }

            async fn execute(&self, _name: &str, _input: &Value) -> ToolOutcome {
                ToolOutcome::text("ok")
            }
        }

        let filtered =
            FilteredDispatcher::excluding(Arc::new(OneTool), ["drop".to_string()]);
        let names: Vec<String> = filtered.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["keep"]);

        let outcome = filtered.execute("drop", &serde_json::json!({})).await;
        assert!(outcome.is_error);

        let outcome = filtered.execute("keep", &serde_json::json!({})).await;
        assert!(!outcome.is_error);
    }
}
