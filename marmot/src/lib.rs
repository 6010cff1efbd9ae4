//! marmot — an embeddable AI agent runtime.
//!
//! Drives a conversational loop between a caller, a streaming LLM
//! provider, and a pluggable toolset: tokens stream to the caller, tool
//! calls fan out in parallel, history stays within a bounded context
//! window through two-phase compaction, sessions persist across restarts,
//! and event streams are resumable after a disconnect.
//!
//! ```no_run
//! use marmot::{AgentBuilder, AgentCoreConfig};
//! use futures::StreamExt;
//!
//! # async fn run() -> Result<(), marmot::AgentError> {
//! let agent = AgentBuilder::new(AgentCoreConfig::default()).build()?;
//! let stream = agent.stream_message("hello", "session-1", None)?;
//! futures::pin_mut!(stream);
//! while let Some(event) = stream.next().await {
//!     println!("{}: {}", event.kind(), event.data_json());
//! }
//! # Ok(())
//! # }
//! ```

mod builder;

pub use builder::AgentBuilder;

pub use marmot_core::{
    build_content_blocks, estimate_cost, tool_summary, Agent, AgentCoreConfig, AgentError,
    AgentEvent, Attachment, CompactReport, ContentBlock, ContextManager, CostSummary,
    SUMMARY_SYSTEM_PROMPT, TRUNCATED_MARKER,
    DuplicateSkillError, DuplicateToolError, EmptyDispatcher, EventStore, EventStoreError,
    ExecResult, FilteredDispatcher, MediaSource, Message, MessageContent, ModelPricing, Provider,
    ProviderConfig, ProviderError, ProviderEvent, ProviderRequest, RetryPolicy, Role, Sandbox,
    SandboxError, SessionBackend, SessionMeta, Skill, SkillRegistry, StopReason, StoreError,
    StreamEvent, StreamFinal, StreamStatus, ToolCallStatus, ToolDef, ToolDispatcher, ToolError,
    ToolInvocation, ToolOutcome, ToolResultContent, UsageInfo, UserInput,
};

pub use marmot_client::{AnthropicProvider, RetryingProvider, ScriptedProvider};

pub use marmot_session::{
    KvSessionBackend, KvStore, MemoryEventStore, MemoryKvStore, MemorySessionBackend,
    SqliteEventStore, SqliteSessionBackend,
};

pub use marmot_tools::{
    FnTool, McpClient, McpToolAdapter, McpToolInfo, PaginationStore, SubagentTool, ToolDefinition,
    ToolHandler, ToolOutput, ToolRegistry, ToolRegistryOptions, ToolSource, MAX_RESULT_CHARS,
    READ_MORE_TOOL_NAME, SUBAGENT_TOOL_NAME,
};
