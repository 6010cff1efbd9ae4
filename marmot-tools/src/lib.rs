//! marmot-tools — tool registry, pagination, MCP adapter, built-in tools.
//!
//! The registry enforces the tool-naming contract, validates arguments
//! against each tool's JSON Schema, executes calls in parallel, and
//! paginates oversized string results through the `read_more` tool.

pub mod mcp;
pub mod pagination;
pub mod registry;
pub mod subagent;

pub use mcp::{McpClient, McpToolAdapter, McpToolInfo, MCP_NAME_SEPARATOR};
pub use pagination::{PageError, PaginationStore};
pub use registry::{
    FnTool, ToolDefinition, ToolHandler, ToolOutput, ToolRegistry, ToolRegistryOptions,
    ToolSource, MAX_RESULT_CHARS, READ_MORE_TOOL_NAME,
};
pub use subagent::{SubagentTool, SUBAGENT_TOOL_NAME};
