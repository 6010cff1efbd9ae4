//! MCP client capability and registry adapter.
//!
//! The core treats an MCP server as just another tool source: the adapter
//! lists the server's tools, registers them under `{server}__{tool}`
//! names, and forwards execution back through `call_tool`.

use crate::registry::{ToolDefinition, ToolHandler, ToolOutput, ToolRegistry, ToolSource};
use async_trait::async_trait;
use marmot_core::error::{DuplicateToolError, ToolError};
use serde_json::Value;
use std::sync::Arc;

/// Separator between server prefix and tool name.
pub const MCP_NAME_SEPARATOR: &str = "__";

/// A tool as reported by an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Client for one MCP server.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Server name, used as the tool-name prefix.
    fn server_name(&self) -> &str;

    /// List the server's tools.
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, ToolError>;

    /// Invoke a tool by its unprefixed name.
    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError>;

    /// Close the connection and release resources.
    async fn close(&self) -> Result<(), ToolError>;
}

/// Registers an MCP server's tools into a registry.
pub struct McpToolAdapter {
    client: Arc<dyn McpClient>,
}

impl McpToolAdapter {
    pub fn new(client: Arc<dyn McpClient>) -> Self {
        Self { client }
    }

    /// Register every tool the server reports, prefixed with the server
    /// name. A name collision (two adapters for the same server name)
    /// fails the whole registration.
    pub async fn register_tools(&self, registry: &ToolRegistry) -> Result<(), ToolError> {
        let tools = self.client.list_tools().await?;
        let server = self.client.server_name().to_string();

        for tool in tools {
            let prefixed = format!("{server}{MCP_NAME_SEPARATOR}{}", tool.name);
            let handler = Arc::new(McpToolHandler {
                client: Arc::clone(&self.client),
                tool_name: tool.name.clone(),
            });
            registry
                .register_tagged(
                    ToolDefinition::new(
                        prefixed.clone(),
                        tool.description,
                        tool.input_schema,
                        handler,
                    ),
                    ToolSource::Mcp,
                )
                .map_err(|DuplicateToolError { name }| {
                    ToolError::execution_failed(format!(
                        "tool '{name}' is already registered; rename the MCP server"
                    ))
                })?;
            tracing::debug!(server = %server, tool = %tool.name, registered_as = %prefixed, "MCP tool registered");
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), ToolError> {
        self.client.close().await
    }
}

struct McpToolHandler {
    client: Arc<dyn McpClient>,
    tool_name: String,
}

#[async_trait]
impl ToolHandler for McpToolHandler {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        self.client.call_tool(&self.tool_name, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marmot_core::agent::ToolDispatcher;
    use serde_json::json;

    struct FakeServer {
        name: String,
    }

    #[async_trait]
    impl McpClient for FakeServer {
        fn server_name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<McpToolInfo>, ToolError> {
            Ok(vec![McpToolInfo {
                name: "lookup".to_string(),
                description: "look something up".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                    "required": ["key"],
                }),
            }])
        }

        async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(format!(
                "{name}:{}",
                args["key"].as_str().unwrap_or_default()
            )))
        }

        async fn close(&self) -> Result<(), ToolError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tools_registered_with_prefix_and_source() {
        let registry = ToolRegistry::default();
        let adapter = McpToolAdapter::new(Arc::new(FakeServer {
            name: "kb".to_string(),
        }));
        adapter.register_tools(&registry).await.unwrap();

        assert!(registry.contains("kb__lookup"));
        assert_eq!(registry.source_of("kb__lookup"), Some(ToolSource::Mcp));

        let outcome = registry
            .execute("kb__lookup", &json!({"key": "rust"}))
            .await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content.as_text(), "lookup:rust");
    }

    #[tokio::test]
    async fn test_duplicate_server_name_fails_registration() {
        let registry = ToolRegistry::default();
        let first = McpToolAdapter::new(Arc::new(FakeServer {
            name: "kb".to_string(),
        }));
        first.register_tools(&registry).await.unwrap();

        let second = McpToolAdapter::new(Arc::new(FakeServer {
            name: "kb".to_string(),
        }));
        let err = second.register_tools(&registry).await.unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn test_prefixed_schema_still_validated() {
        let registry = ToolRegistry::default();
        let adapter = McpToolAdapter::new(Arc::new(FakeServer {
            name: "kb".to_string(),
        }));
        adapter.register_tools(&registry).await.unwrap();

        let outcome = registry.execute("kb__lookup", &json!({})).await;
        assert!(outcome.is_error);
        assert!(outcome.content.as_text().contains("invalid arguments"));
    }
}
