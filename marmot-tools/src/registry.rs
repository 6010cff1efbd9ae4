//! Tool registry: registration, schema validation, dispatch, pagination.
//!
//! Names are unique per registry; a second registration fails with
//! `DuplicateToolError`. Arguments are validated against the declared JSON
//! Schema before the handler runs. Oversized string results are paginated
//! through the scratch store and the auto-registered `read_more` tool.

use crate::pagination::{PageError, PaginationStore};
use async_trait::async_trait;
use indexmap::IndexMap;
use jsonschema::Validator;
use marmot_core::agent::{ToolDispatcher, ToolOutcome};
use marmot_core::error::{DuplicateToolError, ToolError};
use marmot_core::types::{ContentBlock, ToolDef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Default cap on un-paginated string results, in characters.
pub const MAX_RESULT_CHARS: usize = 50_000;

/// Name of the auto-registered pagination tool.
pub const READ_MORE_TOOL_NAME: &str = "read_more";

/// Where a tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Native,
    Skill,
    Mcp,
    Subagent,
}

/// What a handler hands back: a string (subject to pagination) or content
/// blocks (passed through verbatim).
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A tool implementation. Input arrives already validated against the
/// declared schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError>;
}

/// Adapter for closure-based tools.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        (self.0)(input).await
    }
}

/// A tool as supplied by the integrator.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }
}

/// Registry options.
#[derive(Debug, Clone)]
pub struct ToolRegistryOptions {
    pub max_result_chars: usize,
}

impl Default for ToolRegistryOptions {
    fn default() -> Self {
        Self {
            max_result_chars: MAX_RESULT_CHARS,
        }
    }
}

struct RegisteredTool {
    def: ToolDef,
    handler: Arc<dyn ToolHandler>,
    validator: Option<Arc<Validator>>,
    source: ToolSource,
}

/// Tool registration and dispatch.
///
/// Registration order is preserved: the model sees tools in the order they
/// were added.
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, RegisteredTool>>,
    pagination: Arc<PaginationStore>,
    max_result_chars: usize,
}

impl ToolRegistry {
    pub fn new(options: ToolRegistryOptions) -> Self {
        let registry = Self {
            tools: RwLock::new(IndexMap::new()),
            pagination: Arc::new(PaginationStore::new()),
            max_result_chars: options.max_result_chars,
        };
        registry.register_read_more();
        registry
    }

    fn register_read_more(&self) {
        let handler = Arc::new(ReadMoreTool {
            store: Arc::clone(&self.pagination),
        });
        let def = ToolDefinition::new(
            READ_MORE_TOOL_NAME,
            "Fetch another page of a paginated tool result.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "result_id": {"type": "string"},
                    "page": {"type": "integer", "minimum": 1},
                },
                "required": ["result_id", "page"],
            }),
            handler,
        );
        // The registry is empty here; the name cannot collide.
        let _ = self.register_tagged(def, ToolSource::Native);
    }

    /// Register a tool from the integrator (source `native`).
    pub fn register(&self, def: ToolDefinition) -> Result<(), DuplicateToolError> {
        self.register_tagged(def, ToolSource::Native)
    }

    /// Register a tool with an explicit source tag. Used by the MCP
    /// adapter, skill bindings, and the subagent tool.
    pub fn register_tagged(
        &self,
        def: ToolDefinition,
        source: ToolSource,
    ) -> Result<(), DuplicateToolError> {
        let mut tools = self.tools.write().unwrap();
        if tools.contains_key(&def.name) {
            return Err(DuplicateToolError { name: def.name });
        }

        let validator = match Validator::new(&def.input_schema) {
            Ok(validator) => Some(Arc::new(validator)),
            Err(err) => {
                tracing::warn!(tool = %def.name, error = %err, "schema failed to compile");
                None
            }
        };

        tracing::debug!(tool = %def.name, ?source, "tool registered");
        tools.insert(
            def.name.clone(),
            RegisteredTool {
                def: ToolDef {
                    name: def.name,
                    description: def.description,
                    input_schema: def.input_schema,
                },
                handler: def.handler,
                validator,
                source,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    pub fn source_of(&self, name: &str) -> Option<ToolSource> {
        self.tools.read().unwrap().get(name).map(|t| t.source)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.read().unwrap().keys().cloned().collect()
    }

    /// Drop all pagination scratch entries.
    pub fn clear_pagination_store(&self) {
        self.pagination.clear();
    }

    pub fn pagination_store(&self) -> &Arc<PaginationStore> {
        &self.pagination
    }

    /// Wrap a string result, paginating when it exceeds the cap.
    fn finish_text(&self, text: String) -> ToolOutcome {
        if text.chars().count() <= self.max_result_chars {
            return ToolOutcome::text(text);
        }
        let result_id = self.pagination.insert(text, self.max_result_chars);
        match self.pagination.page(&result_id, 1) {
            Ok(first_page) => ToolOutcome::text(first_page),
            Err(_) => ToolOutcome::error("paginated result vanished"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolRegistryOptions::default())
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.def.clone())
            .collect()
    }

    async fn execute(&self, name: &str, input: &Value) -> ToolOutcome {
        // Clone what the call needs so no lock is held across await.
        let (handler, validator) = {
            let tools = self.tools.read().unwrap();
            let Some(tool) = tools.get(name) else {
                return ToolOutcome::error(format!("tool not found: {name}"));
            };
            (Arc::clone(&tool.handler), tool.validator.clone())
        };

        if let Some(validator) = validator {
            let errors: Vec<String> = validator
                .iter_errors(input)
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            if !errors.is_empty() {
                return ToolOutcome::error(format!(
                    "invalid arguments for tool '{name}': {}",
                    errors.join("; ")
                ));
            }
        }

        match handler.call(input.clone()).await {
            Ok(ToolOutput::Text(text)) => self.finish_text(text),
            Ok(ToolOutput::Blocks(blocks)) => ToolOutcome::blocks(blocks),
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool execution failed");
                ToolOutcome::error(err)
            }
        }
    }
}

/// The auto-registered pagination tool.
struct ReadMoreTool {
    store: Arc<PaginationStore>,
}

#[async_trait]
impl ToolHandler for ReadMoreTool {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let result_id = input["result_id"].as_str().unwrap_or_default();
        let page = input["page"].as_u64().unwrap_or_default() as usize;

        match self.store.page(result_id, page) {
            Ok(text) => Ok(ToolOutput::Text(text)),
            Err(PageError::NotFound) => {
                Err(ToolError::execution_failed("result not found or expired"))
            }
            Err(PageError::OutOfRange) => Err(ToolError::execution_failed("page out of range")),
        }
    }
}
