//! The built-in `create_subagent` tool.
//!
//! Spawns a child agent for a bounded subtask. The child shares the
//! parent's provider and (through the shared tool handlers) its sandbox,
//! inherits the parent's tools minus `create_subagent` itself, and runs on
//! a fresh session. Only its final text returns to the parent; its events
//! never reach the outer stream.

use crate::registry::{ToolDefinition, ToolHandler, ToolOutput, ToolRegistry, ToolSource};
use async_trait::async_trait;
use futures::StreamExt;
use marmot_core::agent::{Agent, FilteredDispatcher, ToolDispatcher};
use marmot_core::config::AgentCoreConfig;
use marmot_core::error::{DuplicateToolError, ToolError};
use marmot_core::event::AgentEvent;
use marmot_core::provider::Provider;
use marmot_core::session::SessionBackend;
use marmot_core::skills::SkillRegistry;
use marmot_core::types::Role;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock, Weak};

/// Name of the built-in spawn tool.
pub const SUBAGENT_TOOL_NAME: &str = "create_subagent";

/// The spawn tool. Holds a weak registry reference so the registry can own
/// the tool without a reference cycle.
pub struct SubagentTool {
    config: AgentCoreConfig,
    provider: Arc<dyn Provider>,
    registry: Weak<ToolRegistry>,
    skills: Arc<RwLock<SkillRegistry>>,
    sessions: Arc<dyn SessionBackend>,
}

impl SubagentTool {
    /// Build and register the tool into `registry`.
    ///
    /// `sessions` backs the children's scratch histories; each invocation
    /// uses a fresh session id and deletes it afterwards.
    pub fn register(
        registry: &Arc<ToolRegistry>,
        config: AgentCoreConfig,
        provider: Arc<dyn Provider>,
        skills: Arc<RwLock<SkillRegistry>>,
        sessions: Arc<dyn SessionBackend>,
    ) -> Result<(), DuplicateToolError> {
        let tool = Self {
            config,
            provider,
            registry: Arc::downgrade(registry),
            skills,
            sessions,
        };
        registry.register_tagged(
            ToolDefinition::new(
                SUBAGENT_TOOL_NAME,
                "Spawn a sub-agent with a clean conversation to work on a bounded task. \
                 Returns the sub-agent's final answer.",
                json!({
                    "type": "object",
                    "properties": {
                        "task": {
                            "type": "string",
                            "description": "The task for the sub-agent to complete",
                        },
                    },
                    "required": ["task"],
                }),
                Arc::new(tool),
            ),
            ToolSource::Subagent,
        )
    }
}

#[async_trait]
impl ToolHandler for SubagentTool {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let task = input["task"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ToolError::invalid_arguments(SUBAGENT_TOOL_NAME, "task must not be empty")
            })?;

        let registry = self.registry.upgrade().ok_or_else(|| {
            ToolError::execution_failed("tool registry is gone; cannot spawn sub-agent")
        })?;

        // Single level of recursion: the child sees every parent tool
        // except the spawn tool itself.
        let child_tools: Arc<dyn ToolDispatcher> = Arc::new(FilteredDispatcher::excluding(
            registry,
            [SUBAGENT_TOOL_NAME.to_string()],
        ));

        let child = Agent::new(
            self.config.clone(),
            Arc::clone(&self.provider),
            child_tools,
            Arc::clone(&self.sessions),
        )
        .with_skills(Arc::clone(&self.skills));

        let child_session = format!("subagent-{}", uuid::Uuid::new_v4());
        tracing::debug!(session = %child_session, "spawning sub-agent");

        let stream = child
            .stream_message(task, child_session.clone(), None)
            .map_err(|e| ToolError::execution_failed(e.to_string()))?;
        futures::pin_mut!(stream);

        // Run to completion inside this tool call, swallowing the child's
        // event fan-out.
        let mut failure: Option<String> = None;
        while let Some(event) = stream.next().await {
            if let AgentEvent::Error { message, .. } = event {
                failure = Some(message);
            }
        }

        let result = match failure {
            Some(message) => Err(ToolError::execution_failed(format!(
                "sub-agent failed: {message}"
            ))),
            None => {
                let history = self
                    .sessions
                    .load(&child_session)
                    .await
                    .map_err(|e| ToolError::execution_failed(e.to_string()))?;
                let text = history
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| m.text())
                    .unwrap_or_default();
                Ok(ToolOutput::Text(text))
            }
        };

        if let Err(err) = self.sessions.delete(&child_session).await {
            tracing::warn!(session = %child_session, error = %err, "failed to clean up sub-agent session");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FnTool, ToolRegistryOptions};
    use marmot_core::error::ProviderError;
    use marmot_core::provider::{
        approximate_tokens, ProviderEvent, ProviderRequest, ProviderStream, StreamFinal,
    };
    use marmot_core::session::{SessionMeta, StoreError};
    use marmot_core::types::{ContentBlock, Message, StopReason, UsageInfo};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ScriptedProvider {
        turns: Mutex<Vec<Vec<Result<ProviderEvent, ProviderError>>>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn stream<'a>(&'a self, _request: &'a ProviderRequest) -> ProviderStream<'a> {
            let turn = {
                let mut turns = self.turns.lock().unwrap();
                if turns.is_empty() {
                    vec![Err(ProviderError::Other {
                        message: "script exhausted".to_string(),
                    })]
                } else {
                    turns.remove(0)
                }
            };
            Box::pin(futures::stream::iter(turn))
        }

        async fn create(&self, _request: &ProviderRequest) -> Result<StreamFinal, ProviderError> {
            Err(ProviderError::Other {
                message: "not scripted".to_string(),
            })
        }

        async fn count_tokens(&self, request: &ProviderRequest) -> Result<u64, ProviderError> {
            Ok(approximate_tokens(request))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct MemoryBackend {
        sessions: Mutex<HashMap<String, Vec<Message>>>,
        usage: Mutex<HashMap<String, UsageInfo>>,
    }

    #[async_trait]
    impl SessionBackend for MemoryBackend {
        async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn save(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
            self.sessions
                .lock()
                .unwrap()
                .insert(session_id.to_string(), messages.to_vec());
            Ok(())
        }

        async fn reset(&self, session_id: &str) -> Result<(), StoreError> {
            self.sessions.lock().unwrap().remove(session_id);
            Ok(())
        }

        async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
            Ok(Vec::new())
        }

        async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
            self.sessions.lock().unwrap().remove(session_id);
            self.usage.lock().unwrap().remove(session_id);
            Ok(())
        }

        async fn load_usage(&self, session_id: &str) -> Result<UsageInfo, StoreError> {
            Ok(self
                .usage
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<(), StoreError> {
            self.usage
                .lock()
                .unwrap()
                .insert(session_id.to_string(), usage.clone());
            Ok(())
        }

        async fn reset_usage(&self, session_id: &str) -> Result<(), StoreError> {
            self.usage.lock().unwrap().remove(session_id);
            Ok(())
        }
    }

    fn text_turn(text: &str) -> Vec<Result<ProviderEvent, ProviderError>> {
        vec![
            Ok(ProviderEvent::TextDelta {
                delta: text.to_string(),
            }),
            Ok(ProviderEvent::Final(StreamFinal {
                content: vec![ContentBlock::text(text)],
                stop_reason: StopReason::EndTurn,
                usage: UsageInfo::default(),
            })),
        ]
    }

    #[tokio::test]
    async fn test_subagent_returns_final_text_and_cleans_up() {
        let registry = Arc::new(ToolRegistry::new(ToolRegistryOptions::default()));
        let provider = Arc::new(ScriptedProvider {
            turns: Mutex::new(vec![text_turn("the subtask answer")]),
        });
        let sessions = Arc::new(MemoryBackend::default());

        SubagentTool::register(
            &registry,
            AgentCoreConfig::default(),
            provider,
            Arc::new(RwLock::new(SkillRegistry::new())),
            sessions.clone(),
        )
        .unwrap();

        assert_eq!(
            registry.source_of(SUBAGENT_TOOL_NAME),
            Some(ToolSource::Subagent)
        );

        let outcome = registry
            .execute(SUBAGENT_TOOL_NAME, &json!({"task": "do the subtask"}))
            .await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content.as_text(), "the subtask answer");

        // Scratch session removed after the call.
        assert!(sessions.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_child_does_not_see_spawn_tool() {
        let registry = Arc::new(ToolRegistry::new(ToolRegistryOptions::default()));
        registry
            .register(ToolDefinition::new(
                "echo",
                "echo",
                json!({"type": "object"}),
                Arc::new(FnTool(|input: Value| async move {
                    Ok(ToolOutput::Text(
                        input["text"].as_str().unwrap_or_default().to_string(),
                    ))
                })),
            ))
            .unwrap();

        let provider = Arc::new(ScriptedProvider {
            turns: Mutex::new(vec![text_turn("done")]),
        });
        SubagentTool::register(
            &registry,
            AgentCoreConfig::default(),
            provider,
            Arc::new(RwLock::new(SkillRegistry::new())),
            Arc::new(MemoryBackend::default()),
        )
        .unwrap();

        let child_view = FilteredDispatcher::excluding(
            Arc::clone(&registry) as Arc<dyn ToolDispatcher>,
            [SUBAGENT_TOOL_NAME.to_string()],
        );
        let names: Vec<String> = child_view
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(names.contains(&"echo".to_string()));
        assert!(!names.contains(&SUBAGENT_TOOL_NAME.to_string()));
    }

    #[tokio::test]
    async fn test_empty_task_rejected() {
        let registry = Arc::new(ToolRegistry::new(ToolRegistryOptions::default()));
        let provider = Arc::new(ScriptedProvider {
            turns: Mutex::new(vec![]),
        });
        SubagentTool::register(
            &registry,
            AgentCoreConfig::default(),
            provider,
            Arc::new(RwLock::new(SkillRegistry::new())),
            Arc::new(MemoryBackend::default()),
        )
        .unwrap();

        let outcome = registry
            .execute(SUBAGENT_TOOL_NAME, &json!({"task": "   "}))
            .await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn test_child_failure_becomes_tool_error() {
        let registry = Arc::new(ToolRegistry::new(ToolRegistryOptions::default()));
        let provider = Arc::new(ScriptedProvider {
            turns: Mutex::new(vec![vec![Err(ProviderError::Auth {
                message: "no key".to_string(),
            })]]),
        });
        SubagentTool::register(
            &registry,
            AgentCoreConfig::default(),
            provider,
            Arc::new(RwLock::new(SkillRegistry::new())),
            Arc::new(MemoryBackend::default()),
        )
        .unwrap();

        let outcome = registry
            .execute(SUBAGENT_TOOL_NAME, &json!({"task": "try"}))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.content.as_text().contains("sub-agent failed"));
    }
}
