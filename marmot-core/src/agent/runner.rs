//! The agent loop: alternate model calls and parallel tool execution until
//! the model produces a terminal answer.

use super::{Agent, EventSink, ToolInvocation};
use crate::context::ContextManager;
use crate::error::AgentError;
use crate::event::{tool_summary, AgentEvent, ToolCallStatus};
use crate::provider::{approximate_tokens, ProviderEvent, ProviderRequest, StreamFinal};
use crate::types::{ContentBlock, Message, StopReason};
use futures::StreamExt;

/// Synthetic assistant turn appended when the iteration cap is hit.
pub const MAX_ITERATIONS_MARKER: &str = "[max iterations reached]";

impl Agent {
    pub(super) async fn run_loop(
        &self,
        user_turn: Message,
        session_id: &str,
        sink: &EventSink,
    ) -> Result<(), AgentError> {
        let mut history = self.sessions.load(session_id).await?;
        let mut usage_total = self.sessions.load_usage(session_id).await?;

        let mut ctx = ContextManager::new(
            self.config.context_window(),
            self.config.compact_threshold,
        );
        if !history.is_empty() {
            // Resumed session: seed the counter from a local estimate so a
            // conversation that grew past the threshold in an earlier
            // process still compacts before the first call.
            let request = ProviderRequest::new(history.clone(), self.system_prompt());
            ctx.set_input_count(approximate_tokens(&request));
        }

        history.push(user_turn);

        let mut iterations = 0u32;
        loop {
            if iterations >= self.config.max_iterations {
                tracing::warn!(
                    session_id,
                    max_iterations = self.config.max_iterations,
                    "iteration cap reached"
                );
                history.push(Message::assistant(MAX_ITERATIONS_MARKER));
                self.sessions.save(session_id, &history).await?;
                sink.emit(AgentEvent::Done).await;
                sink.mark_completed().await;
                return Ok(());
            }

            // 1. Compaction check.
            if ctx.should_compact() {
                let system = self.system_prompt();
                match ctx.compact(&mut history, &system, self.provider.as_ref()).await {
                    Ok(report) => {
                        if !sink
                            .emit(AgentEvent::Compact {
                                phase: report.phase,
                                before_tokens: report.before_tokens,
                                after_tokens: report.after_tokens,
                            })
                            .await
                        {
                            return Err(AgentError::Cancelled);
                        }
                        self.sessions.save(session_id, &history).await?;
                    }
                    Err(err) => {
                        // Non-fatal: continue with whatever phase 1 achieved.
                        tracing::warn!(session_id, error = %err, "compaction failed");
                    }
                }
            }

            // 2. Prompt compose.
            let system = self.system_prompt();
            let tools = self.tools.definitions();
            let request = ProviderRequest::new(history.clone(), system)
                .with_tools(tools)
                .with_max_tokens(self.config.provider.max_tokens);

            // 3. Provider call.
            let mut streamed = String::new();
            let mut outcome: Option<StreamFinal> = None;
            {
                let mut stream = self.provider.stream(&request);
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(ProviderEvent::TextDelta { delta }) => {
                            streamed.push_str(&delta);
                            if !sink.emit(AgentEvent::Token { delta }).await {
                                self.persist_partial(&mut history, &streamed, session_id).await;
                                return Err(AgentError::Cancelled);
                            }
                        }
                        Ok(ProviderEvent::Retrying {
                            attempt,
                            max_retries,
                            error_kind,
                        }) => {
                            if !sink
                                .emit(AgentEvent::Retry {
                                    attempt,
                                    max_retries,
                                    error_kind,
                                })
                                .await
                            {
                                self.persist_partial(&mut history, &streamed, session_id).await;
                                return Err(AgentError::Cancelled);
                            }
                        }
                        Ok(ProviderEvent::Final(final_message)) => {
                            outcome = Some(final_message);
                            break;
                        }
                        Err(err) => {
                            self.persist_partial(&mut history, &streamed, session_id).await;
                            return Err(err.into());
                        }
                    }
                }
            }
            let Some(final_message) = outcome else {
                self.persist_partial(&mut history, &streamed, session_id).await;
                return Err(AgentError::Provider(crate::error::ProviderError::Connection {
                    message: "stream ended before completion".to_string(),
                }));
            };

            // 4. Usage accounting.
            ctx.record_usage(&final_message.usage);
            usage_total.add(&final_message.usage);
            self.sessions.save_usage(session_id, &usage_total).await?;

            let invocations: Vec<ToolInvocation> = final_message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect();

            // 5. Terminal decision.
            if final_message.stop_reason != StopReason::ToolUse || invocations.is_empty() {
                history.push(Message::assistant_blocks(final_message.content));
                self.sessions.save(session_id, &history).await?;
                sink.emit(AgentEvent::Done).await;
                sink.mark_completed().await;
                return Ok(());
            }

            // 6. Tool fan-out.
            if !streamed.is_empty() && !sink.emit(AgentEvent::PreambleEnd).await {
                return Err(AgentError::Cancelled);
            }

            history.push(Message::assistant_blocks(final_message.content));

            for call in &invocations {
                let event = AgentEvent::ToolCall {
                    name: call.name.clone(),
                    status: ToolCallStatus::Started,
                    summary: tool_summary(&call.name, &call.input),
                    error: None,
                };
                if !sink.emit(event).await {
                    return Err(AgentError::Cancelled);
                }
            }

            let outcomes = self.tools.execute_many(&invocations).await;

            let mut results = Vec::with_capacity(outcomes.len());
            for (call, outcome) in invocations.iter().zip(outcomes) {
                let status = if outcome.is_error {
                    ToolCallStatus::Failed
                } else {
                    ToolCallStatus::Completed
                };
                let event = AgentEvent::ToolCall {
                    name: call.name.clone(),
                    status,
                    summary: tool_summary(&call.name, &call.input),
                    error: outcome.error_message(),
                };
                if !sink.emit(event).await {
                    return Err(AgentError::Cancelled);
                }
                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: outcome.content,
                    is_error: outcome.is_error,
                });
            }

            history.push(Message::user_blocks(results));
            self.sessions.save(session_id, &history).await?;

            iterations += 1;
        }
    }

    fn system_prompt(&self) -> String {
        match self.skills.read() {
            Ok(skills) => skills.compose(&self.config.system_prompt),
            Err(_) => self.config.system_prompt.clone(),
        }
    }

    /// Persist partial assistant text on error or cancellation, so the
    /// session and any resumed event stream agree on what was generated.
    async fn persist_partial(
        &self,
        history: &mut Vec<Message>,
        streamed: &str,
        session_id: &str,
    ) {
        if !streamed.is_empty() {
            history.push(Message::assistant(streamed));
        }
        if let Err(err) = self.sessions.save(session_id, history).await {
            tracing::warn!(session_id, error = %err, "failed to persist history on abort");
        }
    }
}
