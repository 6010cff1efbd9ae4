//! Scripted provider for tests.
//!
//! Replays a fixed sequence of streaming turns, one per `stream()` call.
//! Used by loop and scenario tests in place of the network.

use async_trait::async_trait;
use marmot_core::error::ProviderError;
use marmot_core::provider::{
    approximate_tokens, Provider, ProviderEvent, ProviderRequest, ProviderStream, StreamFinal,
};
use marmot_core::types::{ContentBlock, StopReason, UsageInfo};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// One scripted streaming turn: the events `stream()` will yield.
pub type Turn = Vec<Result<ProviderEvent, ProviderError>>;

/// A provider that replays scripted turns.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    create_queue: Mutex<VecDeque<StreamFinal>>,
    create_failures: AtomicU32,
    token_counts: Mutex<VecDeque<u64>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn with_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            create_queue: Mutex::new(VecDeque::new()),
            create_failures: AtomicU32::new(0),
            token_counts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Raw turn from explicit events.
    pub fn turn(events: Vec<Result<ProviderEvent, ProviderError>>) -> Turn {
        events
    }

    /// A turn that streams `deltas` and stops with `end_turn`.
    pub fn text_turn(deltas: &[&str]) -> Turn {
        Self::text_turn_with_usage(
            deltas,
            UsageInfo {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        )
    }

    /// A text turn with an explicit usage report.
    pub fn text_turn_with_usage(deltas: &[&str], usage: UsageInfo) -> Turn {
        let mut events: Turn = deltas
            .iter()
            .map(|delta| {
                Ok(ProviderEvent::TextDelta {
                    delta: (*delta).to_string(),
                })
            })
            .collect();
        events.push(Ok(ProviderEvent::Final(StreamFinal {
            content: vec![ContentBlock::text(deltas.concat())],
            stop_reason: StopReason::EndTurn,
            usage,
        })));
        events
    }

    /// A turn that requests tool calls, optionally after a streamed preamble.
    pub fn tool_turn(preamble: Option<&str>, calls: &[(&str, &str, Value)]) -> Turn {
        let mut events: Turn = Vec::new();
        let mut content: Vec<ContentBlock> = Vec::new();

        if let Some(text) = preamble {
            events.push(Ok(ProviderEvent::TextDelta {
                delta: text.to_string(),
            }));
            content.push(ContentBlock::text(text));
        }
        for (id, name, input) in calls {
            content.push(ContentBlock::ToolUse {
                id: (*id).to_string(),
                name: (*name).to_string(),
                input: input.clone(),
            });
        }
        events.push(Ok(ProviderEvent::Final(StreamFinal {
            content,
            stop_reason: StopReason::ToolUse,
            usage: UsageInfo {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        })));
        events
    }

    /// A turn that fails with `err` before yielding anything.
    pub fn error_turn(err: ProviderError) -> Turn {
        vec![Err(err)]
    }

    /// Queue a `create()` response.
    pub fn push_create(self, response: StreamFinal) -> Self {
        self.create_queue.lock().unwrap().push_back(response);
        self
    }

    /// Queue a `create()` response with plain text content.
    pub fn push_create_text(self, text: &str) -> Self {
        self.push_create(StreamFinal {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: UsageInfo {
                input_tokens: 50,
                output_tokens: 20,
                ..Default::default()
            },
        })
    }

    /// Make the next `n` `create()` calls fail with a retryable error.
    pub fn with_create_failures(self, n: u32) -> Self {
        self.create_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Queue explicit `count_tokens` results; the local approximation is
    /// used once exhausted.
    pub fn push_token_counts(self, counts: &[u64]) -> Self {
        self.token_counts.lock().unwrap().extend(counts.iter().copied());
        self
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn stream<'a>(&'a self, request: &'a ProviderRequest) -> ProviderStream<'a> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self.turns.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![Err(ProviderError::Other {
                message: "script exhausted".to_string(),
            })]
        });
        Box::pin(futures::stream::iter(turn))
    }

    async fn create(&self, request: &ProviderRequest) -> Result<StreamFinal, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let failures = self.create_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.create_failures.store(failures - 1, Ordering::SeqCst);
            return Err(ProviderError::RateLimited {
                retry_after_ms: None,
            });
        }
        Ok(self
            .create_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamFinal {
                content: vec![ContentBlock::text("scripted summary")],
                stop_reason: StopReason::EndTurn,
                usage: UsageInfo::default(),
            }))
    }

    async fn count_tokens(&self, request: &ProviderRequest) -> Result<u64, ProviderError> {
        if let Some(count) = self.token_counts.lock().unwrap().pop_front() {
            return Ok(count);
        }
        Ok(approximate_tokens(request))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
