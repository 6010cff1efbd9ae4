//! marmot-client — LLM provider implementations.
//!
//! `AnthropicProvider` speaks the Anthropic Messages API over streaming
//! SSE. `RetryingProvider` layers exponential-backoff retry over any
//! provider; `ScriptedProvider` replays canned turns for tests.

pub mod anthropic;
pub mod assembler;
pub mod retry;
pub mod scripted;

pub use anthropic::AnthropicProvider;
pub use assembler::BlockAssembler;
pub use retry::RetryingProvider;
pub use scripted::ScriptedProvider;
