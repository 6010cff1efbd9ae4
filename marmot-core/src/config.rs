//! Configuration surface for the agent runtime.
//!
//! Immutable value objects passed at construction. Defaults follow the
//! model pricing table for context windows.

use crate::pricing;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Default max output tokens per turn.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Default provider call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model: String,
    /// Explicit API key; falls back to `ANTHROPIC_API_KEY` when absent.
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub enable_prompt_caching: bool,
    pub max_retries: u32,
    pub retry_initial_delay: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            enable_prompt_caching: true,
            max_retries: 3,
            retry_initial_delay: Duration::from_secs(1),
        }
    }
}

impl ProviderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Resolve the API key: explicit value first, environment second.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }

    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::new(self.max_retries, self.retry_initial_delay)
    }
}

/// Agent core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCoreConfig {
    pub provider: ProviderConfig,
    pub system_prompt: String,
    /// Cap on model-call iterations within one `stream_message` call.
    pub max_iterations: u32,
    /// Context usage fraction (0..1) that triggers compaction.
    pub compact_threshold: f64,
    /// Context window override; the model pricing table otherwise.
    pub context_window: Option<u64>,
}

impl Default for AgentCoreConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            system_prompt: String::new(),
            max_iterations: 25,
            compact_threshold: 0.8,
            context_window: None,
        }
    }
}

impl AgentCoreConfig {
    /// Effective context window for the configured model.
    pub fn context_window(&self) -> u64 {
        self.context_window
            .unwrap_or_else(|| pricing::context_window_for(&self.provider.model))
    }
}
