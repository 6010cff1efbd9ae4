//! Error taxonomy for the agent runtime.
//!
//! `ProviderError` normalizes backend-specific failures into the kinds the
//! loop understands; retry decisions key off `is_retryable()`.

use std::time::Duration;

/// Errors from LLM providers, categorized by whether they are retryable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    // === Non-retryable ===
    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("invalid request: {message}")]
    BadRequest { message: String },

    // === Retryable ===
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("connection failed: {message}")]
    Connection { message: String },

    // === Anything else ===
    #[error("{message}")]
    Other { message: String },
}

impl ProviderError {
    /// Whether this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::Timeout { .. }
                | Self::Connection { .. }
        )
    }

    /// Stable identifier used in `retry` and `error` event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::BadRequest { .. } => "bad_request",
            Self::RateLimited { .. } => "rate_limit",
            Self::Server { .. } => "server",
            Self::Timeout { .. } => "timeout",
            Self::Connection { .. } => "connection",
            Self::Other { .. } => "other",
        }
    }

    /// Retry-after hint if the backend supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_ms } => retry_after_ms.map(Duration::from_millis),
            _ => None,
        }
    }

    /// Normalize an HTTP status into the taxonomy.
    pub fn from_http_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Auth { message },
            400 | 422 => Self::BadRequest { message },
            429 => Self::RateLimited {
                retry_after_ms: None,
            },
            // 529 is the overloaded signal, retried like any 5xx.
            s if s >= 500 || s == 529 => Self::Server { status: s, message },
            _ => Self::Other { message },
        }
    }
}

/// Error returned by tool dispatch operations.
///
/// Tool failures are reported back to the model as error results and never
/// abort the loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {name}")]
    NotFound { name: String },

    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("{message}")]
    ExecutionFailed { message: String },
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}

/// Registering a tool under a name that is already taken.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tool '{name}' is already registered")]
pub struct DuplicateToolError {
    pub name: String,
}

/// Registering a skill under a name that is already taken.
#[derive(Debug, Clone, thiserror::Error)]
#[error("skill '{name}' is already registered")]
pub struct DuplicateSkillError {
    pub name: String,
}

/// Referencing a skill that was never registered.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown skill: {name}")]
pub struct UnknownSkillError {
    pub name: String,
}

/// Errors surfaced by the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("session store error: {0}")]
    Store(#[from] crate::session::StoreError),

    #[error("event store error: {0}")]
    EventStore(#[from] crate::event_store::EventStoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run was cancelled")]
    Cancelled,
}

impl AgentError {
    /// Identifier used in the `error` event payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Provider(e) => e.kind(),
            Self::Store(_) => "store",
            Self::EventStore(_) => "event_store",
            Self::Config(_) => "config",
            Self::Cancelled => "cancelled",
        }
    }
}
