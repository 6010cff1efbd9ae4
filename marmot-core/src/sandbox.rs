//! Sandbox capability consumed by tool handlers.
//!
//! The core never touches the filesystem or spawns processes itself; tools
//! that do receive a `Sandbox` at construction. Concrete isolation
//! strategies (directory jail, container, VM) are supplied by the caller.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Result of a sandboxed command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Errors from sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path escapes sandbox root: {path}")]
    PathEscapes { path: String },

    #[error("execution failed: {0}")]
    ExecFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Path validation and command execution inside an isolation boundary.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Resolve a relative path to an absolute one, rejecting anything that
    /// escapes the sandbox root.
    fn validate_path(&self, relative: &str) -> Result<PathBuf, SandboxError>;

    /// Run a command inside the sandbox.
    async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult, SandboxError>;
}
