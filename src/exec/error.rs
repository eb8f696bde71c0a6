// ABOUTME: Error types for command execution backends.
// ABOUTME: Covers spawn, transport, and timeout failures.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Whether this error is a wall-clock timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout(_))
    }
}
