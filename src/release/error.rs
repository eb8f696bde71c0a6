// ABOUTME: Error types for release directory operations.
// ABOUTME: Filesystem failures on the target host, reported with the failing path.

use crate::exec::ExecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("release directory already exists: {0}")]
    ReleaseExists(String),

    #[error("failed to create directory {path}: {detail}")]
    CreateFailed { path: String, detail: String },

    #[error("failed to activate release {path}: {detail}")]
    ActivateFailed { path: String, detail: String },

    #[error("failed to list releases under {path}: {detail}")]
    ListFailed { path: String, detail: String },

    #[error("failed to link shared path {path}: {detail}")]
    LinkFailed { path: String, detail: String },

    #[error("release directory missing: {0}")]
    ReleaseMissing(String),

    #[error("command execution failed: {0}")]
    Exec(#[from] ExecError),
}

pub type Result<T> = std::result::Result<T, Error>;
