// ABOUTME: Unified deployment error with SNAFU pattern.
// ABOUTME: Exposes an error kind for programmatic handling at the API boundary.

use crate::exec::ExecError;
use crate::store::StoreError;
use crate::types::AppName;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::time::Duration;

/// Errors surfaced by the deployment orchestrator and rollback coordinator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeployError {
    /// A precondition failed before any remote or filesystem action.
    #[snafu(display("validation failed: {message}"))]
    Validation { message: String },

    /// No prior deployment qualifies as a rollback target.
    #[snafu(display("no rollback candidate for application '{app}'"))]
    NoCandidate { app: AppName },

    /// Release directory management failed on the target host.
    #[snafu(display("filesystem operation failed: {source}"))]
    Filesystem {
        #[snafu(source(from(crate::release::Error, Box::new)))]
        source: Box<crate::release::Error>,
    },

    /// Command transport or execution failed.
    #[snafu(display("remote execution failed: {source}"))]
    Remote { source: ExecError },

    /// The deploy script ran and exited non-zero.
    #[snafu(display("deploy script failed with exit code {exit_code}"))]
    ScriptFailed { exit_code: u32 },

    /// The wall-clock budget for the whole operation was exceeded.
    #[snafu(display("{operation} exceeded its budget of {budget:?}"))]
    Timeout {
        operation: String,
        budget: Duration,
    },

    /// Another process holds the deploy lock for this application.
    #[snafu(display("deploy lock held by {holder} (pid {pid}) since {since}"))]
    LockHeld {
        holder: String,
        pid: u32,
        since: DateTime<Utc>,
    },

    /// Lock bookkeeping failed for a reason other than contention.
    #[snafu(display("deploy lock error: {message}"))]
    Lock { message: String },

    /// The record store rejected or failed an operation.
    #[snafu(display("store error: {source}"))]
    Store { source: StoreError },

    /// A script template or substitution value was invalid.
    #[snafu(display("invalid deploy script: {message}"))]
    Template { message: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    /// Precondition violated; nothing was executed.
    Validation,
    /// A required record does not exist.
    NotFound,
    /// Filesystem operation on the target host failed.
    Filesystem,
    /// Remote command failed or transport broke.
    RemoteExecution,
    /// A wall-clock budget expired.
    Timeout,
    /// Deploy lock contention or bookkeeping failure.
    Lock,
    /// Persistence failure.
    Store,
}

impl DeployError {
    /// Returns the error kind for programmatic handling.
    ///
    /// Timeouts keep their identity however deep they originate: a timed-out
    /// remote command reports `Timeout`, not `RemoteExecution`, so operators
    /// can tell "the script failed" from "the script was killed".
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Validation { .. } | DeployError::Template { .. } => {
                DeployErrorKind::Validation
            }
            DeployError::NoCandidate { .. } => DeployErrorKind::NotFound,
            DeployError::Filesystem { source } => match source.as_ref() {
                crate::release::Error::Exec(e) if e.is_timeout() => DeployErrorKind::Timeout,
                _ => DeployErrorKind::Filesystem,
            },
            DeployError::Remote { source } if source.is_timeout() => DeployErrorKind::Timeout,
            DeployError::Remote { .. } | DeployError::ScriptFailed { .. } => {
                DeployErrorKind::RemoteExecution
            }
            DeployError::Timeout { .. } => DeployErrorKind::Timeout,
            DeployError::LockHeld { .. } | DeployError::Lock { .. } => DeployErrorKind::Lock,
            DeployError::Store { .. } => DeployErrorKind::Store,
        }
    }
}

impl From<crate::release::Error> for DeployError {
    fn from(source: crate::release::Error) -> Self {
        DeployError::Filesystem {
            source: Box::new(source),
        }
    }
}

impl From<ExecError> for DeployError {
    fn from(source: ExecError) -> Self {
        DeployError::Remote { source }
    }
}

impl From<StoreError> for DeployError {
    fn from(source: StoreError) -> Self {
        DeployError::Store { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_keeps_its_kind_through_wrapping() {
        let direct = DeployError::Timeout {
            operation: "deploy".to_string(),
            budget: Duration::from_secs(60),
        };
        assert_eq!(direct.kind(), DeployErrorKind::Timeout);

        let via_exec: DeployError = ExecError::Timeout(Duration::from_secs(60)).into();
        assert_eq!(via_exec.kind(), DeployErrorKind::Timeout);

        let via_release: DeployError =
            crate::release::Error::Exec(ExecError::Timeout(Duration::from_secs(60))).into();
        assert_eq!(via_release.kind(), DeployErrorKind::Timeout);
    }

    #[test]
    fn script_failure_is_remote_execution() {
        let err = DeployError::ScriptFailed { exit_code: 1 };
        assert_eq!(err.kind(), DeployErrorKind::RemoteExecution);
    }
}
