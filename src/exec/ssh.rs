// ABOUTME: Executor backend over an established SSH session.
// ABOUTME: Maps SSH transport errors into executor errors.

use super::{CommandOutput, ExecError, Executor, LineSink};
use crate::ssh::{self, Session};
use async_trait::async_trait;
use std::time::Duration;

/// Executes commands on a remote host through [`Session`].
pub struct SshExecutor {
    session: Session,
}

impl SshExecutor {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Tear down the underlying SSH session.
    pub async fn disconnect(self) -> Result<(), ExecError> {
        self.session.disconnect().await.map_err(map_err)
    }
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor").finish()
    }
}

fn map_err(err: ssh::Error) -> ExecError {
    match err {
        ssh::Error::CommandTimeout(d) => ExecError::Timeout(d),
        ssh::Error::Connection(msg) => ExecError::Transport(msg),
        ssh::Error::ChannelClosed => {
            ExecError::Transport("channel closed without exit status".to_string())
        }
        other => ExecError::CommandFailed(other.to_string()),
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn exec(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.session.exec(command).await.map_err(map_err)
    }

    async fn exec_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        self.session
            .exec_with_timeout(command, timeout)
            .await
            .map_err(map_err)
    }

    async fn exec_streamed(
        &self,
        command: &str,
        timeout: Duration,
        sink: LineSink,
    ) -> Result<CommandOutput, ExecError> {
        self.session
            .exec_streamed(command, timeout, sink)
            .await
            .map_err(map_err)
    }
}
