// ABOUTME: Command execution seam for target hosts.
// ABOUTME: One trait, two backends: SSH session and local shell.

mod error;
mod local;
mod ssh;

pub use error::ExecError;
pub use local::LocalExecutor;
pub use ssh::SshExecutor;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output from a command executed on the target host.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code of the command.
    pub exit_code: u32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Sink receiving one output line at a time from a streamed command.
///
/// The executor never awaits the consumer; lines are handed off through an
/// unbounded channel and a vanished receiver is ignored.
pub type LineSink = mpsc::UnboundedSender<String>;

/// Shell command execution on a deployment target.
///
/// Implemented by [`SshExecutor`] for remote hosts and [`LocalExecutor`] for
/// deployments onto the machine skala itself runs on.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a command, using the backend's default timeout.
    async fn exec(&self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Execute a command with an explicit timeout.
    async fn exec_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;

    /// Execute a command, forwarding each output line to `sink` as it
    /// arrives. stdout and stderr are interleaved in arrival order.
    async fn exec_streamed(
        &self,
        command: &str,
        timeout: Duration,
        sink: LineSink,
    ) -> Result<CommandOutput, ExecError>;
}

/// Quote a string for safe interpolation into a shell command line.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
