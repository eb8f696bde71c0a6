// ABOUTME: Local command execution via the system shell.
// ABOUTME: Used when the deployment target is the machine skala runs on.

use super::{CommandOutput, ExecError, Executor, LineSink};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs commands through `sh -c` on the local machine.
///
/// Children are spawned with `kill_on_drop`, so a command abandoned by a
/// timeout does not keep running after the future is dropped.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    default_timeout: Duration,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: timeout,
        }
    }

    fn command(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(command: &str) -> Result<CommandOutput, ExecError> {
        let output = Self::command(command)
            .output()
            .await
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(1) as u32,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_streamed(command: &str, sink: LineSink) -> Result<CommandOutput, ExecError> {
        let mut child = Self::command(command)
            .spawn()
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Spawn("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Spawn("child stderr not captured".to_string()))?;

        let out_sink = sink.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
                let _ = out_sink.send(line);
            }
            collected
        });

        let err_sink = sink;
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
                let _ = err_sink.send(line);
            }
            collected
        });

        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::CommandFailed(e.to_string()))?;

        let (stdout, stderr) = futures::future::join(stdout_task, stderr_task).await;
        let stdout = stdout.unwrap_or_default();
        let stderr = stderr.unwrap_or_default();

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(1) as u32,
            stdout,
            stderr,
        })
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn exec(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.exec_with_timeout(command, self.default_timeout).await
    }

    async fn exec_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        match tokio::time::timeout(timeout, Self::run(command)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(timeout)),
        }
    }

    async fn exec_streamed(
        &self,
        command: &str,
        timeout: Duration,
        sink: LineSink,
    ) -> Result<CommandOutput, ExecError> {
        match tokio::time::timeout(timeout, Self::run_streamed(command, sink)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(timeout)),
        }
    }
}
