//! Host command execution.
//!
//! Every host mutation (address aliases) goes through a [`HostExecutor`] so
//! the wiring path can be exercised without touching the machine. The system
//! implementation runs the program directly (optionally under `sudo`) and
//! gives up after a fixed timeout, killing the child.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

/// Errors from host commands.
#[derive(Debug, Error)]
pub enum HostCommandError {
    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed (exit {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Runs commands on the host.
#[async_trait]
pub trait HostExecutor: Send + Sync {
    /// Run `program` with `args`; returns trimmed stdout on success.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostCommandError>;
}

/// Executor backed by real processes.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    use_sudo: bool,
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new(use_sudo: bool, timeout: Duration) -> Self {
        Self { use_sudo, timeout }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args).kill_on_drop(true);
        cmd
    }
}

/// Human-readable rendering of an invocation, for logs and errors.
fn display_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl HostExecutor for SystemExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostCommandError> {
        let command = display_command(program, args);
        trace!(command = %command, sudo = self.use_sudo, "exec");

        let output = tokio::time::timeout(self.timeout, self.command(program, args).output())
            .await
            .map_err(|_| HostCommandError::Timeout {
                command: command.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| HostCommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(HostCommandError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SystemExecutor {
        SystemExecutor::new(false, Duration::from_secs(5))
    }

    #[test]
    fn test_display_command() {
        assert_eq!(
            display_command("ip", &["addr", "add", "10.0.0.1/30", "dev", "eth0"]),
            "ip addr add 10.0.0.1/30 dev eth0"
        );
    }

    #[tokio::test]
    async fn test_run_returns_trimmed_stdout() {
        let output = executor().run("echo", &["hello"]).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn test_run_reports_stderr_on_failure() {
        let err = executor()
            .run("sh", &["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            HostCommandError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let err = executor()
            .run("definitely-not-a-real-binary-wirelab", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HostCommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let executor = SystemExecutor::new(false, Duration::from_millis(100));
        let err = executor.run("sleep", &["5"]).await.unwrap_err();
        assert!(matches!(err, HostCommandError::Timeout { .. }), "got: {err}");
    }
}
