// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner that executes real processes on the host.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::traits::*;

/// Executes commands with `tokio::process`, without a shell.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    default_timeout: Option<Duration>,
}

impl SystemRunner {
    /// Create a runner with no default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `timeout` to commands that do not set their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    fn runner_type(&self) -> &'static str {
        "system"
    }

    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %command.display(), "Running command");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::NotFound(command.program.clone())
            } else {
                RunnerError::Spawn {
                    program: command.program.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        // Feed stdin while draining output so neither pipe can stall the child.
        let stdin = child.stdin.take();
        let feed = async {
            if let (Some(input), Some(mut stdin)) = (command.stdin.as_deref(), stdin) {
                stdin.write_all(input).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let wait = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            let output = output?;
            fed?;
            Ok::<_, std::io::Error>(output)
        };
        let output = match command.timeout.or(self.default_timeout) {
            // Dropping the future drops the child, and kill_on_drop reaps it.
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| RunnerError::Timeout {
                    program: command.program.clone(),
                    timeout,
                })??,
            None => wait.await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            debug!(
                command = %command.display(),
                exit_code = ?output.status.code(),
                "Command failed"
            );
            return Err(RunnerError::Failed {
                program: command.program.clone(),
                exit_code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&CommandSpec::new("echo").arg("hello world"))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_expanded() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&CommandSpec::new("echo").arg("$HOME; rm -rf /"))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "$HOME; rm -rf /");
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&CommandSpec::new("cat").stdin("server { }"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "server { }");
    }

    #[tokio::test]
    async fn test_env_is_forwarded() {
        let runner = SystemRunner::new();
        let out = runner
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "printf %s \"$SMOOD_TEST\""])
                    .env("SMOOD_TEST", "x1"),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "x1");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            RunnerError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("smood-definitely-not-installed"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
        assert!(!runner.is_available("smood-definitely-not-installed").await);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("sleep").arg("5").timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timeout_covers_stdin() {
        // More than a pipe buffer, to a child that never reads it.
        let input = vec![b'x'; 1024 * 1024];
        let runner = SystemRunner::new();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            runner.run(
                &CommandSpec::new("sleep")
                    .arg("5")
                    .stdin(input)
                    .timeout(Duration::from_millis(100)),
            ),
        )
        .await
        .expect("runner should honor its own timeout")
        .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }
}
