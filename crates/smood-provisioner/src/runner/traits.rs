// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command runner trait definitions.
//!
//! Defines the abstract interface for executing external programs.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from command execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Program executable was not found on PATH.
    #[error("Program not found: {0}")]
    NotFound(String),

    /// Process could not be spawned for a reason other than a missing binary.
    #[error("Failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to spawn.
        program: String,
        /// Underlying OS error.
        message: String,
    },

    /// Process exited with a non-zero status.
    #[error("{program} exited with code {code}: {stderr}", code = display_code(.exit_code))]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Process did not finish in time and was killed.
    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        /// Program that timed out.
        program: String,
        /// Timeout that was applied.
        timeout: Duration,
    },

    /// I/O operation failed while talking to the child.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// A single external program invocation.
///
/// Arguments are passed as an array and never interpreted by a shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Extra environment for the child (inherits the parent environment).
    pub env: Vec<(String, String)>,
    /// Bytes written to the child's stdin while it runs.
    pub stdin: Option<Vec<u8>>,
    /// Kill the child after this long.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Start a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable on the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `input` to the child's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Apply a timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of an environment variable set on this command.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `[program, args...]` starts with `prefix`.
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        let mut words =
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        prefix.iter().all(|p| words.next() == Some(*p))
    }

    /// Program and arguments joined by spaces, for logs.
    ///
    /// Environment values are never included.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Trait for command runners.
///
/// Runners execute programs and report their output. They know nothing about
/// installations, containers or databases; callers build the argument lists.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runner type identifier (e.g., "system", "mock")
    fn runner_type(&self) -> &'static str;

    /// Run a command to completion.
    ///
    /// A non-zero exit status is returned as [`RunnerError::Failed`] with the
    /// captured streams attached.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `tool --version` runs successfully.
    async fn is_available(&self, tool: &str) -> bool {
        let check = CommandSpec::new(tool)
            .arg("--version")
            .timeout(Duration::from_secs(10));
        self.run(&check).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_includes_program() {
        let spec = CommandSpec::new("docker").args(["ps", "-a"]);
        assert!(spec.starts_with(&["docker"]));
        assert!(spec.starts_with(&["docker", "ps"]));
        assert!(!spec.starts_with(&["docker", "rm"]));
        assert!(!spec.starts_with(&["docker", "ps", "-a", "--all"]));
    }

    #[test]
    fn test_display_omits_env() {
        let spec = CommandSpec::new("pg_dump")
            .args(["-h", "db"])
            .env("PGPASSWORD", "hunter2");
        assert_eq!(spec.display(), "pg_dump -h db");
        assert_eq!(spec.env_value("PGPASSWORD"), Some("hunter2"));
    }

    #[test]
    fn test_failed_display() {
        let err = RunnerError::Failed {
            program: "docker".into(),
            exit_code: Some(125),
            stdout: String::new(),
            stderr: "bad flag".into(),
        };
        assert_eq!(err.to_string(), "docker exited with code 125: bad flag");
    }
}
