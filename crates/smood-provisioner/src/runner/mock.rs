// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Records every command and answers from scripted rules instead of running
//! processes. Rules match on a `[program, args...]` prefix; the most recently
//! added matching rule wins, and one-shot rules are consumed on first use.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;

/// Scripted answer for a matched command.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    /// Exit code; zero means success.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Simulated run time. Exceeding the command timeout yields a timeout error.
    pub delay: Option<Duration>,
}

impl MockResponse {
    /// Successful, empty output.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Successful with the given stdout.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failure with the given exit code and stderr.
    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Simulate a run time of `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Side effect applied after a successful mocked command (e.g. writing a dump file).
pub type MockHook = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

#[derive(Debug)]
struct Rule {
    prefix: Vec<String>,
    response: MockResponse,
    once: bool,
}

#[derive(Default)]
struct MockState {
    calls: Vec<CommandSpec>,
    rules: Vec<Rule>,
    missing: HashSet<String>,
}

/// Mock runner for testing.
#[derive(Clone, Default)]
pub struct MockRunner {
    state: Arc<Mutex<MockState>>,
    hook: Option<MockHook>,
}

impl MockRunner {
    /// Create a mock runner where every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` after each successful command.
    pub fn with_hook(mut self, hook: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Answer commands starting with `prefix` with `response` until overridden.
    pub async fn respond(&self, prefix: &[&str], response: MockResponse) {
        self.push_rule(prefix, response, false).await;
    }

    /// Answer the next command starting with `prefix` with `response`.
    pub async fn respond_once(&self, prefix: &[&str], response: MockResponse) {
        self.push_rule(prefix, response, true).await;
    }

    /// Behave as if `program` is not installed.
    pub async fn set_missing(&self, program: &str) {
        self.state.lock().await.missing.insert(program.to_string());
    }

    /// All commands received so far, in order.
    pub async fn calls(&self) -> Vec<CommandSpec> {
        self.state.lock().await.calls.clone()
    }

    /// Commands received so far that start with `prefix`.
    pub async fn calls_matching(&self, prefix: &[&str]) -> Vec<CommandSpec> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Forget recorded commands. Rules are kept.
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    async fn push_rule(&self, prefix: &[&str], response: MockResponse, once: bool) {
        self.state.lock().await.rules.push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            response,
            once,
        });
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let response = {
            let mut state = self.state.lock().await;
            state.calls.push(command.clone());

            if state.missing.contains(&command.program) {
                return Err(RunnerError::NotFound(command.program.clone()));
            }

            let matched = state.rules.iter().rposition(|rule| {
                let prefix: Vec<&str> = rule.prefix.iter().map(String::as_str).collect();
                command.starts_with(&prefix)
            });

            match matched {
                Some(idx) if state.rules[idx].once => state.rules.remove(idx).response,
                Some(idx) => state.rules[idx].response.clone(),
                None => MockResponse::ok(),
            }
        };

        if let Some(delay) = response.delay {
            match command.timeout {
                Some(timeout) if delay > timeout => {
                    tokio::time::sleep(timeout).await;
                    return Err(RunnerError::Timeout {
                        program: command.program.clone(),
                        timeout,
                    });
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        if response.exit_code != 0 {
            return Err(RunnerError::Failed {
                program: command.program.clone(),
                exit_code: Some(response.exit_code),
                stdout: response.stdout,
                stderr: response.stderr,
            });
        }

        if let Some(hook) = &self.hook {
            hook(command);
        }

        Ok(CommandOutput {
            stdout: response.stdout,
            stderr: response.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_rule_wins() {
        let runner = MockRunner::new();
        runner.respond(&["docker"], MockResponse::stdout("generic")).await;
        runner
            .respond(&["docker", "ps"], MockResponse::stdout("specific"))
            .await;

        let out = runner
            .run(&CommandSpec::new("docker").arg("ps"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "specific");

        let out = runner
            .run(&CommandSpec::new("docker").arg("start"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "generic");
    }

    #[tokio::test]
    async fn test_respond_once_is_consumed() {
        let runner = MockRunner::new();
        runner
            .respond_once(&["docker", "start"], MockResponse::fail(1, "boom"))
            .await;

        let spec = CommandSpec::new("docker").args(["start", "x"]);
        assert!(runner.run(&spec).await.is_err());
        assert!(runner.run(&spec).await.is_ok());
        assert_eq!(runner.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = MockRunner::new();
        runner.set_missing("pg_dump").await;
        assert!(!runner.is_available("pg_dump").await);
        assert!(runner.is_available("docker").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_beyond_timeout() {
        let runner = MockRunner::new();
        runner
            .respond(
                &["certbot"],
                MockResponse::ok().with_delay(Duration::from_secs(600)),
            )
            .await;

        let err = runner
            .run(&CommandSpec::new("certbot").timeout(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }
}
