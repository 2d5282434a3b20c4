//! Mock command runner for testing.
//!
//! Provides a scripted implementation of the CommandRunner trait so the
//! supervisor can be exercised without npm, a shell or real ports.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;

use crate::config::CommandSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult, SpawnedProcess};

/// Predefined mock response for a command run.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub delay_ms: u64,
    /// Report a timeout carrying the output above instead of an exit code.
    pub timed_out: bool,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            delay_ms: 0,
            timed_out: false,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            delay_ms: 0,
            timed_out: false,
        }
    }

    /// A command killed at its timeout after printing `stdout`.
    pub fn timeout(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            stdout: stdout.into(),
            stderr: String::new(),
            delay_ms: 0,
            timed_out: true,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Sleep for `ms` before returning, to simulate a slow command.
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

/// Scripted behaviour of a detached process.
#[derive(Debug, Clone)]
pub struct MockProcess {
    pub pid: u32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// `None` keeps the process "running" forever.
    pub exit_code: Option<i32>,
}

impl Default for MockProcess {
    fn default() -> Self {
        Self {
            pid: 4242,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
        }
    }
}

impl MockProcess {
    pub fn running(pid: u32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    pub fn stdout_line(mut self, line: impl Into<String>) -> Self {
        self.stdout.push(line.into());
        self
    }

    pub fn stderr_line(mut self, line: impl Into<String>) -> Self {
        self.stderr.push(line.into());
        self
    }

    pub fn exits_with(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub command: String,
    pub workdir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Mock command runner for testing.
///
/// Responses are registered against a substring of the command line. Each
/// pattern owns a queue: responses are consumed in order and the last one
/// repeats. Commands matching no pattern succeed with empty output.
#[derive(Clone, Default)]
pub struct MockRunner {
    responses: Arc<RwLock<Vec<(String, VecDeque<MockResponse>)>>>,
    processes: Arc<RwLock<VecDeque<MockProcess>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for commands containing `pattern`.
    pub fn respond(self, pattern: impl Into<String>, response: MockResponse) -> Self {
        let pattern = pattern.into();
        {
            let mut responses = self.responses.write();
            match responses.iter_mut().find(|(p, _)| *p == pattern) {
                Some((_, queue)) => queue.push_back(response),
                None => responses.push((pattern, VecDeque::from(vec![response]))),
            }
        }
        self
    }

    /// Queue the next process returned by `spawn_detached`.
    pub fn add_process(self, process: MockProcess) -> Self {
        self.processes.write().push_back(process);
        self
    }

    /// Make every call fail with an execution error.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Calls whose command line contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.command.contains(pattern))
            .cloned()
            .collect()
    }

    /// Check if any command containing `pattern` was issued.
    pub fn was_called(&self, pattern: &str) -> bool {
        !self.calls_matching(pattern).is_empty()
    }

    fn record_call(&self, method: &str, spec: &CommandSpec) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            command: spec.display(),
            workdir: spec.workdir.clone(),
            env: spec.env.clone(),
        });
    }

    fn next_response(&self, command: &str) -> MockResponse {
        let mut responses = self.responses.write();
        let queue = responses
            .iter_mut()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, queue)| queue);

        match queue {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| MockResponse::success("")),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| MockResponse::success("")),
            None => MockResponse::success(""),
        }
    }

    fn check_failure(&self) -> RunnerResult<()> {
        if let Some(msg) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(msg));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<ExecutionResult> {
        self.record_call("run", spec);
        self.check_failure()?;

        let command = spec.display();
        let response = self.next_response(&command);
        if response.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
        }
        if response.timed_out {
            return Err(RunnerError::Timeout {
                seconds: spec.timeout_seconds,
                stdout: response.stdout,
                stderr: response.stderr,
            });
        }

        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.delay_ms as i64);

        Ok(ExecutionResult {
            command,
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.delay_ms,
        })
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> RunnerResult<SpawnedProcess> {
        self.record_call("spawn_detached", spec);
        self.check_failure()?;

        let process = self.processes.write().pop_front().unwrap_or_default();
        let exit = match process.exit_code {
            Some(code) => futures::future::ready(Some(code)).boxed(),
            None => futures::future::pending::<Option<i32>>().boxed(),
        };

        Ok(SpawnedProcess {
            pid: process.pid,
            stdout: futures::stream::iter(process.stdout).boxed(),
            stderr: futures::stream::iter(process.stderr).boxed(),
            exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_runner_default_success() {
        let runner = MockRunner::new();
        let result = runner.run(&CommandSpec::shell("npm ci")).await.unwrap();

        assert!(result.success());
        assert_eq!(result.command, "npm ci");
    }

    #[tokio::test]
    async fn test_mock_runner_pattern_queue() {
        let runner = MockRunner::new()
            .respond("npm run build", MockResponse::failure(1, "first"))
            .respond("npm run build", MockResponse::success("second"));

        let spec = CommandSpec::shell("npm run build");
        let r1 = runner.run(&spec).await.unwrap();
        let r2 = runner.run(&spec).await.unwrap();
        let r3 = runner.run(&spec).await.unwrap();

        assert_eq!(r1.stderr, "first");
        assert_eq!(r2.stdout, "second");
        // Last response repeats
        assert_eq!(r3.stdout, "second");
    }

    #[tokio::test]
    async fn test_mock_runner_timeout_keeps_output() {
        let runner = MockRunner::new().respond("npm run build", MockResponse::timeout("Creating an optimized build"));

        let result = runner.run(&CommandSpec::shell("npm run build").timeout(30)).await;

        match result {
            Err(RunnerError::Timeout { seconds, stdout, .. }) => {
                assert_eq!(seconds, 30);
                assert_eq!(stdout, "Creating an optimized build");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_runner_captures_calls() {
        let runner = MockRunner::new();
        let spec = CommandSpec::shell("npm install")
            .workdir("/app")
            .env("CI", "true");

        let _ = runner.run(&spec).await;

        let calls = runner.calls_matching("npm install");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "run");
        assert_eq!(calls[0].workdir, Some(PathBuf::from("/app")));
        assert_eq!(calls[0].env.get("CI"), Some(&"true".to_string()));
        assert!(!runner.was_called("npm ci"));
    }

    #[tokio::test]
    async fn test_mock_runner_failure_simulation() {
        let runner = MockRunner::new().simulate_failure("simulated error");
        let result = runner.run(&CommandSpec::shell("npm ci")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_process_streams() {
        let runner = MockRunner::new().add_process(
            MockProcess::running(99)
                .stdout_line("ready started server")
                .stderr_line("warn")
                .exits_with(1),
        );

        let process = runner
            .spawn_detached(&CommandSpec::shell("npm run dev"))
            .await
            .unwrap();

        assert_eq!(process.pid, 99);
        let stdout: Vec<String> = process.stdout.collect().await;
        assert_eq!(stdout, vec!["ready started server".to_string()]);
        assert_eq!(process.exit.await, Some(1));
    }
}
