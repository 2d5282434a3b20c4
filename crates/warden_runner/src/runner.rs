//! Command runner trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::CommandSpec;
use crate::error::RunnerResult;

/// Result of running a command to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Command as displayed in logs
    pub command: String,
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Line-oriented output of a spawned process.
pub type LineStream = BoxStream<'static, String>;

/// A process started with [`CommandRunner::spawn_detached`].
///
/// The runner gives up ownership of the child: dropping this value never
/// kills the process.
pub struct SpawnedProcess {
    /// OS process ID
    pub pid: u32,
    /// Lines written to stdout
    pub stdout: LineStream,
    /// Lines written to stderr
    pub stderr: LineStream,
    /// Resolves with the exit code once the process exits
    pub exit: BoxFuture<'static, Option<i32>>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Command runner trait.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing its output.
    ///
    /// A non-zero exit status is reported through
    /// [`ExecutionResult::exit_code`], not as an error.
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<ExecutionResult>;

    /// Start a long-lived process that is not tied to the runner's lifetime.
    async fn spawn_detached(&self, spec: &CommandSpec) -> RunnerResult<SpawnedProcess>;
}
