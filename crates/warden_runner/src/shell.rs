//! Shell-based command runner.
//!
//! Runs commands as local child processes through `tokio::process`. Commands
//! run to completion have their output captured in memory; detached commands
//! write to log files (or pipes) that are exposed as line streams.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::CommandSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult, LineStream, SpawnedProcess};

/// How often a detached output file is re-read after hitting EOF.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a killed command's pipes are drained before giving up on EOF.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Log output from command execution.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Shell runner options.
#[derive(Debug, Clone)]
pub struct ShellRunnerOptions {
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
    /// CI mode (emit every output line through tracing)
    pub ci_mode: bool,
}

impl Default for ShellRunnerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl ShellRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn ci_mode(mut self) -> Self {
        self.ci_mode = true;
        self
    }
}

/// Runs commands as local child processes.
pub struct ShellRunner {
    options: ShellRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl ShellRunner {
    pub fn new(options: ShellRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    /// Set a log handler receiving every captured output line.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn build_command(&self, spec: &CommandSpec) -> std::process::Command {
        let mut command = std::process::Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.workdir {
            command.current_dir(dir);
        }
        command.envs(&spec.env);

        // On Windows, use CREATE_NO_WINDOW to prevent terminal window from showing
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        command
    }

    fn collect_output<R>(&self, reader: R, stream: LogStream) -> OutputCollector
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let ci_mode = self.options.ci_mode;
        let handler = self.log_handler.clone();
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink = buffer.clone();
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                {
                    let mut output = sink.lock();
                    output.push_str(&line);
                    output.push('\n');
                }
                if ci_mode {
                    info!("[{}] {}", stream, line);
                }
                if let Some(handler) = &handler {
                    handler(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        message: line,
                    });
                }
            }
        });
        OutputCollector { task, buffer }
    }
}

/// Output captured from one pipe of a running command.
struct OutputCollector {
    task: JoinHandle<()>,
    buffer: Arc<Mutex<String>>,
}

impl OutputCollector {
    /// Wait for the pipe to close and return everything read from it.
    async fn finish(self) -> String {
        let _ = self.task.await;
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Give the reader a short grace period after a kill, then keep what it has.
    ///
    /// Grandchildren of a killed shell can hold the pipe open, so this never
    /// waits for EOF.
    async fn salvage(mut self) -> String {
        if tokio::time::timeout(KILL_DRAIN_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
        }
        std::mem::take(&mut *self.buffer.lock())
    }
}

/// Stream lines from a pipe until it closes.
fn pipe_lines<R>(reader: Option<R>) -> LineStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    match reader {
        Some(reader) => futures::stream::unfold(BufReader::new(reader).lines(), |mut lines| async move {
            match lines.next_line().await {
                Ok(Some(line)) => Some((line, lines)),
                _ => None,
            }
        })
        .boxed(),
        None => futures::stream::empty::<String>().boxed(),
    }
}

struct Tail {
    path: PathBuf,
    reader: Option<BufReader<tokio::fs::File>>,
    exited: Arc<AtomicBool>,
    drained: bool,
    pending: String,
}

/// Follow a file the child writes to, ending once the child has exited and
/// everything it wrote has been read.
fn tail_lines(path: PathBuf, exited: Arc<AtomicBool>) -> LineStream {
    let tail = Tail {
        path,
        reader: None,
        exited,
        drained: false,
        pending: String::new(),
    };

    futures::stream::unfold(tail, |mut tail| async move {
        loop {
            if tail.reader.is_none() {
                match tokio::fs::File::open(&tail.path).await {
                    Ok(file) => tail.reader = Some(BufReader::new(file)),
                    Err(_) if tail.exited.load(Ordering::SeqCst) => return None,
                    Err(_) => {
                        tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                        continue;
                    }
                }
            }

            let reader = tail.reader.as_mut()?;
            let mut chunk = String::new();
            match reader.read_line(&mut chunk).await {
                Ok(0) => {
                    if tail.drained {
                        if tail.pending.is_empty() {
                            return None;
                        }
                        let line = std::mem::take(&mut tail.pending);
                        return Some((line, tail));
                    }
                    // One more read after exit picks up anything written just before it.
                    if tail.exited.load(Ordering::SeqCst) {
                        tail.drained = true;
                        continue;
                    }
                    tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                }
                Ok(_) => {
                    tail.pending.push_str(&chunk);
                    if tail.pending.ends_with('\n') {
                        let line = std::mem::take(&mut tail.pending)
                            .trim_end_matches(['\r', '\n'])
                            .to_string();
                        return Some((line, tail));
                    }
                }
                Err(_) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<ExecutionResult> {
        let command_line = spec.display();

        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {}", command_line);
            return Ok(ExecutionResult {
                command: command_line.clone(),
                exit_code: 0,
                stdout: format!("[DRY-RUN] Command: {}", command_line),
                stderr: String::new(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                duration_ms: 0,
            });
        }

        let mut command = Command::from(self.build_command(spec));
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing: {}", command_line);

        let started_at = Utc::now();
        let mut child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stderr was not captured".to_string()))?;

        let stdout_task = self.collect_output(stdout, LogStream::Stdout);
        let stderr_task = self.collect_output(stderr, LogStream::Stderr);

        let status = if spec.timeout_seconds > 0 {
            let timeout = Duration::from_secs(spec.timeout_seconds);
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    let stdout = stdout_task.salvage().await;
                    let stderr = stderr_task.salvage().await;
                    error!("`{}` timed out after {}s", command_line, spec.timeout_seconds);
                    return Err(RunnerError::Timeout {
                        seconds: spec.timeout_seconds,
                        stdout,
                        stderr,
                    });
                }
            }
        } else {
            child.wait().await?
        };

        let stdout = stdout_task.finish().await;
        let stderr = stderr_task.finish().await;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let exit_code = status.code().unwrap_or(-1) as i64;

        if exit_code == 0 {
            debug!("`{}` completed in {}ms", command_line, duration_ms);
        } else {
            debug!(
                "`{}` exited with code {} after {}ms",
                command_line, exit_code, duration_ms
            );
        }

        Ok(ExecutionResult {
            command: command_line,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> RunnerResult<SpawnedProcess> {
        let command_line = spec.display();

        if self.options.dry_run {
            info!("[DRY-RUN] Would start: {}", command_line);
            return Ok(SpawnedProcess {
                pid: 0,
                stdout: futures::stream::empty::<String>().boxed(),
                stderr: futures::stream::empty::<String>().boxed(),
                exit: futures::future::ready(Some(0)).boxed(),
            });
        }

        let mut std_command = self.build_command(spec);
        std_command.stdin(Stdio::null());

        // Own process group so the child survives the supervisor.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            std_command.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
        }

        let files = match (spec.stdout_path(), spec.stderr_path()) {
            (Some(out_path), Some(err_path)) => {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let out = std::fs::File::create(&out_path)?;
                let err = std::fs::File::create(&err_path)?;
                std_command.stdout(Stdio::from(out)).stderr(Stdio::from(err));
                Some((out_path, err_path))
            }
            _ => {
                std_command.stdout(Stdio::piped()).stderr(Stdio::piped());
                None
            }
        };

        let mut command = Command::from(std_command);
        command.kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| RunnerError::SpawnFailed {
            command: command_line.clone(),
            message: "process exited before its PID could be read".to_string(),
        })?;

        let exited = Arc::new(AtomicBool::new(false));
        let (stdout, stderr) = match files {
            Some((out_path, err_path)) => (
                tail_lines(out_path, exited.clone()),
                tail_lines(err_path, exited.clone()),
            ),
            None => (pipe_lines(child.stdout.take()), pipe_lines(child.stderr.take())),
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        let flag = exited.clone();
        tokio::spawn(async move {
            let code = child.wait().await.ok().and_then(|status| status.code());
            flag.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(code);
        });

        info!("Started `{}` (PID: {})", command_line, pid);

        Ok(SpawnedProcess {
            pid,
            stdout,
            stderr,
            exit: async move { exit_rx.await.ok().flatten() }.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_mode() {
        let runner = ShellRunner::new(ShellRunnerOptions::new().dry_run());
        assert!(runner.is_dry_run());
    }

    #[test]
    fn test_ci_mode_option() {
        let options = ShellRunnerOptions::new().ci_mode();
        assert!(options.ci_mode);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let runner = ShellRunner::new(ShellRunnerOptions::new().dry_run());
        let result = runner
            .run(&CommandSpec::shell("definitely-not-a-real-binary --flag"))
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.stdout.contains("[DRY-RUN]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let runner = ShellRunner::new(ShellRunnerOptions::new());
        let result = runner
            .run(&CommandSpec::shell("echo compiled successfully; echo boom >&2; exit 3"))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert!(result.stdout.contains("compiled successfully"));
        assert!(result.stderr.contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout() {
        let runner = ShellRunner::new(ShellRunnerOptions::new());
        let result = runner
            .run(&CommandSpec::shell("sleep 5").timeout(1))
            .await;

        assert!(matches!(result, Err(RunnerError::Timeout { seconds: 1, .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_keeps_partial_output() {
        let runner = ShellRunner::new(ShellRunnerOptions::new());
        let result = runner
            .run(&CommandSpec::shell("printf 'Type %s: boom\\n' error; echo late >&2; sleep 5").timeout(1))
            .await;

        match result {
            Err(RunnerError::Timeout { seconds, stdout, stderr }) => {
                assert_eq!(seconds, 1);
                assert!(stdout.contains("Type error: boom"));
                assert!(stderr.contains("late"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_detached_tails_output_files() {
        let temp = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(ShellRunnerOptions::new());
        let spec = CommandSpec::shell("echo first; echo second >&2; echo third")
            .output_files(temp.path().join(".warden"), "dev");

        let process = runner.spawn_detached(&spec).await.unwrap();
        assert!(process.pid > 0);

        let stdout: Vec<String> = process.stdout.collect().await;
        let stderr: Vec<String> = process.stderr.collect().await;
        let code = process.exit.await;

        assert_eq!(stdout, vec!["first".to_string(), "third".to_string()]);
        assert_eq!(stderr, vec!["second".to_string()]);
        assert_eq!(code, Some(0));
        assert!(temp.path().join(".warden/dev.stdout.log").exists());
    }
}
