//! Detached dev-server launch and stream observation.
//!
//! The launcher hands back a [`ServerProcess`] used only to watch the first
//! moments of the server's life. Releasing it stops the observers; the server
//! itself keeps running.

use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_runner::{CommandSpec, LineStream};

use crate::context::{BuildLog, SupervisorContext};
use crate::error::WardenResult;

const STAGE: &str = "launch";

/// Which observer declared the server ready first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadySource {
    /// A ready marker appeared in the server output
    Stream,
    /// The health prober got a non-error response
    Probe,
}

/// Set-once readiness event shared by the stream observers and the prober.
#[derive(Debug, Clone)]
pub struct ReadinessLatch {
    tx: Arc<watch::Sender<Option<ReadySource>>>,
}

impl Default for ReadinessLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record readiness. Returns `true` only for the first caller.
    pub fn set(&self, source: ReadySource) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(source);
                true
            } else {
                false
            }
        })
    }

    pub fn source(&self) -> Option<ReadySource> {
        *self.tx.borrow()
    }

    pub fn is_set(&self) -> bool {
        self.source().is_some()
    }

    /// Wait until some source sets the latch.
    pub async fn wait(&self) -> ReadySource {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(source) = *rx.borrow_and_update() {
                return source;
            }
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender; park instead of spinning.
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Keeps the most recent `capacity` lines of one output stream.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// Observation handle for a launched dev server.
#[derive(Debug)]
pub struct ServerProcess {
    pub pid: u32,
    pub stdout: BoundedBuffer,
    pub stderr: BoundedBuffer,
    pub readiness: ReadinessLatch,
    exit: Arc<Mutex<Option<Option<i32>>>>,
    observer: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Whether a ready marker was seen in the output streams.
    pub fn ready_signal_seen(&self) -> bool {
        self.readiness.source() == Some(ReadySource::Stream)
    }

    /// `Some(code)` once the process has exited; the code is `None` if killed by a signal.
    pub fn exit_status(&self) -> Option<Option<i32>> {
        *self.exit.lock()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.lock().is_some()
    }

    /// Stop observing the server and give up ownership. The server keeps running.
    pub fn release(mut self) {
        self.stop_observing();
    }

    fn stop_observing(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.abort();
            tracing::debug!("Released dev server (PID: {})", self.pid);
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.stop_observing();
    }
}

pub struct ProcessLauncher<'a> {
    ctx: &'a SupervisorContext,
}

impl<'a> ProcessLauncher<'a> {
    pub fn new(ctx: &'a SupervisorContext) -> Self {
        Self { ctx }
    }

    /// Start the dev server detached from this process and begin observing it.
    pub async fn launch(&self) -> WardenResult<ServerProcess> {
        let config = &self.ctx.config;
        let log = &self.ctx.log;

        fs::create_dir_all(config.state_path())?;
        let command = config.dev_command_line();
        let spec = CommandSpec::shell(&command)
            .workdir(&config.target_dir)
            .env("PORT", config.app_port.to_string())
            .env("NEXT_TELEMETRY_DISABLED", "1")
            .output_files(config.state_path(), "dev-server");

        log.info(STAGE, format!("Starting {}", command));
        let spawned = self.ctx.runner.spawn_detached(&spec).await?;
        log.info(STAGE, format!("Dev server started (PID: {})", spawned.pid));

        let stdout = BoundedBuffer::new(config.output_buffer_lines);
        let stderr = BoundedBuffer::new(config.output_buffer_lines);
        let readiness = ReadinessLatch::new();
        let exit = Arc::new(Mutex::new(None));

        let observer = {
            let observe_out = observe(
                spawned.stdout,
                "stdout",
                stdout.clone(),
                readiness.clone(),
                config.ready_markers.clone(),
                log.clone(),
            );
            let observe_err = observe(
                spawned.stderr,
                "stderr",
                stderr.clone(),
                readiness.clone(),
                config.ready_markers.clone(),
                log.clone(),
            );
            let exit_future = spawned.exit;
            let (stdout, stderr, readiness, exit, log) =
                (stdout.clone(), stderr.clone(), readiness.clone(), exit.clone(), log.clone());
            let pid = spawned.pid;

            tokio::spawn(async move {
                let (code, _, _) = tokio::join!(exit_future, observe_out, observe_err);
                if readiness.is_set() {
                    log.warn(STAGE, format!("Dev server (PID: {}) exited with {:?}", pid, code));
                } else {
                    log.error(
                        STAGE,
                        format!(
                            "Dev server (PID: {}) exited with {:?} before becoming ready\n--- stdout ---\n{}\n--- stderr ---\n{}",
                            pid,
                            code,
                            stdout.contents(),
                            stderr.contents()
                        ),
                    );
                }
                *exit.lock() = Some(code);
            })
        };

        Ok(ServerProcess {
            pid: spawned.pid,
            stdout,
            stderr,
            readiness,
            exit,
            observer: Some(observer),
        })
    }
}

async fn observe(
    mut lines: LineStream,
    stream: &'static str,
    buffer: BoundedBuffer,
    readiness: ReadinessLatch,
    markers: Vec<String>,
    log: BuildLog,
) {
    while let Some(line) = lines.next().await {
        tracing::debug!(target: "warden::devserver", stream, "{}", line);
        if !readiness.is_set() && markers.iter().any(|m| line.contains(m.as_str())) && readiness.set(ReadySource::Stream) {
            log.info(STAGE, format!("Ready marker seen on {}: {}", stream, line.trim()));
        }
        buffer.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use std::time::Duration;
    use warden_runner::{MockProcess, MockRunner};

    fn context(dir: &std::path::Path, runner: &MockRunner) -> SupervisorContext {
        SupervisorContext::new(
            Arc::new(SupervisorConfig::new(dir).with_app_port(3100)),
            Arc::new(runner.clone()),
        )
    }

    #[test]
    fn test_latch_is_set_once() {
        let latch = ReadinessLatch::new();
        assert!(!latch.is_set());

        assert!(latch.set(ReadySource::Probe));
        assert!(!latch.set(ReadySource::Stream));
        assert_eq!(latch.source(), Some(ReadySource::Probe));
    }

    #[tokio::test]
    async fn test_latch_wait_wakes_on_set() {
        let latch = ReadinessLatch::new();
        let setter = latch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.set(ReadySource::Stream);
        });

        let source = tokio::time::timeout(Duration::from_secs(2), latch.wait()).await.unwrap();
        assert_eq!(source, ReadySource::Stream);
    }

    #[test]
    fn test_bounded_buffer_keeps_latest_lines() {
        let buffer = BoundedBuffer::new(2);
        buffer.push("a".to_string());
        buffer.push("b".to_string());
        buffer.push("c".to_string());

        assert_eq!(buffer.lines(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_ready_marker_sets_latch() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().add_process(
            MockProcess::running(5150)
                .stdout_line("> next dev --port 3100")
                .stdout_line(" ✓ Ready in 1843ms"),
        );
        let ctx = context(dir.path(), &runner);

        let server = ProcessLauncher::new(&ctx).launch().await.unwrap();
        let source = tokio::time::timeout(Duration::from_secs(2), server.readiness.wait())
            .await
            .unwrap();

        assert_eq!(source, ReadySource::Stream);
        assert!(server.ready_signal_seen());
        assert_eq!(server.pid, 5150);

        let calls = runner.calls_matching("npm run dev -- --port 3100");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].env.get("PORT").map(String::as_str), Some("3100"));
        server.release();
    }

    #[tokio::test]
    async fn test_early_exit_is_logged_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().add_process(
            MockProcess::running(6000)
                .stderr_line("Error: Cannot find module 'next'")
                .exits_with(1),
        );
        let ctx = context(dir.path(), &runner);

        let server = ProcessLauncher::new(&ctx).launch().await.unwrap();
        for _ in 0..50 {
            if server.has_exited() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(server.exit_status(), Some(Some(1)));
        assert!(!server.readiness.is_set());
        assert!(server.stderr.contents().contains("Cannot find module"));
        assert!(ctx.log.render().contains("before becoming ready"));
    }
}
