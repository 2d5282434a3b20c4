//! Per-run pipeline context and the append-only build log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_runner::CommandRunner;

use crate::config::SupervisorConfig;
use crate::generator::Generator;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

/// Append-only log of one pipeline run, shared with background observers.
///
/// Every entry is mirrored to `tracing`, so nothing written here is lost when
/// the run succeeds and the log is discarded.
#[derive(Debug, Clone, Default)]
pub struct BuildLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(stage = source, "{}", message),
            LogLevel::Info => tracing::info!(stage = source, "{}", message),
            LogLevel::Warn => tracing::warn!(stage = source, "{}", message),
            LogLevel::Error => tracing::error!(stage = source, "{}", message),
        }
        self.entries.lock().push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            source: source.to_string(),
        });
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Info, source, message);
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Warn, source, message);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Error, source, message);
    }

    pub fn debug(&self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Debug, source, message);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Render all entries as plain text, one line per entry.
    pub fn render(&self) -> String {
        self.entries
            .lock()
            .iter()
            .map(|e| {
                format!(
                    "[{}] {:<5} {}: {}",
                    e.timestamp.format("%H:%M:%S%.3f"),
                    e.level.as_str(),
                    e.source,
                    e.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Everything a pipeline stage needs, passed explicitly instead of held in globals.
#[derive(Clone)]
pub struct SupervisorContext {
    /// Unique ID of this pipeline run, also used as the lock holder ID
    pub execution_id: Uuid,
    pub config: Arc<SupervisorConfig>,
    pub runner: Arc<dyn CommandRunner>,
    pub generator: Option<Arc<dyn Generator>>,
    pub log: BuildLog,
}

impl SupervisorContext {
    pub fn new(config: Arc<SupervisorConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            config,
            runner,
            generator: None,
            log: BuildLog::new(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }
}

impl std::fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorContext")
            .field("execution_id", &self.execution_id)
            .field("target_dir", &self.config.target_dir)
            .field("generator", &self.generator.is_some())
            .field("log_entries", &self.log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_log_is_append_only_and_shared() {
        let log = BuildLog::new();
        let observer = log.clone();

        log.info("install", "Installing dependencies");
        observer.error("launch", "Dev server exited");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "install");
        assert_eq!(entries[1].level, LogLevel::Error);
    }

    #[test]
    fn test_render_contains_every_entry() {
        let log = BuildLog::new();
        log.info("compile", "Running npm run build");
        log.warn("compile", "Build failed");

        let rendered = log.render();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("INFO  compile: Running npm run build"));
        assert!(rendered.contains("WARN  compile: Build failed"));
    }
}
