//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during runner operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn `{command}`: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// The command was killed; output printed before the kill is kept.
    #[error("Command timeout after {seconds} seconds")]
    Timeout {
        seconds: u64,
        stdout: String,
        stderr: String,
    },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
