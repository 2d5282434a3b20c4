//! Error types for policy module.

use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors that can occur during policy operations.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Rule compilation failed: {rule} - {message}")]
    InvalidRule { rule: String, message: String },

    #[error("Validation target is not a directory: {0}")]
    InvalidTarget(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
