//! Error types for the supervisor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signatures::CorruptionKind;

/// Result type alias for supervisor operations.
pub type WardenResult<T> = Result<T, WardenError>;

/// Errors that can occur inside the supervisor.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Dependency install failed: {0}")]
    Install(#[from] InstallError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Runner error: {0}")]
    Runner(#[from] warden_runner::RunnerError),

    #[error("Policy error: {0}")]
    Policy(#[from] warden_policy::PolicyError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A failed dependency install, carrying everything the package manager printed.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct InstallError {
    pub message: String,
    /// Full captured output of every install command run in this attempt
    pub output: String,
    /// Corruption signature the output matched, if any
    pub signature: Option<CorruptionKind>,
}

impl InstallError {
    pub fn new(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: output.into(),
            signature: None,
        }
    }

    pub fn with_signature(mut self, kind: CorruptionKind) -> Self {
        self.signature = Some(kind);
        self
    }
}

/// Errors from the generator collaborator.
#[derive(Error, Debug, Clone)]
pub enum GeneratorError {
    #[error("Generator not configured: set WARDEN_GENERATOR_API_KEY or OPENAI_API_KEY")]
    NotConfigured,

    #[error("Generator request failed: {0}")]
    Request(String),

    #[error("Malformed generator response: {0}")]
    Malformed(String),
}

/// Stage at which a pipeline run terminally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Install,
    Validation,
    Compile,
    Runtime,
    Timeout,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Validation => "validation",
            Self::Compile => "compile",
            Self::Runtime => "runtime",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Next step a human can take for this kind of failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Install => {
                "Dependency installation failed. Check package.json for misspelled or \
                 incompatible packages, then delete node_modules and package-lock.json and retry."
            }
            Self::Validation => {
                "The generated sources break a structural rule. Fix the reported file, or \
                 retry with a prompt so the generator can repair it."
            }
            Self::Compile => {
                "The build failed. Review the compiler output above, fix the reported errors, \
                 or retry with a prompt so the generator can attempt a repair."
            }
            Self::Runtime => {
                "The app compiled but the server keeps answering HTTP 500. Check the dev server \
                 output for runtime errors in pages or server components."
            }
            Self::Timeout => {
                "The dev server never became ready. Check the dev server output for crashes and \
                 make sure nothing else is holding the application port."
            }
            Self::Cancelled => {
                "The pipeline hit its deadline. Retry, or raise the deadline if installs are slow."
            }
            Self::Internal => {
                "The supervisor hit an unexpected error. Check the logs, fix the environment \
                 and retry."
            }
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A terminal pipeline failure before logs and suggestion are attached.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct FatalBuildError {
    pub kind: FailureKind,
    pub message: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl FatalBuildError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }
}

impl From<InstallError> for FatalBuildError {
    fn from(err: InstallError) -> Self {
        FatalBuildError::new(FailureKind::Install, err.message).with_stdout(err.output)
    }
}

impl From<WardenError> for FatalBuildError {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::Install(install) => install.into(),
            other => FatalBuildError::new(FailureKind::Internal, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_suggestion() {
        for kind in [
            FailureKind::Install,
            FailureKind::Validation,
            FailureKind::Compile,
            FailureKind::Runtime,
            FailureKind::Timeout,
            FailureKind::Cancelled,
            FailureKind::Internal,
        ] {
            assert!(!kind.suggestion().is_empty(), "{} has no suggestion", kind);
        }
    }

    #[test]
    fn test_install_error_keeps_output() {
        let fatal: FatalBuildError = WardenError::Install(InstallError::new(
            "npm ci failed",
            "npm ERR! code ETARGET",
        ))
        .into();

        assert_eq!(fatal.kind, FailureKind::Install);
        assert_eq!(fatal.stdout.as_deref(), Some("npm ERR! code ETARGET"));
    }

    #[test]
    fn test_other_errors_are_internal() {
        let fatal: FatalBuildError = WardenError::Config("bad port".to_string()).into();
        assert_eq!(fatal.kind, FailureKind::Internal);
        assert!(fatal.message.contains("bad port"));
    }
}
