//! # warden_core
//!
//! Build supervisor for generated Next.js projects.
//!
//! A [`Supervisor`] takes a target directory and drives it through a fixed
//! pipeline while holding an exclusive lock on the directory:
//!
//! 1. [`LockManager`]: non-blocking single-flight lock
//! 2. [`DependencyInstaller`]: fingerprint-cached install with self-healing
//! 3. Static validation via `warden_policy`
//! 4. [`CompileGate`]: strict build gate
//! 5. [`RepairLoop`]: bounded generator-driven repair of 3 and 4
//! 6. [`PortReclaimer`]: frees the app port
//! 7. [`ProcessLauncher`]: detached dev server
//! 8. [`HealthProber`]: HTTP readiness and runtime-failure detection
//!
//! Every run produces a [`PipelineOutcome`]; contention and terminal failures
//! are values, not errors.

pub mod compile;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod health;
pub mod install;
pub mod launcher;
pub mod lock;
pub mod pipeline;
pub mod ports;
pub mod repair;
pub mod signatures;

pub use compile::{CompileGate, CompileResult};
pub use config::{HealthConfig, SupervisorConfig};
pub use context::{BuildLog, LogEntry, LogLevel, SupervisorContext};
pub use error::{
    FailureKind, FatalBuildError, GeneratorError, InstallError, WardenError, WardenResult,
};
pub use generator::{parse_file_blocks, GeneratedFiles, GenerationRequest, Generator, HttpGenerator};
pub use health::{HealthProber, HealthStatus, ProbeObservation, ProbeVerdict};
pub use install::{DependencyInstaller, InstallFingerprint, InstallOutcome};
pub use launcher::{BoundedBuffer, ProcessLauncher, ReadinessLatch, ReadySource, ServerProcess};
pub use lock::{BuildLock, LockAcquisition, LockManager, LockRecord};
pub use pipeline::{BuildFailure, BuildSuccess, PipelineOutcome, Supervisor};
pub use ports::{parse_listeners, PortReclaimer, PortReport};
pub use repair::{RepairAttempt, RepairLoop, RepairReport, TriggeringFailure, MAX_REPAIR_ATTEMPTS};
pub use signatures::{classify_corruption, CorruptionKind, CorruptionSignature, CORRUPTION_SIGNATURES};
