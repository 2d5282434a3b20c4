//! # warden_runner
//!
//! Subprocess execution layer for buildwarden.
//!
//! Every install, build and dev-server command the supervisor issues goes
//! through the [`CommandRunner`] trait, so the pipeline can be driven by a
//! real shell or by a scripted [`MockRunner`] in tests.
//!
//! # Features
//!
//! - **Run to completion**: captured stdout/stderr, exit code and timeout
//! - **Detached spawn**: long-lived children that outlive the supervisor,
//!   with their output exposed as line streams
//! - **Dry-Run Mode**: log commands without executing them
//! - **Mock Runner**: scripted responses and captured calls
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_runner::{CommandRunner, CommandSpec, ShellRunner, ShellRunnerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ShellRunner::new(ShellRunnerOptions::default());
//!
//!     let spec = CommandSpec::shell("npm run build")
//!         .workdir("/srv/app")
//!         .timeout(600);
//!
//!     let result = runner.run(&spec).await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod runner;
pub mod shell;

pub use config::CommandSpec;
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockProcess, MockResponse, MockRunner};
pub use runner::{CommandRunner, ExecutionResult, LineStream, SpawnedProcess};
pub use shell::{LogHandler, LogLine, LogStream, ShellRunner, ShellRunnerOptions};
