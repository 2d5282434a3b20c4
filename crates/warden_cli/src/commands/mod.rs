//! CLI command definitions.
//!
//! Each subcommand drives one entry point of the build supervisor.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use warden_core::SupervisorConfig;

pub mod build;
pub mod serve;
pub mod unlock;
pub mod validate;

/// buildwarden - supervised builds for generated Next.js apps
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about = "buildwarden - supervised builds for generated Next.js apps")]
#[command(long_about = r#"
buildwarden installs, validates, compiles, repairs, launches and health-checks
a generated Next.js project, allowing one build per target directory at a time.

COMMANDS:
  build     → Run the full pipeline once
  serve     → Expose the pipeline over an HTTP control plane
  validate  → Run the static validator only
  unlock    → Inspect or remove a stale build lock

EXIT CODES:
  0 - Success
  1 - General error
  3 - Validation or compile failure
  6 - Build already in progress
  7 - Runtime failure or server timeout
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervised build pipeline once
    Build(build::BuildArgs),

    /// Serve the control-plane HTTP API
    Serve(serve::ServeArgs),

    /// Run static validation on the target directory
    Validate(validate::ValidateArgs),

    /// Inspect or remove the target directory's build lock
    Unlock(unlock::UnlockArgs),
}

/// Options shared by every command that works on a target directory.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Target project directory [default: app]
    #[arg(short, long, env = "WARDEN_DIR")]
    pub dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port the dev server is launched on
    #[arg(long, env = "WARDEN_APP_PORT")]
    pub app_port: Option<u16>,

    /// Port of the control plane (never reclaimed)
    #[arg(long, env = "WARDEN_CONTROL_PORT")]
    pub control_port: Option<u16>,
}

impl TargetArgs {
    /// Build the supervisor config: file first, then command-line overrides.
    pub fn load_config(&self) -> Result<SupervisorConfig> {
        let mut config = match &self.config {
            Some(path) => SupervisorConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => SupervisorConfig::default(),
        };
        if let Some(dir) = &self.dir {
            config.target_dir = dir.clone();
        }
        if let Some(port) = self.app_port {
            config.app_port = port;
        }
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// A command finished with a known, categorised failure.
#[derive(Debug)]
pub struct CommandFailure {
    pub exit_code: u8,
    pub message: String,
}

impl CommandFailure {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandFailure {}
