//! Build command - Run the supervised pipeline once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use warden_core::{
    BuildFailure, FailureKind, GeneratorError, HttpGenerator, PipelineOutcome, Supervisor,
    SupervisorConfig,
};
use warden_runner::{ShellRunner, ShellRunnerOptions};

use super::{CommandFailure, TargetArgs};
use crate::ExitCodes;

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Requirement text; enables generator-driven repair
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Abort the pipeline after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Print commands instead of running them
    #[arg(long)]
    pub dry_run: bool,
}

/// Build a supervisor backed by real processes and, if credentials exist, the HTTP generator.
pub fn supervisor(config: SupervisorConfig, dry_run: bool) -> Supervisor {
    let mut options = ShellRunnerOptions::new();
    if dry_run {
        options = options.dry_run();
    }
    let supervisor = Supervisor::new(config, Arc::new(ShellRunner::new(options)));

    match HttpGenerator::from_env() {
        Ok(generator) => {
            info!("Repair enabled with model {}", generator.model());
            supervisor.with_generator(Arc::new(generator))
        }
        Err(GeneratorError::NotConfigured) => {
            info!("No generator credentials, repair disabled");
            supervisor
        }
        Err(e) => {
            warn!("Generator unavailable: {}", e);
            supervisor
        }
    }
}

pub fn failure_exit_code(kind: FailureKind) -> u8 {
    match kind {
        FailureKind::Validation | FailureKind::Compile => ExitCodes::BUILD_FAILURE,
        FailureKind::Runtime | FailureKind::Timeout => ExitCodes::RUNTIME_FAILURE,
        FailureKind::Install | FailureKind::Cancelled | FailureKind::Internal => {
            ExitCodes::GENERAL_ERROR
        }
    }
}

pub async fn execute(args: BuildArgs, json: bool) -> Result<()> {
    let config = args.target.load_config()?;
    info!("Building {}", config.target_dir.display());

    let supervisor = supervisor(config, args.dry_run);
    let prompt = args.prompt.as_deref();
    if prompt.is_some() && !supervisor.has_generator() {
        warn!("A prompt was given but no generator is configured; failures will not be repaired");
    }

    let outcome = match args.deadline_secs {
        Some(secs) => {
            supervisor
                .run_with_deadline(prompt, Duration::from_secs(secs))
                .await
        }
        None => supervisor.run(prompt).await,
    };

    match outcome {
        PipelineOutcome::Ready(success) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&success)?);
            } else {
                println!("✅ App is live at {}", success.url);
                println!("   PID: {}", success.pid);
                if success.repair_attempts > 0 {
                    println!("   Repairs: {}", success.repair_attempts);
                }
            }
            Ok(())
        }
        PipelineOutcome::Busy(holder) => {
            let message = match holder {
                Some(record) => format!(
                    "Build already in progress (PID {} since {})",
                    record.pid,
                    record.acquired_at.to_rfc3339()
                ),
                None => "Build already in progress".to_string(),
            };
            Err(CommandFailure::new(ExitCodes::BUSY, message).into())
        }
        PipelineOutcome::Failed(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                print_failure(&failure);
            }
            Err(CommandFailure::new(
                failure_exit_code(failure.kind),
                format!("{} failure: {}", failure.kind, failure.error),
            )
            .into())
        }
    }
}

fn print_failure(failure: &BuildFailure) {
    eprintln!("❌ {} failure: {}", failure.kind, failure.error);
    for (label, text) in [("stdout", &failure.stdout), ("stderr", &failure.stderr)] {
        if let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) {
            eprintln!("\n--- {} ---\n{}", label, text.trim_end());
        }
    }
    eprintln!("\n💡 {}", failure.suggestion);
}
