//! Strict compile gate: exit status zero is the only success.

use std::fs;
use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use warden_runner::{CommandSpec, RunnerError};

use crate::context::SupervisorContext;
use crate::error::WardenResult;

const STAGE: &str = "compile";

/// Outcome of one build. Never merged across attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResult {
    pub succeeded: bool,
    /// Combined stdout and stderr
    pub raw_output: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the build was killed on timeout
    pub exit_code: Option<i64>,
}

pub struct CompileGate<'a> {
    ctx: &'a SupervisorContext,
}

impl<'a> CompileGate<'a> {
    pub fn new(ctx: &'a SupervisorContext) -> Self {
        Self { ctx }
    }

    /// Clear stale build output and run the build command to completion.
    pub async fn compile(&self) -> WardenResult<CompileResult> {
        let config = &self.ctx.config;
        let log = &self.ctx.log;

        match fs::remove_dir_all(config.build_cache_path()) {
            Ok(()) => log.debug(STAGE, format!("Removed stale {}", config.build_cache_dir)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        log.info(STAGE, format!("Running {}", config.build_command));
        let spec = CommandSpec::shell(&config.build_command)
            .workdir(&config.target_dir)
            .env("NEXT_TELEMETRY_DISABLED", "1")
            .timeout(config.build_timeout_seconds);

        let result = match self.ctx.runner.run(&spec).await {
            Ok(result) => result,
            Err(RunnerError::Timeout { seconds, stdout, mut stderr }) => {
                let message = format!("{} timed out after {}s", config.build_command, seconds);
                log.error(STAGE, &message);
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&message);
                let raw_output = if stdout.is_empty() {
                    stderr.clone()
                } else {
                    format!("{}\n{}", stdout, stderr)
                };
                return Ok(CompileResult {
                    succeeded: false,
                    raw_output,
                    stdout,
                    stderr,
                    exit_code: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let succeeded = result.success();
        if succeeded {
            log.info(STAGE, format!("Build succeeded in {}ms", result.duration_ms));
        } else {
            log.warn(STAGE, format!("Build failed with exit code {}", result.exit_code));
        }

        Ok(CompileResult {
            succeeded,
            raw_output: result.combined_output(),
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: Some(result.exit_code),
        })
    }
}
