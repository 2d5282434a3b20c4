//! Bounded repair loop around the static validator and the compile gate.
//!
//! Attempt index `a` runs from 0 to [`MAX_REPAIR_ATTEMPTS`] inclusive. Index 0
//! is the unrepaired project. A failure at any index below the ceiling hands
//! the failure to the generator and loops; a failure at the ceiling, or any
//! failure when repair is impossible, is terminal.

use serde::{Deserialize, Serialize};
use warden_policy::{ValidationFinding, Validator};

use crate::compile::{CompileGate, CompileResult};
use crate::context::SupervisorContext;
use crate::error::{FailureKind, FatalBuildError, GeneratorError};
use crate::generator::{GeneratedFiles, GenerationRequest};
use crate::install::DependencyInstaller;
use crate::signatures::{classify_corruption, CorruptionKind};

pub const MAX_REPAIR_ATTEMPTS: u32 = 2;

const STAGE: &str = "repair";

/// The failure that ended one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggeringFailure {
    Validation(ValidationFinding),
    Compile(CompileResult),
}

impl TriggeringFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Compile(_) => FailureKind::Compile,
        }
    }

    /// Text handed to the generator describing exactly what broke.
    pub fn error_context(&self) -> String {
        match self {
            Self::Validation(finding) => finding.to_error_context(),
            Self::Compile(result) => format!(
                "The production build failed. Full build output:\n\n{}",
                result.raw_output
            ),
        }
    }

    fn summary(&self) -> String {
        match self {
            Self::Validation(finding) => format!("Static validation failed: {}", finding),
            Self::Compile(result) => match result.exit_code {
                Some(code) => format!("Build failed with exit code {}", code),
                None => "Build timed out".to_string(),
            },
        }
    }

    fn into_fatal(self, reason: &str) -> FatalBuildError {
        let message = format!("{} ({})", self.summary(), reason);
        match self {
            Self::Validation(finding) => {
                FatalBuildError::new(FailureKind::Validation, message).with_stderr(finding.to_error_context())
            }
            Self::Compile(result) => FatalBuildError::new(FailureKind::Compile, message)
                .with_stdout(result.stdout)
                .with_stderr(result.stderr),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub index: u32,
    pub triggering_failure: Option<TriggeringFailure>,
    pub generator_invoked: bool,
    /// Corruption healed by a clean reinstall during this attempt
    pub environment_healed: Option<CorruptionKind>,
}

impl RepairAttempt {
    fn new(index: u32) -> Self {
        Self {
            index,
            triggering_failure: None,
            generator_invoked: false,
            environment_healed: None,
        }
    }
}

/// A successful run of the loop.
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub attempts: Vec<RepairAttempt>,
    pub compile: CompileResult,
}

impl RepairReport {
    /// Number of generator calls made.
    pub fn repairs_used(&self) -> u32 {
        self.attempts.iter().filter(|a| a.generator_invoked).count() as u32
    }
}

pub struct RepairLoop<'a> {
    ctx: &'a SupervisorContext,
    validator: &'a Validator,
    prompt: Option<&'a str>,
}

impl<'a> RepairLoop<'a> {
    pub fn new(ctx: &'a SupervisorContext, validator: &'a Validator, prompt: Option<&'a str>) -> Self {
        Self {
            ctx,
            validator,
            prompt: prompt.filter(|p| !p.trim().is_empty()),
        }
    }

    /// Whether a failure can be handed to the generator at all.
    pub fn can_repair(&self) -> bool {
        self.prompt.is_some() && self.ctx.generator.is_some()
    }

    pub async fn run(&self) -> Result<RepairReport, FatalBuildError> {
        let log = &self.ctx.log;
        let root = &self.ctx.config.target_dir;
        let installer = DependencyInstaller::new(self.ctx);
        let mut attempts = Vec::new();

        if !self.can_repair() {
            log.info(STAGE, "Repair disabled: no prompt supplied or generator not configured");
        }

        for index in 0..=MAX_REPAIR_ATTEMPTS {
            let mut attempt = RepairAttempt::new(index);
            log.info(STAGE, format!("Attempt {}/{}", index, MAX_REPAIR_ATTEMPTS));

            let failure = loop {
                let finding = self.validator.find_violation(root).map_err(|e| {
                    FatalBuildError::new(FailureKind::Internal, format!("Validator failed: {}", e))
                })?;
                if let Some(finding) = finding {
                    log.warn("validate", finding.to_string());
                    break TriggeringFailure::Validation(finding);
                }

                let result = CompileGate::new(self.ctx).compile().await?;
                if result.succeeded {
                    attempts.push(attempt);
                    return Ok(RepairReport {
                        attempts,
                        compile: result,
                    });
                }

                // Environment faults are healed without spending repair budget, once per index.
                if attempt.environment_healed.is_none() {
                    if let Some(kind) = classify_corruption(&result.raw_output) {
                        log.warn(STAGE, format!("Build output matches {} corruption, reinstalling", kind));
                        attempt.environment_healed = Some(kind);
                        installer.clean_environment().map_err(|e| {
                            FatalBuildError::new(FailureKind::Internal, format!("Failed to clean environment: {}", e))
                        })?;
                        installer.ensure_installed().await?;
                        continue;
                    }
                }
                break TriggeringFailure::Compile(result);
            };

            attempt.triggering_failure = Some(failure.clone());

            if !self.can_repair() {
                attempts.push(attempt);
                return Err(failure.into_fatal("repair not attempted"));
            }
            if index == MAX_REPAIR_ATTEMPTS {
                attempts.push(attempt);
                log.error(STAGE, format!("Repair budget of {} attempts exhausted", MAX_REPAIR_ATTEMPTS));
                return Err(failure.into_fatal("repair attempts exhausted"));
            }

            attempt.generator_invoked = true;
            match self.repair(&failure, index + 1).await {
                Ok(files) => {
                    log.info(STAGE, format!("Generator rewrote {} file(s)", files.len()));
                    installer.ensure_installed().await?;
                }
                Err(e) => {
                    // A bad response spends this attempt; the next index re-checks the unchanged tree.
                    log.error(STAGE, format!("Repair attempt {} failed: {}", index + 1, e));
                }
            }
            attempts.push(attempt);
        }

        Err(FatalBuildError::new(
            FailureKind::Internal,
            "repair loop ended without a result",
        ))
    }

    async fn repair(&self, failure: &TriggeringFailure, attempt: u32) -> Result<GeneratedFiles, GeneratorError> {
        let (Some(prompt), Some(generator)) = (self.prompt, self.ctx.generator.as_ref()) else {
            return Err(GeneratorError::NotConfigured);
        };
        let config = &self.ctx.config;

        let request = GenerationRequest::new(prompt)
            .with_error_context(failure.error_context())
            .with_attempt(attempt);
        self.ctx.log.info(STAGE, format!("Requesting repair {} from generator", attempt));

        let files = generator.generate(&request).await?;
        files.validate(&config.protected_names())?;
        files
            .write_to(&config.target_dir)
            .map_err(|e| GeneratorError::Request(format!("failed to write generated files: {}", e)))?;
        Ok(files)
    }
}
