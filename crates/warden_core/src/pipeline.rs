//! The supervised build pipeline.
//!
//! lock → install → validate ⇄ compile (with repair) → reclaim port → launch → probe.
//! The lock is released on every exit path, including cancellation; a
//! launched dev server is never killed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use warden_policy::{RuleSet, Validator};
use warden_runner::CommandRunner;

use crate::config::SupervisorConfig;
use crate::context::{BuildLog, SupervisorContext};
use crate::error::{FailureKind, FatalBuildError, WardenError};
use crate::generator::Generator;
use crate::health::{HealthProber, ProbeVerdict};
use crate::install::DependencyInstaller;
use crate::launcher::{ProcessLauncher, ReadySource};
use crate::lock::{LockAcquisition, LockManager, LockRecord};
use crate::ports::PortReclaimer;
use crate::repair::RepairLoop;

const STAGE: &str = "pipeline";

/// A server that passed the health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSuccess {
    pub success: bool,
    pub url: String,
    pub pid: u32,
    /// Generator calls spent to get here
    pub repair_attempts: u32,
    pub ready_source: Option<ReadySource>,
}

/// A terminal failure with everything a human needs to act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFailure {
    pub kind: FailureKind,
    pub error: String,
    /// Rendered build log of the run
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub suggestion: String,
}

impl BuildFailure {
    pub fn new(fatal: FatalBuildError, log: &BuildLog) -> Self {
        Self {
            kind: fatal.kind,
            suggestion: fatal.kind.suggestion().to_string(),
            error: fatal.message,
            logs: log.render(),
            stdout: fatal.stdout,
            stderr: fatal.stderr,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Ready(BuildSuccess),
    /// Another run holds the directory lock
    Busy(Option<LockRecord>),
    Failed(BuildFailure),
}

impl PipelineOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    pub fn failure(&self) -> Option<&BuildFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Runs the pipeline against one target directory.
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    runner: Arc<dyn CommandRunner>,
    generator: Option<Arc<dyn Generator>>,
    rules: RuleSet,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let rules = RuleSet::app_router(&config.path_alias);
        Self {
            config: Arc::new(config),
            runner,
            generator: None,
            rules,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the static validation rules.
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(self.config.lock_path())
    }

    /// Run the pipeline once. `prompt` enables repair when a generator is configured.
    pub async fn run(&self, prompt: Option<&str>) -> PipelineOutcome {
        let ctx = self.context();
        self.run_in(&ctx, prompt).await
    }

    /// Run the pipeline under a wall-clock deadline.
    ///
    /// On expiry the in-flight stage is dropped, which releases the lock.
    pub async fn run_with_deadline(&self, prompt: Option<&str>, deadline: Duration) -> PipelineOutcome {
        let ctx = self.context();
        match tokio::time::timeout(deadline, self.run_in(&ctx, prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                ctx.log.error(STAGE, format!("Pipeline cancelled after {:?}", deadline));
                PipelineOutcome::Failed(BuildFailure::new(
                    FatalBuildError::new(
                        FailureKind::Cancelled,
                        format!("pipeline did not finish within {}s", deadline.as_secs()),
                    ),
                    &ctx.log,
                ))
            }
        }
    }

    fn context(&self) -> SupervisorContext {
        let ctx = SupervisorContext::new(self.config.clone(), self.runner.clone());
        match &self.generator {
            Some(generator) => ctx.with_generator(generator.clone()),
            None => ctx,
        }
    }

    async fn run_in(&self, ctx: &SupervisorContext, prompt: Option<&str>) -> PipelineOutcome {
        let span = tracing::info_span!("pipeline", id = %ctx.execution_id);
        async {
            let lock = match self.lock_manager().acquire(ctx.execution_id) {
                Ok(LockAcquisition::Acquired(lock)) => lock,
                Ok(LockAcquisition::Busy(holder)) => {
                    ctx.log.warn(STAGE, "Build already in progress");
                    return PipelineOutcome::Busy(holder);
                }
                Err(e) => {
                    return PipelineOutcome::Failed(BuildFailure::new(e.into(), &ctx.log));
                }
            };

            ctx.log.info(
                STAGE,
                format!("Build started for {}", ctx.config.target_dir.display()),
            );
            let result = self.execute(ctx, prompt).await;
            lock.release();

            match result {
                Ok(success) => PipelineOutcome::Ready(success),
                Err(fatal) => {
                    ctx.log.error(STAGE, fatal.to_string());
                    PipelineOutcome::Failed(BuildFailure::new(fatal, &ctx.log))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, ctx: &SupervisorContext, prompt: Option<&str>) -> Result<BuildSuccess, FatalBuildError> {
        ctx.config.validate()?;

        DependencyInstaller::new(ctx).ensure_installed().await?;

        let validator = Validator::new(&self.rules).map_err(WardenError::from)?;
        let report = RepairLoop::new(ctx, &validator, prompt).run().await?;

        PortReclaimer::new(ctx).free_port(ctx.config.app_port).await;

        let prober = HealthProber::new(ctx)?;
        let server = ProcessLauncher::new(ctx).launch().await?;
        let verdict = prober.await_ready(&server.readiness).await;

        let outcome = match verdict {
            ProbeVerdict::Ready { .. } => {
                let url = ctx.config.public_url();
                ctx.log.info(STAGE, format!("App is live at {}", url));
                Ok(BuildSuccess {
                    success: true,
                    url,
                    pid: server.pid,
                    repair_attempts: report.repairs_used(),
                    ready_source: server.readiness.source(),
                })
            }
            ProbeVerdict::RuntimeFailure { consecutive_errors } => Err(FatalBuildError::new(
                FailureKind::Runtime,
                format!(
                    "dev server answered HTTP 500 {} times in a row",
                    consecutive_errors
                ),
            )
            .with_stdout(server.stdout.contents())
            .with_stderr(server.stderr.contents())),
            ProbeVerdict::Timeout { attempts } => Err(FatalBuildError::new(
                FailureKind::Timeout,
                format!("dev server not ready after {} probes", attempts),
            )
            .with_stdout(server.stdout.contents())
            .with_stderr(server.stderr.contents())),
        };

        server.release();
        outcome
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("target_dir", &self.config.target_dir)
            .field("app_port", &self.config.app_port)
            .field("generator", &self.generator.is_some())
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_runner::MockRunner;

    #[tokio::test]
    async fn test_busy_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new();
        let supervisor = Supervisor::new(SupervisorConfig::new(dir.path()), Arc::new(runner.clone()));

        let LockAcquisition::Acquired(held) = supervisor
            .lock_manager()
            .acquire(uuid::Uuid::new_v4())
            .unwrap()
        else {
            panic!("expected to acquire");
        };

        let outcome = supervisor.run(None).await;

        match outcome {
            PipelineOutcome::Busy(Some(record)) => assert_eq!(record.holder_id, held.record().holder_id),
            other => panic!("expected busy, got {:?}", other),
        }
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::new(dir.path())
            .with_app_port(9000)
            .with_control_port(9000);
        let supervisor = Supervisor::new(config, Arc::new(MockRunner::new()));

        let outcome = supervisor.run(None).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Internal);
        assert!(!failure.suggestion.is_empty());
        assert!(!supervisor.lock_manager().is_locked());
    }

    #[test]
    fn test_failure_serializes_without_empty_streams() {
        let log = BuildLog::new();
        log.error("compile", "Build failed");
        let failure = BuildFailure::new(
            FatalBuildError::new(FailureKind::Compile, "Build failed with exit code 1"),
            &log,
        );

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "compile");
        assert!(json.get("stdout").is_none());
        assert!(json["logs"].as_str().unwrap().contains("Build failed"));
        assert!(json["suggestion"].as_str().unwrap().len() > 10);
    }
}
