//! Dependency installer with fingerprint caching and self-healing retries.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};
use warden_runner::{CommandSpec, ExecutionResult, RunnerError};

use crate::context::SupervisorContext;
use crate::error::InstallError;
use crate::signatures::{classify_corruption, CorruptionKind};

const STAGE: &str = "install";

/// SHA-256 over the manifest and lockfile contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFingerprint(String);

impl InstallFingerprint {
    /// Hash the manifest and, if present, the lockfile.
    pub fn compute(manifest: &Path, lockfile: &Path) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(fs::read(manifest)?);
        hasher.update([0u8]);
        match fs::read(lockfile) {
            Ok(content) => hasher.update(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Read a cached fingerprint marker. Missing or empty markers yield `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        let line = content.lines().next()?.trim();
        if line.is_empty() {
            None
        } else {
            Some(Self(line.to_string()))
        }
    }

    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, format!("{}\n", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstallFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What `ensure_installed` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Fingerprint matched and packages were present; nothing was run
    Skipped,
    Installed {
        command: String,
        /// Corruption that was healed before the successful install
        healed: Option<CorruptionKind>,
        /// Whether the relaxed peer-dependency fallback was needed
        relaxed: bool,
    },
}

pub struct DependencyInstaller<'a> {
    ctx: &'a SupervisorContext,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(ctx: &'a SupervisorContext) -> Self {
        Self { ctx }
    }

    /// Install dependencies unless the cached fingerprint proves nothing changed.
    pub async fn ensure_installed(&self) -> Result<InstallOutcome, InstallError> {
        let config = &self.ctx.config;
        let log = &self.ctx.log;

        let fingerprint = self.fingerprint()?;
        let cached = InstallFingerprint::load(&config.fingerprint_path());
        if cached.as_ref() == Some(&fingerprint) && config.packages_path().is_dir() {
            log.info(STAGE, format!("Dependencies unchanged ({}), skipping install", short(&fingerprint)));
            return Ok(InstallOutcome::Skipped);
        }

        let locked = config.lockfile_path().exists();
        let command = if locked {
            config.install_locked.clone()
        } else {
            config.install_resolve.clone()
        };
        let mut transcript = String::new();

        log.info(STAGE, format!("Running {}", command));
        let first = self.run(&command, &mut transcript).await?;
        if first.success() {
            self.persist_fingerprint()?;
            return Ok(InstallOutcome::Installed {
                command,
                healed: None,
                relaxed: false,
            });
        }

        if let Some(kind) = classify_corruption(&first.combined_output()) {
            log.warn(STAGE, format!("Install output matches {} corruption, cleaning environment", kind));
            self.clean_environment()
                .map_err(|e| InstallError::new(format!("Failed to clean environment: {}", e), transcript.clone()))?;

            // The lockfile is gone now, so the retry has to resolve.
            let retry = config.install_resolve.clone();
            log.info(STAGE, format!("Retrying with {}", retry));
            let second = self.run(&retry, &mut transcript).await?;
            if second.success() {
                self.persist_fingerprint()?;
                return Ok(InstallOutcome::Installed {
                    command: retry,
                    healed: Some(kind),
                    relaxed: false,
                });
            }
            log.error(STAGE, format!("{} failed again after cleaning", retry));
            return Err(InstallError::new(
                format!("{} failed after healing {} corruption", retry, kind),
                transcript,
            )
            .with_signature(kind));
        }

        if !locked {
            let relaxed = config.install_relaxed.clone();
            log.warn(STAGE, format!("{} failed, retrying with {}", command, relaxed));
            let second = self.run(&relaxed, &mut transcript).await?;
            if second.success() {
                self.persist_fingerprint()?;
                return Ok(InstallOutcome::Installed {
                    command: relaxed,
                    healed: None,
                    relaxed: true,
                });
            }
        }

        log.error(STAGE, "Dependency install failed");
        Err(InstallError::new(
            format!("{} exited with code {}", command, first.exit_code),
            transcript,
        ))
    }

    /// Delete build cache, installed packages, lockfile and cached fingerprint.
    pub fn clean_environment(&self) -> std::io::Result<()> {
        let config = &self.ctx.config;
        remove_dir(&config.build_cache_path())?;
        remove_dir(&config.packages_path())?;
        remove_file(&config.lockfile_path())?;
        remove_file(&config.fingerprint_path())?;
        self.ctx.log.info(STAGE, "Removed build cache, installed packages, lockfile and fingerprint");
        Ok(())
    }

    fn fingerprint(&self) -> Result<InstallFingerprint, InstallError> {
        let config = &self.ctx.config;
        InstallFingerprint::compute(&config.manifest_path(), &config.lockfile_path()).map_err(|e| {
            InstallError::new(
                format!("Cannot read {}: {}", config.manifest_path().display(), e),
                String::new(),
            )
        })
    }

    // Hashed after the install so a lockfile written by the resolver is included.
    fn persist_fingerprint(&self) -> Result<(), InstallError> {
        let fingerprint = self.fingerprint()?;
        fingerprint
            .store(&self.ctx.config.fingerprint_path())
            .map_err(|e| InstallError::new(format!("Failed to write fingerprint: {}", e), String::new()))?;
        self.ctx.log.info(STAGE, format!("Dependencies installed ({})", short(&fingerprint)));
        Ok(())
    }

    async fn run(&self, command: &str, transcript: &mut String) -> Result<ExecutionResult, InstallError> {
        let config = &self.ctx.config;
        let spec = CommandSpec::shell(command)
            .workdir(&config.target_dir)
            .timeout(config.install_timeout_seconds);

        let result = match self.ctx.runner.run(&spec).await {
            Ok(result) => result,
            Err(RunnerError::Timeout { seconds, stdout, stderr }) => {
                let message = format!("{} timed out after {}s", command, seconds);
                let partial = [stdout, stderr].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>();
                record(transcript, command, &partial.join("\n"));
                return Err(InstallError::new(message, transcript.clone()));
            }
            Err(e) => {
                return Err(InstallError::new(format!("{} could not run: {}", command, e), transcript.clone()));
            }
        };

        record(transcript, command, &result.combined_output());
        Ok(result)
    }
}

fn record(transcript: &mut String, command: &str, output: &str) {
    if !transcript.is_empty() {
        transcript.push('\n');
    }
    transcript.push_str(&format!("$ {}\n{}", command, output));
}

fn short(fingerprint: &InstallFingerprint) -> &str {
    let s = fingerprint.as_str();
    &s[..s.len().min(12)]
}

fn remove_dir(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
