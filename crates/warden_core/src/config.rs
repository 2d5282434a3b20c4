//! Supervisor configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};

/// Health probing constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthConfig {
    /// Delay between two probes, in milliseconds
    pub interval_ms: u64,
    /// Maximum number of probes before giving up
    pub max_attempts: u32,
    /// Per-request timeout, in milliseconds
    pub request_timeout_ms: u64,
    /// Consecutive HTTP 500 responses that count as a runtime failure
    pub server_error_threshold: u32,
    /// Path probed on the loopback address
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            max_attempts: 30,
            request_timeout_ms: 3_000,
            server_error_threshold: 5,
            path: "/".to_string(),
        }
    }
}

impl HealthConfig {
    pub fn with_interval_ms(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_server_error_threshold(mut self, threshold: u32) -> Self {
        self.server_error_threshold = threshold;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration for one supervised target directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Target directory holding the generated project
    pub target_dir: PathBuf,
    /// Port the dev server is launched on (reclaimed before each launch)
    pub app_port: u16,
    /// Port of the supervisor's own control plane (never reclaimed)
    pub control_port: u16,
    /// Public host used when reporting the app URL
    pub public_host: String,

    pub manifest_file: String,
    pub lockfile: String,
    pub packages_dir: String,
    pub build_cache_dir: String,
    pub fingerprint_file: String,
    pub lock_file: String,
    /// Directory (relative to the target) receiving dev-server output
    pub state_dir: String,

    /// Install command when a lockfile is present
    pub install_locked: String,
    /// Install command when no lockfile is present
    pub install_resolve: String,
    /// Relaxed peer-dependency fallback
    pub install_relaxed: String,
    pub build_command: String,
    /// Dev-server command; `{port}` is replaced with the app port
    pub dev_command: String,

    /// Substrings in dev-server output that mark it ready
    pub ready_markers: Vec<String>,
    /// Path alias the generated sources are allowed to import through
    pub path_alias: String,

    pub install_timeout_seconds: u64,
    pub build_timeout_seconds: u64,
    /// Settle delay after killing port listeners, in milliseconds
    pub port_settle_ms: u64,
    /// Number of dev-server output lines kept per stream
    pub output_buffer_lines: usize,

    pub health: HealthConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("app"),
            app_port: 3000,
            control_port: 8080,
            public_host: "localhost".to_string(),
            manifest_file: "package.json".to_string(),
            lockfile: "package-lock.json".to_string(),
            packages_dir: "node_modules".to_string(),
            build_cache_dir: ".next".to_string(),
            fingerprint_file: ".warden-install-hash".to_string(),
            lock_file: ".warden.lock".to_string(),
            state_dir: ".warden".to_string(),
            install_locked: "npm ci".to_string(),
            install_resolve: "npm install".to_string(),
            install_relaxed: "npm install --legacy-peer-deps".to_string(),
            build_command: "npm run build".to_string(),
            dev_command: "npm run dev -- --port {port}".to_string(),
            ready_markers: vec![
                "Ready in".to_string(),
                "ready started server".to_string(),
                "Local:".to_string(),
                "listening on".to_string(),
            ],
            path_alias: "@/".to_string(),
            install_timeout_seconds: 600,
            build_timeout_seconds: 600,
            port_settle_ms: 500,
            output_buffer_lines: 200,
            health: HealthConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Create a config for the given target directory with default conventions.
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            ..Default::default()
        }
    }

    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| WardenError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> WardenResult<()> {
        if self.app_port == self.control_port {
            return Err(WardenError::Config(format!(
                "app port and control port must differ (both {})",
                self.app_port
            )));
        }
        if self.build_command.trim().is_empty() {
            return Err(WardenError::Config("build command is empty".to_string()));
        }
        if self.dev_command.trim().is_empty() {
            return Err(WardenError::Config("dev command is empty".to_string()));
        }
        if self.health.max_attempts == 0 {
            return Err(WardenError::Config(
                "health.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.health.server_error_threshold == 0 {
            return Err(WardenError::Config(
                "health.server_error_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    pub fn with_app_port(mut self, port: u16) -> Self {
        self.app_port = port;
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    pub fn with_port_settle_ms(mut self, ms: u64) -> Self {
        self.port_settle_ms = ms;
        self
    }

    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn with_path_alias(mut self, alias: impl Into<String>) -> Self {
        self.path_alias = alias.into();
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.target_dir.join(&self.manifest_file)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.target_dir.join(&self.lockfile)
    }

    pub fn packages_path(&self) -> PathBuf {
        self.target_dir.join(&self.packages_dir)
    }

    pub fn build_cache_path(&self) -> PathBuf {
        self.target_dir.join(&self.build_cache_dir)
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.target_dir.join(&self.fingerprint_file)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.target_dir.join(&self.lock_file)
    }

    pub fn state_path(&self) -> PathBuf {
        self.target_dir.join(&self.state_dir)
    }

    /// Dev command with the app port substituted.
    pub fn dev_command_line(&self) -> String {
        self.dev_command.replace("{port}", &self.app_port.to_string())
    }

    /// Loopback URL the health prober polls.
    pub fn probe_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.app_port, self.health.path)
    }

    /// URL reported to the caller on success.
    pub fn public_url(&self) -> String {
        format!("http://{}:{}", self.public_host, self.app_port)
    }

    /// Names under the target directory the generator must never write to.
    pub fn protected_names(&self) -> Vec<&str> {
        vec![
            self.packages_dir.as_str(),
            self.build_cache_dir.as_str(),
            self.state_dir.as_str(),
            self.fingerprint_file.as_str(),
            self.lock_file.as_str(),
        ]
    }
}
