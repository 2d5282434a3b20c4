//! Command configuration types.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A command to execute, built up with chained setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// The original command line when built with [`CommandSpec::shell`]
    pub command_line: Option<String>,
    /// Working directory
    pub workdir: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Timeout in seconds (0 = no timeout). Ignored for detached spawns.
    pub timeout_seconds: u64,
    /// Directory receiving `<name>.stdout.log` / `<name>.stderr.log` for
    /// detached spawns. When unset, output is piped.
    pub output_dir: Option<PathBuf>,
    /// Base name for detached output files
    pub output_name: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            command_line: None,
            workdir: None,
            env: HashMap::new(),
            timeout_seconds: 300,
            output_dir: None,
            output_name: "process".to_string(),
        }
    }

    /// Run a full command line through the platform shell.
    pub fn shell(command_line: impl Into<String>) -> Self {
        let command_line = command_line.into();
        let (shell, shell_arg) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut spec = Self::new(shell)
            .arg(shell_arg)
            .arg(command_line.clone());
        spec.command_line = Some(command_line);
        spec
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Capture detached output into files under `dir`, named after `name`.
    pub fn output_files(mut self, dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self.output_name = name.into();
        self
    }

    /// Human-readable form of the command, used for logs and mock matching.
    pub fn display(&self) -> String {
        if let Some(line) = &self.command_line {
            return line.clone();
        }
        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('=') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }

    /// Path of the stdout capture file for detached spawns.
    pub fn stdout_path(&self) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.stdout.log", self.output_name)))
    }

    /// Path of the stderr capture file for detached spawns.
    pub fn stderr_path(&self) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.stderr.log", self.output_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("npm")
            .args(["run", "build"])
            .workdir("/app")
            .env("NODE_ENV", "production")
            .timeout(60);

        assert_eq!(spec.display(), "npm run build");
        assert_eq!(spec.workdir, Some(PathBuf::from("/app")));
        assert_eq!(spec.env.get("NODE_ENV"), Some(&"production".to_string()));
        assert_eq!(spec.timeout_seconds, 60);
    }

    #[test]
    fn test_shell_spec_keeps_command_line() {
        let spec = CommandSpec::shell("npm ci --no-audit");

        assert_eq!(spec.display(), "npm ci --no-audit");
        assert_eq!(spec.args.last(), Some(&"npm ci --no-audit".to_string()));
    }

    #[test]
    fn test_output_file_paths() {
        let spec = CommandSpec::shell("npm run dev").output_files("/app/.warden", "dev-server");

        assert_eq!(
            spec.stdout_path(),
            Some(PathBuf::from("/app/.warden/dev-server.stdout.log"))
        );
        assert_eq!(
            spec.stderr_path(),
            Some(PathBuf::from("/app/.warden/dev-server.stderr.log"))
        );
    }
}
