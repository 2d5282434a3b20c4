//! Best-effort reclaiming of the application port before a launch.

use std::time::Duration;

use warden_runner::CommandSpec;

use crate::context::SupervisorContext;

const STAGE: &str = "ports";

/// What `free_port` found and terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortReport {
    pub port: u16,
    pub listeners: Vec<u32>,
    pub killed: Vec<u32>,
}

pub struct PortReclaimer<'a> {
    ctx: &'a SupervisorContext,
}

impl<'a> PortReclaimer<'a> {
    pub fn new(ctx: &'a SupervisorContext) -> Self {
        Self { ctx }
    }

    /// Terminate whatever listens on `port`, then wait for the OS to release it.
    ///
    /// Never touches the control-plane port or this process. Lookup and kill
    /// failures are logged, not returned.
    pub async fn free_port(&self, port: u16) -> PortReport {
        let log = &self.ctx.log;
        let mut report = PortReport {
            port,
            ..Default::default()
        };

        if port == self.ctx.config.control_port {
            log.warn(STAGE, format!("Refusing to reclaim control-plane port {}", port));
            return report;
        }

        let own_pid = std::process::id();
        report.listeners = self
            .find_listeners(port)
            .await
            .into_iter()
            .filter(|pid| *pid != own_pid)
            .collect();

        if report.listeners.is_empty() {
            log.debug(STAGE, format!("No listener on port {}", port));
        }

        for pid in &report.listeners {
            let spec = kill_command(*pid);
            match self.ctx.runner.run(&spec).await {
                Ok(result) if result.success() => {
                    log.info(STAGE, format!("Killed pid {} listening on port {}", pid, port));
                    report.killed.push(*pid);
                }
                Ok(result) => log.warn(
                    STAGE,
                    format!("Could not kill pid {}: {}", pid, result.combined_output().trim()),
                ),
                Err(e) => log.warn(STAGE, format!("Could not kill pid {}: {}", pid, e)),
            }
        }

        let settle = self.ctx.config.port_settle_ms;
        if settle > 0 {
            tokio::time::sleep(Duration::from_millis(settle)).await;
        }
        report
    }

    async fn find_listeners(&self, port: u16) -> Vec<u32> {
        let spec = lookup_command(port);
        match self.ctx.runner.run(&spec).await {
            // lsof exits 1 when nothing matches, so the output is parsed regardless.
            Ok(result) => parse_listeners(&result.stdout, port),
            Err(e) => {
                self.ctx
                    .log
                    .debug(STAGE, format!("Port lookup for {} failed: {}", port, e));
                Vec::new()
            }
        }
    }
}

#[cfg(not(windows))]
fn lookup_command(port: u16) -> CommandSpec {
    CommandSpec::new("lsof")
        .args(["-nP", "-t"])
        .arg(format!("-iTCP:{}", port))
        .arg("-sTCP:LISTEN")
        .timeout(10)
}

#[cfg(windows)]
fn lookup_command(_port: u16) -> CommandSpec {
    CommandSpec::new("netstat").args(["-ano", "-p", "TCP"]).timeout(10)
}

#[cfg(not(windows))]
fn kill_command(pid: u32) -> CommandSpec {
    CommandSpec::new("kill").args(["-9".to_string(), pid.to_string()]).timeout(10)
}

#[cfg(windows)]
fn kill_command(pid: u32) -> CommandSpec {
    CommandSpec::new("taskkill")
        .args(["/F".to_string(), "/T".to_string(), "/PID".to_string(), pid.to_string()])
        .timeout(10)
}

/// Extract listening pids from `lsof -t` output (one pid per line) or from
/// `netstat -ano` rows whose local address ends in `:port` and state is LISTENING.
pub fn parse_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let pid = match fields.as_slice() {
            [single] => single.parse::<u32>().ok(),
            [_proto, local, _remote, state, pid] if local.ends_with(&suffix) && *state == "LISTENING" => {
                pid.parse::<u32>().ok()
            }
            _ => None,
        };
        if let Some(pid) = pid.filter(|p| *p > 0) {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}
