//! HTTP health probing of the launched dev server.

use serde::{Deserialize, Serialize};

use crate::config::HealthConfig;
use crate::context::{BuildLog, SupervisorContext};
use crate::error::{WardenError, WardenResult};
use crate::launcher::{ReadinessLatch, ReadySource};

const STAGE: &str = "health";

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeObservation {
    Status(u16),
    ConnectionError,
    Timeout,
}

/// Rolling probe state, updated once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthStatus {
    pub consecutive_server_errors: u32,
    pub ready: bool,
}

impl HealthStatus {
    /// Fold one observation into the status.
    ///
    /// 200..500 is ready. Exactly 500 counts toward the runtime-failure
    /// threshold. Anything else resets the counter.
    pub fn record(&mut self, observation: ProbeObservation) {
        match observation {
            ProbeObservation::Status(code) if (200..500).contains(&code) => {
                self.ready = true;
                self.consecutive_server_errors = 0;
            }
            ProbeObservation::Status(500) => self.consecutive_server_errors += 1,
            _ => self.consecutive_server_errors = 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    Ready { attempts: u32 },
    /// The app compiled but keeps answering 500
    RuntimeFailure { consecutive_errors: u32 },
    Timeout { attempts: u32 },
}

pub struct HealthProber {
    url: String,
    config: HealthConfig,
    client: reqwest::Client,
    log: BuildLog,
}

impl HealthProber {
    pub fn new(ctx: &SupervisorContext) -> WardenResult<Self> {
        Self::with_url(ctx.config.probe_url(), ctx.config.health.clone(), ctx.log.clone())
    }

    pub fn with_url(url: impl Into<String>, config: HealthConfig, log: BuildLog) -> WardenResult<Self> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| WardenError::Config(format!("invalid probe URL '{}': {}", url, e)))?;
        // Loopback only; a proxy would turn connection errors into 5xx.
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            url,
            config,
            client,
            log,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Poll until ready, until the 500 threshold is hit, or until attempts run out.
    ///
    /// A ready marker on `readiness` cuts the current wait short once, so the
    /// next probe happens right away.
    pub async fn await_ready(&self, readiness: &ReadinessLatch) -> ProbeVerdict {
        let mut status = HealthStatus::default();
        let mut woken_by_stream = false;

        self.log.info(STAGE, format!("Probing {} (up to {} attempts)", self.url, self.config.max_attempts));

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                if woken_by_stream {
                    tokio::time::sleep(self.config.interval()).await;
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.interval()) => {}
                        _ = readiness.wait() => woken_by_stream = true,
                    }
                }
            }

            let observation = self.probe().await;
            tracing::debug!(attempt, ?observation, "Health probe");
            status.record(observation);

            if status.ready {
                readiness.set(ReadySource::Probe);
                self.log.info(STAGE, format!("Server ready after {} probe(s)", attempt));
                return ProbeVerdict::Ready { attempts: attempt };
            }
            if observation == ProbeObservation::Status(500) {
                self.log.warn(
                    STAGE,
                    format!(
                        "HTTP 500 ({}/{} consecutive)",
                        status.consecutive_server_errors, self.config.server_error_threshold
                    ),
                );
            }
            if status.consecutive_server_errors >= self.config.server_error_threshold {
                self.log.error(
                    STAGE,
                    format!("{} consecutive HTTP 500 responses, app is failing at runtime", status.consecutive_server_errors),
                );
                return ProbeVerdict::RuntimeFailure {
                    consecutive_errors: status.consecutive_server_errors,
                };
            }
        }

        self.log.error(
            STAGE,
            format!("Server not ready after {} probes", self.config.max_attempts),
        );
        ProbeVerdict::Timeout {
            attempts: self.config.max_attempts,
        }
    }

    async fn probe(&self) -> ProbeObservation {
        match self
            .client
            .get(&self.url)
            .timeout(self.config.request_timeout())
            .send()
            .await
        {
            Ok(response) => ProbeObservation::Status(response.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeObservation::Timeout,
            Err(_) => ProbeObservation::ConnectionError,
        }
    }
}
