use crate::config::ServerConfig;
use crate::health::types::{HealthStatus, ProbeDetails};
use crate::server::os::ProcessInspector;
use crate::server::ProcessHandle;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Everything a probe may look at for one server.
pub struct ProbeContext<'a> {
    /// Server configuration
    pub server: &'a ServerConfig,
    /// Live process handle, `None` if the server is not running
    pub handle: Option<&'a ProcessHandle>,
    /// OS process table
    pub inspector: &'a dyn ProcessInspector,
    /// The server's log file
    pub log_path: &'a Path,
}

impl ProbeContext<'_> {
    /// Port of the running process, or the configured one
    pub fn port(&self) -> Option<u16> {
        self.handle.and_then(|h| h.port).or(self.server.port)
    }

    /// Whether the server talks over the network
    pub fn is_network(&self) -> bool {
        self.handle
            .map(|h| h.transport)
            .unwrap_or(self.server.transport)
            .is_network()
    }
}

/// What a probe found.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// Verdict
    pub status: HealthStatus,
    /// Human-readable message
    pub message: String,
    /// Measurements
    pub details: ProbeDetails,
    /// Underlying error, if any
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: ProbeDetails::None,
            error: None,
        }
    }

    /// A healthy outcome
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    /// A degraded outcome
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    /// An unhealthy outcome
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    /// An outcome for a probe that could not decide
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unknown, message)
    }

    /// Attach measurements
    pub fn with_details(mut self, details: ProbeDetails) -> Self {
        self.details = details;
        self
    }

    /// Attach the underlying error
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// One independent health check.
///
/// Probes must not panic and should return `Unknown` rather than guessing
/// when the data they need is unavailable. The engine bounds every call with
/// the probe's timeout.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run the check
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome;
}

/// Limits a probe judges its measurement against.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeThresholds {
    /// The probe has no configurable limits
    #[default]
    None,
    /// Resident memory in megabytes
    Memory {
        /// Degraded above this
        warning_mb: f64,
        /// Unhealthy above this
        critical_mb: f64,
    },
    /// CPU utilisation in percent of one core
    Cpu {
        /// Degraded above this
        warning_percent: f64,
        /// Unhealthy above this
        critical_percent: f64,
        /// Sampling window
        window_ms: u64,
    },
    /// Error lines in the log tail
    LogErrors {
        /// Lines scanned from the end of the log
        tail_lines: usize,
        /// Substrings that mark a line as an error
        markers: Vec<String>,
        /// Degraded at this many error lines
        warning_count: usize,
        /// Unhealthy at this many error lines
        critical_count: usize,
    },
}

/// Registration data of a probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSpec {
    /// Unique probe name
    pub name: String,
    /// What the probe checks
    pub description: String,
    /// Upper bound on one run
    pub timeout: Duration,
    /// Whether an unhealthy result makes the whole server unhealthy
    pub critical: bool,
    /// Whether the probe runs when no probe list is given
    pub enabled: bool,
    /// Configured limits, for display
    pub thresholds: ProbeThresholds,
}

impl ProbeSpec {
    /// Create an enabled, non-critical probe spec
    pub fn new(name: impl Into<String>, description: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            timeout,
            critical: false,
            enabled: true,
            thresholds: ProbeThresholds::None,
        }
    }

    /// Attach the limits the probe checks against
    pub fn with_thresholds(mut self, thresholds: ProbeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Mark the probe as critical
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Register the probe disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A probe together with its registration data
#[derive(Clone)]
pub struct RegisteredProbe {
    /// Registration data
    pub spec: ProbeSpec,
    /// The check itself
    pub probe: Arc<dyn HealthProbe>,
}
