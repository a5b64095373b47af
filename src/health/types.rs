use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Health status of one probe or of a whole server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything the probe looked at is fine
    Healthy,
    /// Working, but past a warning threshold
    Degraded,
    /// Not working or past a critical threshold
    Unhealthy,
    /// The probe could not determine anything
    Unknown,
}

impl HealthStatus {
    /// Whether the status is `Healthy`
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Probe-specific measurements attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeDetails {
    /// No details recorded
    #[default]
    None,
    /// OS liveness of the server process
    Process {
        /// Process id checked
        pid: u32,
        /// Whether the process was alive
        alive: bool,
    },
    /// TCP connect to the server's port
    Port {
        /// Host connected to
        host: String,
        /// Port connected to, if one applied
        port: Option<u16>,
        /// False for stdio servers
        applicable: bool,
    },
    /// Resident memory of the server process
    Memory {
        /// Measured resident memory in megabytes
        rss_mb: f64,
        /// Warning threshold in megabytes
        warning_mb: f64,
        /// Critical threshold in megabytes
        critical_mb: f64,
    },
    /// CPU utilisation of the server process
    Cpu {
        /// Measured utilisation in percent of one core
        percent: f64,
        /// Warning threshold in percent
        warning_percent: f64,
        /// Critical threshold in percent
        critical_percent: f64,
        /// Sampling window in milliseconds
        window_ms: u64,
    },
    /// Error markers found in the tail of the server log
    LogErrors {
        /// Log file scanned
        path: PathBuf,
        /// Lines scanned
        lines_scanned: usize,
        /// Lines containing an error marker
        error_count: usize,
        /// The most recent matching lines
        recent: Vec<String>,
    },
    /// Application-level request to the server endpoint
    Protocol {
        /// Endpoint requested, if one applied
        url: Option<String>,
        /// HTTP status returned
        http_status: Option<u16>,
        /// Whether the body was a JSON-RPC answer to the ping
        answered: bool,
    },
    /// Free-form details from a custom probe
    Custom(serde_json::Map<String, serde_json::Value>),
}

/// Output of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Probe name
    pub probe: String,
    /// Probe verdict
    pub status: HealthStatus,
    /// Human-readable message
    pub message: String,
    /// Probe-specific measurements
    #[serde(default)]
    pub details: ProbeDetails,
    /// Time the probe took
    pub duration: Duration,
    /// Underlying error, if the probe failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the probe decides the overall status
    pub critical: bool,
}

/// All probe results for one server at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Server name
    pub server: String,
    /// Aggregated status
    pub status: HealthStatus,
    /// Fraction of probes reporting healthy, 0.0 to 1.0
    pub score: f64,
    /// Individual probe results
    pub checks: Vec<HealthCheckResult>,
    /// When the report was produced
    pub timestamp: DateTime<Utc>,
    /// Time the whole check took
    pub duration: Duration,
}

impl HealthReport {
    /// Result of a probe by name
    pub fn check(&self, probe: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.probe == probe)
    }

    /// Whether the overall status is healthy
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Drop per-probe measurements
    pub fn without_details(mut self) -> Self {
        for check in &mut self.checks {
            check.details = ProbeDetails::None;
        }
        self
    }
}

/// Trend over the recent reports of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    /// Server name
    pub server: String,
    /// Reports in the history
    pub checks: usize,
    /// Mean score over the history
    pub average_score: f64,
    /// Reports with status healthy
    pub healthy: usize,
    /// Reports with status degraded
    pub degraded: usize,
    /// Reports with status unhealthy
    pub unhealthy: usize,
    /// Reports with status unknown
    pub unknown: usize,
    /// Status of the most recent report
    pub last_status: HealthStatus,
    /// Time of the most recent report
    pub last_checked: DateTime<Utc>,
}

/// Overall status and score of a set of probe results.
///
/// Any unhealthy critical probe makes the server unhealthy. Otherwise any
/// probe that is not healthy makes it degraded. An empty set is unknown.
pub fn aggregate(checks: &[HealthCheckResult]) -> (HealthStatus, f64) {
    if checks.is_empty() {
        return (HealthStatus::Unknown, 0.0);
    }

    let healthy = checks.iter().filter(|c| c.status.is_healthy()).count();
    let score = healthy as f64 / checks.len() as f64;

    let status = if checks
        .iter()
        .any(|c| c.critical && c.status == HealthStatus::Unhealthy)
    {
        HealthStatus::Unhealthy
    } else if healthy == checks.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    (status, score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: HealthStatus, critical: bool) -> HealthCheckResult {
        HealthCheckResult {
            probe: "p".to_string(),
            status,
            message: String::new(),
            details: ProbeDetails::None,
            duration: Duration::ZERO,
            error: None,
            critical,
        }
    }

    #[test]
    fn test_critical_unhealthy_wins() {
        let checks = [
            result(HealthStatus::Healthy, false),
            result(HealthStatus::Unhealthy, true),
            result(HealthStatus::Healthy, true),
        ];
        let (status, score) = aggregate(&checks);
        assert_eq!(status, HealthStatus::Unhealthy);
        assert!((score - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_critical_failures_degrade() {
        let checks = [
            result(HealthStatus::Healthy, true),
            result(HealthStatus::Unhealthy, false),
        ];
        assert_eq!(aggregate(&checks).0, HealthStatus::Degraded);

        let checks = [
            result(HealthStatus::Healthy, true),
            result(HealthStatus::Degraded, true),
        ];
        assert_eq!(aggregate(&checks).0, HealthStatus::Degraded);

        let checks = [result(HealthStatus::Unknown, false)];
        assert_eq!(aggregate(&checks).0, HealthStatus::Degraded);
    }

    #[test]
    fn test_all_healthy() {
        let checks = [result(HealthStatus::Healthy, true), result(HealthStatus::Healthy, false)];
        assert_eq!(aggregate(&checks), (HealthStatus::Healthy, 1.0));
        assert_eq!(aggregate(&[]), (HealthStatus::Unknown, 0.0));
    }

    #[test]
    fn test_details_serialize_with_kind_tag() {
        let details = ProbeDetails::Process { pid: 42, alive: true };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "process");
        assert_eq!(json["pid"], 42);
    }
}
