//! Built-in probes.
use crate::config::HealthSettings;
use crate::health::probe::{
    HealthProbe, ProbeContext, ProbeOutcome, ProbeSpec, ProbeThresholds, RegisteredProbe,
};
use crate::health::types::ProbeDetails;
use crate::transport::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpStream;

/// OS liveness of the server process
pub const PROCESS_RUNNING: &str = "process-running";
/// TCP connect to the server port
pub const PORT_RESPONSIVE: &str = "port-responsive";
/// Resident memory against thresholds
pub const MEMORY_USAGE: &str = "memory-usage";
/// CPU utilisation against thresholds
pub const CPU_USAGE: &str = "cpu-usage";
/// Error markers in the log tail
pub const LOG_ERRORS: &str = "log-errors";
/// JSON-RPC ping to the server endpoint
pub const PROTOCOL_REACHABILITY: &str = "protocol-reachability";

/// Bytes read from the end of a log when scanning for errors.
const LOG_TAIL_BYTES: u64 = 256 * 1024;

/// Matching log lines kept in the details.
const RECENT_ERROR_LINES: usize = 5;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// The default probe set, configured from `settings`.
pub fn default_probes(settings: &HealthSettings) -> Vec<RegisteredProbe> {
    let timeout = settings.probe_timeout();

    let memory = MemoryUsageProbe {
        warning_mb: settings.memory_warning_mb,
        critical_mb: settings.memory_critical_mb,
    };
    let cpu = CpuUsageProbe {
        warning_percent: settings.cpu_warning_percent,
        critical_percent: settings.cpu_critical_percent,
        window: settings.cpu_sample_window(),
    };
    let log_errors = LogErrorsProbe {
        tail_lines: settings.log_tail_lines,
        markers: settings.log_error_markers.clone(),
        warning_count: settings.log_warning_count,
        critical_count: settings.log_critical_count,
    };

    vec![
        RegisteredProbe {
            spec: ProbeSpec::new(PROCESS_RUNNING, "Server process is alive", timeout).critical(),
            probe: Arc::new(ProcessRunningProbe),
        },
        RegisteredProbe {
            spec: ProbeSpec::new(PORT_RESPONSIVE, "Server port accepts connections", timeout)
                .critical(),
            probe: Arc::new(PortResponsiveProbe),
        },
        RegisteredProbe {
            spec: ProbeSpec::new(MEMORY_USAGE, "Resident memory within limits", timeout)
                .with_thresholds(memory.thresholds()),
            probe: Arc::new(memory),
        },
        RegisteredProbe {
            // The sampling window comes on top of the probe timeout
            spec: ProbeSpec::new(
                CPU_USAGE,
                "CPU utilisation within limits",
                timeout + cpu.window,
            )
            .with_thresholds(cpu.thresholds()),
            probe: Arc::new(cpu),
        },
        RegisteredProbe {
            spec: ProbeSpec::new(LOG_ERRORS, "No recent errors in the server log", timeout)
                .with_thresholds(log_errors.thresholds()),
            probe: Arc::new(log_errors),
        },
        RegisteredProbe {
            spec: ProbeSpec::new(
                PROTOCOL_REACHABILITY,
                "Server answers on its protocol endpoint",
                timeout,
            )
            .critical(),
            probe: Arc::new(ProtocolReachabilityProbe::new(&settings.protocol_path)),
        },
    ]
}

/// Whether the recorded process is alive.
pub struct ProcessRunningProbe;

#[async_trait]
impl HealthProbe for ProcessRunningProbe {
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
        let Some(handle) = ctx.handle else {
            return ProbeOutcome::unhealthy("Server is not running");
        };

        let alive = ctx.inspector.is_alive(handle.pid);
        let details = ProbeDetails::Process {
            pid: handle.pid,
            alive,
        };

        if alive {
            ProbeOutcome::healthy(format!("Process {} is running", handle.pid)).with_details(details)
        } else {
            ProbeOutcome::unhealthy(format!("Process {} is not running", handle.pid))
                .with_details(details)
        }
    }
}

/// Bare TCP connect to the server port. Not applicable to stdio servers.
pub struct PortResponsiveProbe;

#[async_trait]
impl HealthProbe for PortResponsiveProbe {
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
        let host = ctx.server.host.clone();

        if !ctx.is_network() {
            return ProbeOutcome::healthy("Not applicable for stdio transport").with_details(
                ProbeDetails::Port {
                    host,
                    port: None,
                    applicable: false,
                },
            );
        }

        let Some(port) = ctx.port() else {
            return ProbeOutcome::unhealthy("No port configured for network transport");
        };

        let details = ProbeDetails::Port {
            host: host.clone(),
            port: Some(port),
            applicable: true,
        };

        match TcpStream::connect((host.as_str(), port)).await {
            Ok(_) => ProbeOutcome::healthy(format!("Port {} is accepting connections", port))
                .with_details(details),
            Err(e) => ProbeOutcome::unhealthy(format!("Port {} is not responding", port))
                .with_details(details)
                .with_error(e),
        }
    }
}

/// Resident memory against warning and critical thresholds.
pub struct MemoryUsageProbe {
    /// Degraded above this many megabytes
    pub warning_mb: f64,
    /// Unhealthy above this many megabytes
    pub critical_mb: f64,
}

impl MemoryUsageProbe {
    /// The limits of this probe
    pub fn thresholds(&self) -> ProbeThresholds {
        ProbeThresholds::Memory {
            warning_mb: self.warning_mb,
            critical_mb: self.critical_mb,
        }
    }
}

#[async_trait]
impl HealthProbe for MemoryUsageProbe {
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
        let Some(handle) = ctx.handle else {
            return ProbeOutcome::unknown("No running process to measure");
        };

        let Some(bytes) = ctx.inspector.memory_bytes(handle.pid).await else {
            return ProbeOutcome::unknown(format!("Memory usage of process {} unavailable", handle.pid));
        };

        let rss_mb = bytes as f64 / BYTES_PER_MB;
        let details = ProbeDetails::Memory {
            rss_mb,
            warning_mb: self.warning_mb,
            critical_mb: self.critical_mb,
        };

        let outcome = if rss_mb > self.critical_mb {
            ProbeOutcome::unhealthy(format!(
                "Memory usage {:.1} MB exceeds critical threshold {:.0} MB",
                rss_mb, self.critical_mb
            ))
        } else if rss_mb > self.warning_mb {
            ProbeOutcome::degraded(format!(
                "Memory usage {:.1} MB exceeds warning threshold {:.0} MB",
                rss_mb, self.warning_mb
            ))
        } else {
            ProbeOutcome::healthy(format!("Memory usage {:.1} MB", rss_mb))
        };
        outcome.with_details(details)
    }
}

/// CPU utilisation sampled over a short window.
pub struct CpuUsageProbe {
    /// Degraded above this percentage
    pub warning_percent: f64,
    /// Unhealthy above this percentage
    pub critical_percent: f64,
    /// Sampling window
    pub window: Duration,
}

impl CpuUsageProbe {
    /// The limits of this probe
    pub fn thresholds(&self) -> ProbeThresholds {
        ProbeThresholds::Cpu {
            warning_percent: self.warning_percent,
            critical_percent: self.critical_percent,
            window_ms: self.window.as_millis() as u64,
        }
    }
}

#[async_trait]
impl HealthProbe for CpuUsageProbe {
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
        let Some(handle) = ctx.handle else {
            return ProbeOutcome::unknown("No running process to measure");
        };

        let Some(percent) = ctx.inspector.cpu_percent(handle.pid, self.window).await else {
            return ProbeOutcome::unknown(format!("CPU usage of process {} unavailable", handle.pid));
        };

        let details = ProbeDetails::Cpu {
            percent,
            warning_percent: self.warning_percent,
            critical_percent: self.critical_percent,
            window_ms: self.window.as_millis() as u64,
        };

        let outcome = if percent > self.critical_percent {
            ProbeOutcome::unhealthy(format!(
                "CPU usage {:.1}% exceeds critical threshold {:.0}%",
                percent, self.critical_percent
            ))
        } else if percent > self.warning_percent {
            ProbeOutcome::degraded(format!(
                "CPU usage {:.1}% exceeds warning threshold {:.0}%",
                percent, self.warning_percent
            ))
        } else {
            ProbeOutcome::healthy(format!("CPU usage {:.1}%", percent))
        };
        outcome.with_details(details)
    }
}

/// Counts error markers in the last lines of the server log.
pub struct LogErrorsProbe {
    /// Lines scanned from the end of the log
    pub tail_lines: usize,
    /// Substrings that mark a line as an error
    pub markers: Vec<String>,
    /// Degraded at this many error lines
    pub warning_count: usize,
    /// Unhealthy at this many error lines
    pub critical_count: usize,
}

impl LogErrorsProbe {
    /// The limits of this probe
    pub fn thresholds(&self) -> ProbeThresholds {
        ProbeThresholds::LogErrors {
            tail_lines: self.tail_lines,
            markers: self.markers.clone(),
            warning_count: self.warning_count,
            critical_count: self.critical_count,
        }
    }
}

#[async_trait]
impl HealthProbe for LogErrorsProbe {
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
        let text = match read_tail(ctx.log_path, LOG_TAIL_BYTES).await {
            Ok(Some(text)) => text,
            Ok(None) => return ProbeOutcome::healthy("No log file yet"),
            Err(e) => {
                return ProbeOutcome::unknown(format!(
                    "Failed to read {}",
                    ctx.log_path.display()
                ))
                .with_error(e);
            }
        };

        let lines: Vec<&str> = text.lines().collect();
        let tail = &lines[lines.len().saturating_sub(self.tail_lines)..];
        let errors: Vec<&str> = tail
            .iter()
            .copied()
            .filter(|line| self.markers.iter().any(|m| line.contains(m.as_str())))
            .collect();

        let error_count = errors.len();
        let details = ProbeDetails::LogErrors {
            path: ctx.log_path.to_path_buf(),
            lines_scanned: tail.len(),
            error_count,
            recent: errors
                .iter()
                .rev()
                .take(RECENT_ERROR_LINES)
                .rev()
                .map(|line| line.to_string())
                .collect(),
        };

        let outcome = if error_count >= self.critical_count {
            ProbeOutcome::unhealthy(format!(
                "{} error lines in the last {} log lines",
                error_count,
                tail.len()
            ))
        } else if error_count >= self.warning_count {
            ProbeOutcome::degraded(format!(
                "{} error lines in the last {} log lines",
                error_count,
                tail.len()
            ))
        } else {
            ProbeOutcome::healthy(format!("No errors in the last {} log lines", tail.len()))
        };
        outcome.with_details(details)
    }
}

/// Last `max_bytes` of a file, or `None` if it does not exist.
async fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<Option<String>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = file.metadata().await?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).await?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;

    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    // Drop the partial first line of a mid-file read
    if start > 0 {
        if let Some(newline) = text.find('\n') {
            text.drain(..=newline);
        }
    }
    Ok(Some(text))
}

/// JSON-RPC ping over HTTP. Healthy without a request for stdio servers.
pub struct ProtocolReachabilityProbe {
    path: String,
    client: reqwest::Client,
}

impl ProtocolReachabilityProbe {
    /// Create a probe that posts to `path` on the server's host and port
    pub fn new(path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self {
            path,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HealthProbe for ProtocolReachabilityProbe {
    async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
        if !ctx.is_network() {
            return ProbeOutcome::healthy(
                "Not independently verifiable over stdio transport",
            )
            .with_details(ProbeDetails::Protocol {
                url: None,
                http_status: None,
                answered: false,
            });
        }

        let Some(port) = ctx.port() else {
            return ProbeOutcome::unhealthy("No port configured for network transport");
        };

        let url = format!("http://{}:{}{}", ctx.server.host, port, self.path);
        let request = JsonRpcRequest::ping();

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                return ProbeOutcome::unhealthy(format!("No response from {}", url))
                    .with_details(ProbeDetails::Protocol {
                        url: Some(url),
                        http_status: None,
                        answered: false,
                    })
                    .with_error(e);
            }
        };

        let http_status = response.status();
        let reply = response
            .json::<JsonRpcResponse>()
            .await
            .ok()
            .filter(|body| body.answers(&request));
        let answered = reply.is_some();

        let details = ProbeDetails::Protocol {
            url: Some(url.clone()),
            http_status: Some(http_status.as_u16()),
            answered,
        };

        if http_status.is_server_error() {
            ProbeOutcome::degraded(format!("{} returned {}", url, http_status)).with_details(details)
        } else if let Some(reply) = reply {
            // A JSON-RPC error still proves the endpoint speaks the protocol
            match reply.into_result() {
                Ok(_) => ProbeOutcome::healthy(format!("{} answered ping", url)),
                Err(e) => ProbeOutcome::healthy(format!("{} answered ping with {}", url, e)),
            }
            .with_details(details)
        } else {
            ProbeOutcome::healthy(format!("{} is reachable ({})", url, http_status))
                .with_details(details)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_tail_drops_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "first line\nsecond line\nthird line\n").unwrap();

        let tail = read_tail(&path, 16).await.unwrap().unwrap();
        assert_eq!(tail, "third line\n");

        let missing = read_tail(&dir.path().join("missing.log"), 16).await.unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_default_probe_set() {
        let probes = default_probes(&HealthSettings::default());
        let names: Vec<&str> = probes.iter().map(|p| p.spec.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                PROCESS_RUNNING,
                PORT_RESPONSIVE,
                MEMORY_USAGE,
                CPU_USAGE,
                LOG_ERRORS,
                PROTOCOL_REACHABILITY
            ]
        );
        let critical: Vec<&str> = probes
            .iter()
            .filter(|p| p.spec.critical)
            .map(|p| p.spec.name.as_str())
            .collect();
        assert_eq!(critical, vec![PROCESS_RUNNING, PORT_RESPONSIVE, PROTOCOL_REACHABILITY]);
    }
}
