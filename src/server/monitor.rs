use crate::health::{HealthCheckOptions, HealthReport, HealthStatus};
use crate::McpManager;
use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::future::{join_all, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Server monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Servers to watch; all enabled servers when `None`
    pub names: Option<Vec<String>>,
    /// Pause between ticks
    pub interval: Duration,
    /// Scores below this are flagged
    pub threshold: f64,
    /// Probes to run instead of all enabled ones
    pub probes: Option<Vec<String>>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            names: None,
            interval: Duration::from_secs(5),
            threshold: 0.8,
            probes: None,
        }
    }
}

/// Health of every watched server at one tick.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorTick {
    /// Tick number, starting at 1
    pub sequence: u64,
    /// When the tick finished
    pub timestamp: DateTime<Utc>,
    /// One entry per watched server
    pub servers: Vec<ServerTick>,
}

impl MonitorTick {
    /// Entries whose score fell below the threshold or whose check failed
    pub fn alerts(&self) -> impl Iterator<Item = &ServerTick> {
        self.servers.iter().filter(|s| match &s.outcome {
            TickOutcome::Checked(report) => report.below_threshold,
            TickOutcome::Failed { .. } => true,
        })
    }
}

/// One server's entry in a tick.
#[derive(Debug, Clone, Serialize)]
pub struct ServerTick {
    /// Server name
    pub server: String,
    /// Check result
    pub outcome: TickOutcome,
}

/// Result of checking one server in a tick.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum TickOutcome {
    /// The check produced a report
    Checked(TickReport),
    /// The check could not run
    Failed {
        /// Error message
        message: String,
    },
}

/// Condensed health report.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Overall status
    pub status: HealthStatus,
    /// Health score
    pub score: f64,
    /// Whether the score is below the monitor threshold
    pub below_threshold: bool,
    /// Probes that did not report healthy
    pub failing: Vec<String>,
}

impl TickReport {
    /// Condense a report against a threshold
    pub fn from_report(report: &HealthReport, threshold: f64) -> Self {
        Self {
            status: report.status,
            score: report.score,
            below_threshold: report.score < threshold,
            failing: report
                .checks
                .iter()
                .filter(|c| !c.status.is_healthy())
                .map(|c| c.probe.clone())
                .collect(),
        }
    }
}

/// Endless stream of ticks.
///
/// The servers of one tick are checked concurrently and a failing server
/// only marks its own entry. SIGINT ends the stream: between ticks at once,
/// during a tick after that tick is yielded.
pub(crate) fn monitor_stream(
    manager: McpManager,
    options: MonitorOptions,
) -> BoxStream<'static, MonitorTick> {
    stream! {
        let mut sequence = 0u64;
        // Registered before the first tick so an interrupt during a tick is kept
        let mut interrupt = Interrupt::listen();

        loop {
            let names = match &options.names {
                Some(names) => names.clone(),
                None => match manager.enabled_server_names() {
                    Ok(names) => names,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to list servers for monitoring");
                        Vec::new()
                    }
                },
            };

            let checks = names.iter().map(|name| {
                let manager = &manager;
                let options = &options;
                async move {
                    let check = HealthCheckOptions {
                        detailed: false,
                        timeout: None,
                        probes: options.probes.clone(),
                    };
                    let outcome = match manager.check_health(name, check).await {
                        Ok(report) => TickOutcome::Checked(TickReport::from_report(&report, options.threshold)),
                        Err(e) => TickOutcome::Failed { message: e.to_string() },
                    };
                    ServerTick { server: name.clone(), outcome }
                }
            });
            let servers = join_all(checks).await;

            sequence += 1;
            tracing::debug!(sequence, servers = servers.len(), "Monitor tick");
            yield MonitorTick { sequence, timestamp: Utc::now(), servers };

            if interrupt.received() || interrupt.sleep(options.interval).await {
                tracing::info!("Interrupt received, stopping monitor");
                break;
            }
        }
    }
    .boxed()
}

/// SIGINT listener that lives as long as one monitor stream.
struct Interrupt {
    signal: Option<Signal>,
}

impl Interrupt {
    fn listen() -> Self {
        let signal = match signal(SignalKind::interrupt()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for interrupt, monitor runs until dropped");
                None
            }
        };
        Self { signal }
    }

    /// Whether an interrupt arrived since the last check.
    fn received(&mut self) -> bool {
        match self.signal.as_mut() {
            Some(signal) => matches!(signal.recv().now_or_never(), Some(Some(()))),
            None => false,
        }
    }

    /// Sleep for `interval`; returns `true` if interrupted first.
    async fn sleep(&mut self, interval: Duration) -> bool {
        let Some(signal) = self.signal.as_mut() else {
            tokio::time::sleep(interval).await;
            return false;
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            Some(()) = signal.recv() => true,
        }
    }
}
