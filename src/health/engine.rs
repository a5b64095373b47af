use crate::config::{HealthSettings, ServerConfig};
use crate::error::{Error, Result};
use crate::health::probe::{HealthProbe, ProbeContext, ProbeSpec, RegisteredProbe};
use crate::health::probes::default_probes;
use crate::health::types::{
    aggregate, HealthCheckResult, HealthReport, HealthStatus, HealthSummary, ProbeDetails,
};
use crate::server::os::ProcessInspector;
use crate::server::ProcessHandle;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Per-call options for a health check.
#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    /// Keep per-probe measurements in the returned report
    pub detailed: bool,
    /// Upper bound applied to every probe's own timeout
    pub timeout: Option<Duration>,
    /// Probes to run instead of all enabled ones
    pub probes: Option<Vec<String>>,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            detailed: true,
            timeout: None,
            probes: None,
        }
    }
}

impl HealthCheckOptions {
    /// Run only the named probes
    pub fn with_probes<I, S>(mut self, probes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probes = Some(probes.into_iter().map(Into::into).collect());
        self
    }

    /// Cap every probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs named probes against servers and keeps a short report history.
///
/// Probes for one server run concurrently, each raced against its own
/// timeout. A probe that misses its timeout is recorded as unhealthy; the
/// report is produced only after every probe has finished or timed out.
pub struct HealthEngine {
    probes: RwLock<BTreeMap<String, RegisteredProbe>>,
    inspector: Arc<dyn ProcessInspector>,
    logs_dir: PathBuf,
    history_limit: usize,
    history: Mutex<HashMap<String, VecDeque<HealthReport>>>,
}

impl HealthEngine {
    /// Create an engine with the built-in probes
    pub fn new(
        settings: &HealthSettings,
        inspector: Arc<dyn ProcessInspector>,
        logs_dir: impl Into<PathBuf>,
        history_limit: usize,
    ) -> Self {
        let engine = Self::empty(inspector, logs_dir, history_limit);
        if let Ok(mut probes) = engine.probes.write() {
            for probe in default_probes(settings) {
                probes.insert(probe.spec.name.clone(), probe);
            }
        }
        engine
    }

    /// Create an engine with no probes registered
    pub fn empty(
        inspector: Arc<dyn ProcessInspector>,
        logs_dir: impl Into<PathBuf>,
        history_limit: usize,
    ) -> Self {
        Self {
            probes: RwLock::new(BTreeMap::new()),
            inspector,
            logs_dir: logs_dir.into(),
            history_limit: history_limit.max(1),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Register a probe, replacing any probe with the same name
    #[tracing::instrument(skip(self, probe), fields(probe = %spec.name))]
    pub fn register(&self, spec: ProbeSpec, probe: Arc<dyn HealthProbe>) -> Result<()> {
        let mut probes = self
            .probes
            .write()
            .map_err(|_| Error::Other("Failed to lock probe registry".to_string()))?;

        if probes.insert(spec.name.clone(), RegisteredProbe { spec, probe }).is_some() {
            tracing::debug!("Replaced existing probe");
        }
        Ok(())
    }

    /// Unregister a probe by name
    #[tracing::instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut probes = self
            .probes
            .write()
            .map_err(|_| Error::Other("Failed to lock probe registry".to_string()))?;

        probes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::ProbeNotFound(name.to_string()))
    }

    /// Enable or disable a probe for checks that do not name their probes
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut probes = self
            .probes
            .write()
            .map_err(|_| Error::Other("Failed to lock probe registry".to_string()))?;

        let probe = probes
            .get_mut(name)
            .ok_or_else(|| Error::ProbeNotFound(name.to_string()))?;
        probe.spec.enabled = enabled;
        Ok(())
    }

    /// Registration data of every probe, sorted by name
    pub fn probe_specs(&self) -> Vec<ProbeSpec> {
        self.probes
            .read()
            .map(|probes| probes.values().map(|p| p.spec.clone()).collect())
            .unwrap_or_default()
    }

    /// Check one server.
    ///
    /// Runs the probes named in `options`, or every enabled probe. Unknown
    /// probe names are skipped with a warning.
    #[tracing::instrument(skip(self, server, handle, options), fields(server = %server.name))]
    pub async fn check_server(
        &self,
        server: &ServerConfig,
        handle: Option<&ProcessHandle>,
        options: &HealthCheckOptions,
    ) -> HealthReport {
        let started = Instant::now();
        let selected = self.select(options.probes.as_deref());
        let log_path = self.logs_dir.join(format!("{}.log", server.name));

        let ctx = ProbeContext {
            server,
            handle,
            inspector: self.inspector.as_ref(),
            log_path: &log_path,
        };

        let checks = join_all(
            selected
                .iter()
                .map(|probe| run_probe(probe, &ctx, options.timeout)),
        )
        .await;

        let (status, score) = aggregate(&checks);
        let report = HealthReport {
            server: server.name.clone(),
            status,
            score,
            checks,
            timestamp: Utc::now(),
            duration: started.elapsed(),
        };

        tracing::debug!(%status, score, probes = report.checks.len(), "Health check finished");
        self.remember(&report);

        if options.detailed {
            report
        } else {
            report.without_details()
        }
    }

    /// Recent reports of a server, oldest first
    pub fn history(&self, server: &str) -> Vec<HealthReport> {
        self.history
            .lock()
            .ok()
            .and_then(|history| history.get(server).map(|h| h.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Most recent report of a server
    pub fn latest(&self, server: &str) -> Option<HealthReport> {
        self.history
            .lock()
            .ok()?
            .get(server)
            .and_then(|h| h.back().cloned())
    }

    /// Trend over the recent reports of a server
    pub fn summary(&self, server: &str) -> Option<HealthSummary> {
        let history = self.history(server);
        let last = history.last()?;

        let count = |status: HealthStatus| history.iter().filter(|r| r.status == status).count();
        let average_score = history.iter().map(|r| r.score).sum::<f64>() / history.len() as f64;

        Some(HealthSummary {
            server: server.to_string(),
            checks: history.len(),
            average_score,
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            unknown: count(HealthStatus::Unknown),
            last_status: last.status,
            last_checked: last.timestamp,
        })
    }

    fn select(&self, names: Option<&[String]>) -> Vec<RegisteredProbe> {
        let Ok(probes) = self.probes.read() else {
            tracing::warn!("Failed to lock probe registry");
            return Vec::new();
        };

        match names {
            None => probes.values().filter(|p| p.spec.enabled).cloned().collect(),
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let probe = probes.get(name).cloned();
                    if probe.is_none() {
                        tracing::warn!(probe = %name, "Skipping unknown probe");
                    }
                    probe
                })
                .collect(),
        }
    }

    fn remember(&self, report: &HealthReport) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        let entries = history.entry(report.server.clone()).or_default();
        entries.push_back(report.clone());
        while entries.len() > self.history_limit {
            entries.pop_front();
        }
    }
}

async fn run_probe(
    probe: &RegisteredProbe,
    ctx: &ProbeContext<'_>,
    cap: Option<Duration>,
) -> HealthCheckResult {
    let timeout = cap.map_or(probe.spec.timeout, |cap| cap.min(probe.spec.timeout));
    let started = Instant::now();

    match tokio::time::timeout(timeout, probe.probe.check(ctx)).await {
        Ok(outcome) => HealthCheckResult {
            probe: probe.spec.name.clone(),
            status: outcome.status,
            message: outcome.message,
            details: outcome.details,
            duration: started.elapsed(),
            error: outcome.error,
            critical: probe.spec.critical,
        },
        Err(_) => {
            tracing::warn!(probe = %probe.spec.name, ?timeout, "Probe timed out");
            HealthCheckResult {
                probe: probe.spec.name.clone(),
                status: HealthStatus::Unhealthy,
                message: format!("timed out after {:.1}s", timeout.as_secs_f64()),
                details: ProbeDetails::None,
                duration: started.elapsed(),
                error: Some(Error::Timeout(format!("probe '{}'", probe.spec.name)).to_string()),
                critical: probe.spec.critical,
            }
        }
    }
}
