/// Health checking for managed servers.
///
/// A check runs a set of named, independent probes against one server and
/// folds their results into a [`HealthReport`]. The built-in probes cover
/// process liveness, port reachability, memory and CPU usage, errors in the
/// server log, and a JSON-RPC ping for network servers. Custom probes
/// implement [`HealthProbe`] and are registered on the [`HealthEngine`].
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use mcp_manager::health::{HealthProbe, ProbeContext, ProbeOutcome, ProbeSpec};
/// use mcp_manager::{McpManager, ManagerConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct ReadyFile;
///
/// #[async_trait]
/// impl HealthProbe for ReadyFile {
///     async fn check(&self, ctx: &ProbeContext<'_>) -> ProbeOutcome {
///         match ctx.server.source_dir.as_ref().map(|d| d.join("ready")) {
///             Some(path) if path.exists() => ProbeOutcome::healthy("ready file present"),
///             _ => ProbeOutcome::degraded("ready file missing"),
///         }
///     }
/// }
///
/// # async fn run() -> mcp_manager::Result<()> {
/// let manager = McpManager::new(ManagerConfig::from_env())?;
/// manager.health().register(
///     ProbeSpec::new("ready-file", "Server wrote its ready file", Duration::from_secs(1)),
///     Arc::new(ReadyFile),
/// )?;
/// # Ok(())
/// # }
/// ```
mod engine;
mod probe;
pub mod probes;
mod types;

pub use engine::{HealthCheckOptions, HealthEngine};
pub use probe::{
    HealthProbe, ProbeContext, ProbeOutcome, ProbeSpec, ProbeThresholds, RegisteredProbe,
};
pub use types::{
    aggregate, HealthCheckResult, HealthReport, HealthStatus, HealthSummary, ProbeDetails,
};
