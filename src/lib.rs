/*!
 # MCP Manager

 A Rust library for running and watching locally managed Model Context Protocol (MCP) servers.

 ## Overview

 MCP Manager provides functionality to:
 - Keep a durable registry of server configurations and running processes
 - Start, stop, restart and kill server processes with a graceful-then-forceful stop protocol
 - Reconcile the registry against the OS so crashed servers are noticed and cleaned up
 - Run concurrent, individually time-bounded health probes and score the results
 - Stream periodic health ticks for a set of servers

 ## Basic Usage

 ```no_run
 use mcp_manager::health::HealthCheckOptions;
 use mcp_manager::server::StartOptions;
 use mcp_manager::{McpManager, ManagerConfig, Result, ServerConfig};

 #[tokio::main]
 async fn main() -> Result<()> {
     // One context object per tool invocation
     let manager = McpManager::new(ManagerConfig::from_env())?;

     // Register a server once
     manager.add_server(ServerConfig::new("echo", "python").with_args(["echo.py"]))?;

     // Start it and check its health
     let handle = manager.start("echo", StartOptions::default()).await?;
     println!("echo runs as pid {}", handle.pid);

     let report = manager.check_health("echo", HealthCheckOptions::default()).await?;
     println!("echo is {} (score {:.2})", report.status, report.score);

     // Graceful stop with the configured timeout
     manager.stop("echo", false, None).await?;

     Ok(())
 }
 ```

 ## Features

 - **Registry**: JSON documents written atomically, read through a short-lived cache
 - **Supervision**: Process groups, SIGTERM then SIGKILL, startup failure diagnostics from the server log
 - **Reconciliation**: Recorded processes are trusted only after the OS confirms them
 - **Health**: Built-in and custom probes, per-probe timeouts, criticality and trend summaries
 - **Error Handling**: Typed errors with stable exit codes
*/

pub mod config;
pub mod error;
pub mod health;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::{ManagerConfig, ServerConfig};
pub use error::{Error, Result};
pub use health::{HealthReport, HealthStatus};
pub use server::{ProcessHandle, ProcessStatus, ServerState};
pub use transport::TransportMode;

use config::validate_manager_config;
use futures::stream::BoxStream;
use health::{HealthCheckOptions, HealthEngine, HealthSummary};
use registry::RegistryStore;
use server::monitor::monitor_stream;
use server::{
    ChildTable, LifecycleLog, MonitorOptions, MonitorTick, ProcessInspector, Reconciler,
    StartOptions, Supervisor, SystemInspector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Criteria for [`McpManager::list_servers`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    /// Only servers with this enabled flag
    pub enabled: Option<bool>,
    /// Only servers configured with this transport
    pub transport: Option<TransportMode>,
    /// Only servers in this process status
    pub status: Option<ProcessStatus>,
}

impl ServerFilter {
    fn matches_config(&self, config: &ServerConfig) -> bool {
        self.enabled.is_none_or(|enabled| config.enabled == enabled)
            && self.transport.is_none_or(|transport| config.transport == transport)
    }
}

/// Manage and watch MCP server processes
///
/// This struct is the context object for one tool invocation: it owns the
/// registry cache, the children spawned by this invocation, and the health
/// history. Cloning is cheap and clones share all of that state.
/// All public methods are instrumented with `tracing` spans.
#[derive(Clone)]
pub struct McpManager {
    config: Arc<ManagerConfig>,
    registry: Arc<RegistryStore>,
    reconciler: Arc<Reconciler>,
    supervisor: Arc<Supervisor>,
    health: Arc<HealthEngine>,
}

impl McpManager {
    /// Create a manager that inspects real OS processes
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::with_inspector(config, Arc::new(SystemInspector::new()))
    }

    /// Create a manager with a custom process inspector
    #[tracing::instrument(skip_all, fields(home = %config.home.display()))]
    pub fn with_inspector(
        config: ManagerConfig,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Result<Self> {
        validate_manager_config(&config)?;
        tracing::debug!("Creating new McpManager");

        let config = Arc::new(config);
        let registry = Arc::new(RegistryStore::from_config(&config));
        let children = ChildTable::new();
        let events = Arc::new(LifecycleLog::new());

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&inspector),
            children.clone(),
            Arc::clone(&events),
        ));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&reconciler),
            children,
            events,
        ));
        let health = Arc::new(HealthEngine::new(
            &config.health,
            inspector,
            config.logs_dir(),
            config.history_limit,
        ));

        Ok(Self {
            config,
            registry,
            reconciler,
            supervisor,
            health,
        })
    }

    /// Manager settings
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The underlying registry store
    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    /// The health engine, for registering custom probes
    pub fn health(&self) -> &HealthEngine {
        &self.health
    }

    /// The process supervisor
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Lifecycle events recorded during this invocation
    pub fn events(&self) -> &LifecycleLog {
        self.supervisor.events()
    }

    /// Log file of a server
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.config.log_path(name)
    }

    /// Register a new server configuration
    pub fn add_server(&self, config: ServerConfig) -> Result<()> {
        self.registry.add_server(config)
    }

    /// Replace an existing server configuration
    pub fn update_server(&self, config: ServerConfig) -> Result<ServerConfig> {
        self.registry.update_server(config)
    }

    /// Remove a server configuration. Refused while the server is running.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub fn remove_server(&self, name: &str) -> Result<ServerConfig> {
        self.registry.invalidate();
        if let Some(handle) = self.reconciler.live_handle(name)? {
            return Err(Error::AlreadyRunning {
                name: name.to_string(),
                pid: handle.pid,
            });
        }
        self.registry.remove_server(name)
    }

    /// Enable or disable a server
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<ServerConfig> {
        self.registry.invalidate();
        let mut config = self.registry.get_server(name)?;
        config.enabled = enabled;
        self.registry.update_server(config)
    }

    /// Start a server
    pub async fn start(&self, name: &str, options: StartOptions) -> Result<ProcessHandle> {
        self.supervisor.start(name, options).await
    }

    /// Stop a server
    ///
    /// `timeout` bounds the graceful phase and defaults to the configured
    /// stop timeout. With `force` the process is killed at once.
    pub async fn stop(&self, name: &str, force: bool, timeout: Option<Duration>) -> Result<bool> {
        let timeout = timeout.unwrap_or_else(|| self.config.stop_timeout());
        self.supervisor.stop(name, force, timeout).await
    }

    /// Restart a server
    pub async fn restart(&self, name: &str, options: StartOptions) -> Result<ProcessHandle> {
        self.supervisor.restart(name, options).await
    }

    /// Kill a server without the graceful path
    pub async fn kill(&self, name: &str) -> Result<bool> {
        self.supervisor.kill(name).await
    }

    /// Whether a live process backs the server
    pub fn is_running(&self, name: &str) -> Result<bool> {
        self.supervisor.is_running(name)
    }

    /// Current state of a server
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub fn status(&self, name: &str) -> Result<ServerState> {
        let config = self.registry.get_server(name)?;
        let (status, handle) = self.supervisor.process_status(name)?;

        Ok(ServerState {
            config,
            handle,
            status,
            last_report: self.health.latest(name),
        })
    }

    /// Run health probes against a server
    #[tracing::instrument(skip(self, options), fields(server = %name))]
    pub async fn check_health(&self, name: &str, options: HealthCheckOptions) -> Result<HealthReport> {
        let config = self.registry.get_server(name)?;
        let handle = self.reconciler.live_handle(name)?;

        Ok(self
            .health
            .check_server(&config, handle.as_ref(), &options)
            .await)
    }

    /// Trend over the recent health reports of a server
    pub fn health_summary(&self, name: &str) -> Option<HealthSummary> {
        self.health.summary(name)
    }

    /// Periodic health ticks until interrupted or dropped
    pub fn monitor(&self, options: MonitorOptions) -> BoxStream<'static, MonitorTick> {
        monitor_stream(self.clone(), options)
    }

    /// States of all registered servers matching `filter`, sorted by name
    ///
    /// A server whose state cannot be determined is listed as `unknown`.
    #[tracing::instrument(skip(self, filter))]
    pub fn list_servers(&self, filter: &ServerFilter) -> Result<Vec<ServerState>> {
        let snapshot = self.registry.load()?;
        let mut states = Vec::new();

        for config in snapshot.servers.values() {
            if !filter.matches_config(config) {
                continue;
            }

            let (status, handle) = match self.supervisor.process_status(&config.name) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "Failed to reconcile server");
                    (ProcessStatus::Unknown, None)
                }
            };

            if filter.status.is_some_and(|wanted| wanted != status) {
                continue;
            }

            states.push(ServerState {
                config: config.clone(),
                handle,
                status,
                last_report: self.health.latest(&config.name),
            });
        }

        Ok(states)
    }

    /// Evict every recorded process that is no longer alive
    pub fn reconcile(&self) -> Result<Vec<String>> {
        self.reconciler.reconcile_all()
    }

    /// Stop tracked children on SIGINT or SIGTERM, then exit with status 130
    pub fn install_shutdown_hook(&self) -> JoinHandle<()> {
        server::install_shutdown_hook(
            Arc::clone(&self.supervisor),
            self.config.shutdown_deadline(),
        )
    }

    pub(crate) fn enabled_server_names(&self) -> Result<Vec<String>> {
        Ok(self
            .registry
            .load()?
            .servers
            .values()
            .filter(|config| config.enabled)
            .map(|config| config.name.clone())
            .collect())
    }
}
