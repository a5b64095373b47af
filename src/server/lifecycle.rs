use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::registry::RegistryStore;
use crate::server::os::send_signal;
use crate::server::process::{ChildTable, LaunchPlan, ProcessHandle, ProcessStatus};
use crate::server::reconcile::{HandleCheck, Reconciler};
use crate::transport::TransportMode;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use nix::sys::signal::Signal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Events kept in memory before the oldest are dropped.
const EVENT_HISTORY_LIMIT: usize = 1000;

/// Interval between liveness polls while waiting for an exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Most bytes of startup output attached to a startup failure.
const MAX_STARTUP_OUTPUT: usize = 4096;

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerLifecycleEvent {
    /// Server started
    Started,
    /// Server stopped after a graceful signal
    Stopped,
    /// Server was forcefully killed
    Killed,
    /// A start or stop attempt failed
    Failed,
    /// Server restarted
    Restarted,
    /// A dead process was found and its handle removed
    Evicted,
}

/// Server lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    /// Server name
    pub name: String,
    /// Event type
    pub event: ServerLifecycleEvent,
    /// Process id involved, if any
    pub pid: Option<u32>,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event details
    pub details: Option<String>,
}

/// Bounded in-memory history of lifecycle events for this invocation.
#[derive(Debug, Default)]
pub struct LifecycleLog {
    events: Mutex<VecDeque<ServerEvent>>,
}

impl LifecycleLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a server event
    pub fn record(
        &self,
        name: &str,
        event: ServerLifecycleEvent,
        pid: Option<u32>,
        details: Option<String>,
    ) {
        tracing::debug!(server = %name, ?event, ?pid, "Lifecycle event");

        let Ok(mut events) = self.events.lock() else {
            tracing::warn!(server = %name, "Failed to lock lifecycle events");
            return;
        };

        events.push_back(ServerEvent {
            name: name.to_string(),
            event,
            pid,
            timestamp: Utc::now(),
            details,
        });

        while events.len() > EVENT_HISTORY_LIMIT {
            events.pop_front();
        }
    }

    /// Get recent events for a server, newest first
    pub fn server_events(&self, name: &str, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        Ok(events
            .iter()
            .rev()
            .filter(|e| e.name == name)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Get all events, newest first
    pub fn all_events(&self, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        Ok(events
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Clear events
    pub fn clear(&self) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        events.clear();

        Ok(())
    }
}

/// Per-call overrides for starting a server.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Transport to use instead of the configured one
    pub transport: Option<TransportMode>,
    /// Port to use instead of the configured one
    pub port: Option<u16>,
    /// Leave the process running when the tool itself is interrupted
    pub detached: bool,
}

impl StartOptions {
    /// Start detached from the tool's own lifetime
    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Self::default()
        }
    }
}

/// Removes an in-flight transition marker when dropped.
struct TransitionGuard<'a> {
    transitions: &'a Mutex<HashMap<String, ProcessStatus>>,
    name: String,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut transitions) = self.transitions.lock() {
            transitions.remove(&self.name);
        }
    }
}

/// Starts, stops and kills server processes.
///
/// Every operation reads the registry fresh and validates the recorded handle
/// against the OS before acting on it.
pub struct Supervisor {
    config: Arc<ManagerConfig>,
    registry: Arc<RegistryStore>,
    reconciler: Arc<Reconciler>,
    children: ChildTable,
    events: Arc<LifecycleLog>,
    transitions: Mutex<HashMap<String, ProcessStatus>>,
}

impl Supervisor {
    /// Create a new supervisor
    pub fn new(
        config: Arc<ManagerConfig>,
        registry: Arc<RegistryStore>,
        reconciler: Arc<Reconciler>,
        children: ChildTable,
        events: Arc<LifecycleLog>,
    ) -> Self {
        Self {
            config,
            registry,
            reconciler,
            children,
            events,
            transitions: Mutex::new(HashMap::new()),
        }
    }

    /// Lifecycle events recorded by this supervisor
    pub fn events(&self) -> &Arc<LifecycleLog> {
        &self.events
    }

    /// Start a server.
    ///
    /// The spawned process must survive the startup grace period before its
    /// handle is recorded; a process that exits earlier fails the start with
    /// the output it wrote to its log.
    #[tracing::instrument(skip(self, options), fields(server = %name))]
    pub async fn start(&self, name: &str, options: StartOptions) -> Result<ProcessHandle> {
        self.registry.invalidate();
        let config = self.registry.get_server(name)?;

        if !config.enabled {
            return Err(Error::Disabled(name.to_string()));
        }

        if let Some(handle) = self.reconciler.live_handle(name)? {
            return Err(Error::AlreadyRunning {
                name: name.to_string(),
                pid: handle.pid,
            });
        }

        let _transition = self.begin_transition(name, ProcessStatus::Starting)?;

        let plan = LaunchPlan::resolve(&config, options.transport, options.port)?;
        let log_path = self.config.log_path(name);
        let (mut child, log_offset) = plan.spawn(&log_path)?;
        let pid = child.id();

        tracing::info!(pid, transport = %plan.transport, port = ?plan.port, "Server process spawned");

        tokio::time::sleep(self.config.startup_grace()).await;

        match child.try_status() {
            Ok(Some(status)) => {
                let output = read_output_since(&log_path, log_offset).await;
                tracing::error!(pid, %status, "Server exited during startup");
                self.events.record(
                    name,
                    ServerLifecycleEvent::Failed,
                    Some(pid),
                    Some(format!("exited during startup: {}", status)),
                );
                return Err(Error::StartupFailed {
                    name: name.to_string(),
                    status: status.to_string(),
                    output,
                });
            }
            Ok(None) => {}
            Err(e) => {
                if let Err(kill_err) = child.kill() {
                    tracing::warn!(pid, error = %kill_err, "Failed to kill unpolled process, it may still be running");
                }
                return Err(Error::Process(format!(
                    "Failed to poll '{}' after spawn: {}",
                    name, e
                )));
            }
        }

        let handle = plan.into_handle(pid, options.detached);
        if let Err(e) = self.registry.put_process(handle.clone()) {
            tracing::error!(pid, error = %e, "Failed to record process handle, killing untracked process");
            if let Err(kill_err) = child.kill() {
                tracing::warn!(pid, error = %kill_err, "Failed to kill untracked process, it is running without a handle");
            }
            return Err(e);
        }

        self.children.insert(name, child, options.detached);
        self.events.record(
            name,
            ServerLifecycleEvent::Started,
            Some(pid),
            Some(handle.command.join(" ")),
        );
        tracing::info!(pid, "Server started");

        Ok(handle)
    }

    /// Stop a running server.
    ///
    /// Without `force` the process group receives SIGTERM and gets `timeout`
    /// to exit before it is killed; with `force` it is killed at once. The
    /// handle is removed only once the exit is confirmed.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn stop(&self, name: &str, force: bool, timeout: Duration) -> Result<bool> {
        self.registry.invalidate();
        self.registry.get_server(name)?;

        let handle = match self.reconciler.check(name)? {
            HandleCheck::Live(handle) => handle,
            HandleCheck::Evicted(_) | HandleCheck::Absent => {
                return Err(Error::NotRunning(name.to_string()));
            }
        };

        let _transition = self.begin_transition(name, ProcessStatus::Stopping)?;
        self.terminate(&handle, force, timeout).await?;
        Ok(true)
    }

    /// Kill a server without the graceful path.
    ///
    /// Returns `Ok(false)` when there is no live process to kill.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn kill(&self, name: &str) -> Result<bool> {
        self.registry.invalidate();
        self.registry.get_server(name)?;

        let Some(handle) = self.reconciler.live_handle(name)? else {
            tracing::info!("No live process to kill");
            return Ok(false);
        };

        let _transition = self.begin_transition(name, ProcessStatus::Stopping)?;
        self.terminate(&handle, true, Duration::ZERO).await?;
        Ok(true)
    }

    /// Stop a server if it is running, wait the restart delay, and start it again.
    ///
    /// A failed stop aborts the restart before anything is spawned.
    #[tracing::instrument(skip(self, options), fields(server = %name))]
    pub async fn restart(&self, name: &str, options: StartOptions) -> Result<ProcessHandle> {
        match self.stop(name, false, self.config.stop_timeout()).await {
            Ok(_) => tokio::time::sleep(self.config.restart_delay()).await,
            Err(Error::NotRunning(_)) => {
                tracing::info!("Server was not running, starting it");
            }
            Err(e) => return Err(e),
        }

        let handle = self.start(name, options).await?;
        self.events.record(
            name,
            ServerLifecycleEvent::Restarted,
            Some(handle.pid),
            None,
        );
        Ok(handle)
    }

    /// Whether a live process backs the server
    pub fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.reconciler.live_handle(name)?.is_some())
    }

    /// Reconciled process status and live handle of a server.
    ///
    /// `Crashed` is reported by the call that evicts a dead handle; later
    /// calls report `Stopped`.
    pub fn process_status(&self, name: &str) -> Result<(ProcessStatus, Option<ProcessHandle>)> {
        let transition = self.current_transition(name);
        let check = self.reconciler.check(name)?;

        let status = match (transition, &check) {
            (Some(ProcessStatus::Stopping), HandleCheck::Live(_)) => ProcessStatus::Stopping,
            (Some(ProcessStatus::Starting), HandleCheck::Absent | HandleCheck::Evicted(_)) => {
                ProcessStatus::Starting
            }
            (_, HandleCheck::Live(_)) => ProcessStatus::Running,
            (_, HandleCheck::Evicted(_)) => ProcessStatus::Crashed,
            (_, HandleCheck::Absent) => ProcessStatus::Stopped,
        };

        Ok((status, check.into_live()))
    }

    /// Stop every tracked child that was not started detached.
    ///
    /// Stops run concurrently and the whole batch is bounded by `deadline`
    /// plus the kill timeout. Servers still running afterwards are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown_tracked(&self, deadline: Duration) -> Vec<(String, Result<bool>)> {
        let attached = self.children.attached();
        if attached.is_empty() {
            return Vec::new();
        }

        tracing::info!(count = attached.len(), "Stopping tracked servers");
        let graceful = deadline
            .saturating_sub(self.config.kill_timeout())
            .max(EXIT_POLL_INTERVAL);

        let stops = attached.iter().map(|(name, _)| async move {
            (name.clone(), self.stop(name, false, graceful).await)
        });

        let outcome = tokio::time::timeout(deadline + self.config.kill_timeout(), join_all(stops)).await;
        match outcome {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!("Shutdown deadline passed before all servers stopped");
                attached
                    .into_iter()
                    .map(|(name, _)| {
                        let err = Error::Timeout(format!("stopping '{}' during shutdown", name));
                        (name, Err(err))
                    })
                    .collect()
            }
        }
    }

    async fn terminate(&self, handle: &ProcessHandle, force: bool, timeout: Duration) -> Result<()> {
        let pid = handle.pid;
        let mut event = ServerLifecycleEvent::Killed;
        let mut exited = false;

        if !force {
            tracing::info!(pid, ?timeout, "Sending SIGTERM");
            exited = !send_signal(pid, Signal::SIGTERM)? || self.wait_for_exit(handle, timeout).await;
            if exited {
                event = ServerLifecycleEvent::Stopped;
            } else {
                tracing::warn!(pid, ?timeout, "Process ignored SIGTERM, escalating to SIGKILL");
            }
        }

        if !exited {
            tracing::info!(pid, "Sending SIGKILL");
            exited = !send_signal(pid, Signal::SIGKILL)?
                || self.wait_for_exit(handle, self.config.kill_timeout()).await;
        }

        if !exited {
            tracing::error!(pid, "Process survived SIGKILL");
            self.events.record(
                &handle.name,
                ServerLifecycleEvent::Failed,
                Some(pid),
                Some("process did not exit after SIGKILL".to_string()),
            );
            return Err(Error::StopTimeout {
                name: handle.name.clone(),
                pid,
            });
        }

        self.reconciler.forget(handle)?;
        self.events.record(&handle.name, event, Some(pid), None);
        tracing::info!(pid, ?event, "Server process exited");
        Ok(())
    }

    async fn wait_for_exit(&self, handle: &ProcessHandle, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.reconciler.is_alive(handle) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn begin_transition(&self, name: &str, status: ProcessStatus) -> Result<TransitionGuard<'_>> {
        let mut transitions = self
            .transitions
            .lock()
            .map_err(|_| Error::Other("Failed to lock server transitions".to_string()))?;

        if let Some(current) = transitions.get(name) {
            return Err(Error::Process(format!(
                "Server '{}' is already {}",
                name, current
            )));
        }
        transitions.insert(name.to_string(), status);

        Ok(TransitionGuard {
            transitions: &self.transitions,
            name: name.to_string(),
        })
    }

    fn current_transition(&self, name: &str) -> Option<ProcessStatus> {
        self.transitions
            .lock()
            .ok()
            .and_then(|transitions| transitions.get(name).copied())
    }
}

/// Output appended to a log after `offset`, trimmed to the last few kilobytes.
async fn read_output_since(path: &Path, offset: u64) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    let start = usize::try_from(offset).ok()?.min(bytes.len());
    let mut output = &bytes[start..];
    if output.len() > MAX_STARTUP_OUTPUT {
        output = &output[output.len() - MAX_STARTUP_OUTPUT..];
    }

    let text = String::from_utf8_lossy(output).trim().to_string();
    (!text.is_empty()).then_some(text)
}
