// src/server/process.rs
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::health::HealthReport;
use crate::transport::TransportMode;
use async_process::{Child, Command, Stdio};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Runtime record of a process observed running at spawn time.
///
/// A handle is written the moment a spawn survives its startup grace period
/// and removed when the process is confirmed stopped or found dead. Its
/// continued validity is re-checked against the OS on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// OS process id
    pub pid: u32,
    /// Server the process belongs to
    pub name: String,
    /// Transport the process was started with
    pub transport: TransportMode,
    /// Port the process was started with, for network transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
    /// Exact command vector used
    pub command: Vec<String>,
    /// Working directory of the process
    pub working_dir: PathBuf,
    /// Whether the process was started to outlive the tool
    #[serde(default)]
    pub detached: bool,
}

impl ProcessHandle {
    /// Time since the process was spawned.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }
}

/// Status of a server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Server is starting
    Starting,
    /// Server is running
    Running,
    /// Server is stopping
    Stopping,
    /// Server has stopped
    Stopped,
    /// The recorded process died without going through stop
    Crashed,
    /// The process state could not be determined
    Unknown,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Crashed => "crashed",
            ProcessStatus::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Everything known about one server at the moment it was requested.
///
/// Computed on demand and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ServerState {
    /// Registered configuration
    pub config: ServerConfig,
    /// Live process handle, if the server is running
    pub handle: Option<ProcessHandle>,
    /// Process status as reconciled against the OS
    pub status: ProcessStatus,
    /// Most recent health report from this invocation
    pub last_report: Option<HealthReport>,
}

impl ServerState {
    /// Server name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether a live process backs this server
    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }
}

/// Fully resolved parameters for one spawn.
#[derive(Debug, Clone)]
pub(crate) struct LaunchPlan {
    pub name: String,
    pub transport: TransportMode,
    pub port: Option<u16>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

impl LaunchPlan {
    /// Resolve transport, port, command and environment for a server.
    pub fn resolve(
        config: &ServerConfig,
        transport_override: Option<TransportMode>,
        port_override: Option<u16>,
    ) -> Result<Self> {
        let transport = transport_override.unwrap_or(config.transport);
        let port = port_override.or(config.port);

        let port = if transport.is_network() {
            match port {
                Some(p) if p > 0 => Some(p),
                Some(_) => {
                    return Err(Error::ConfigInvalid(format!(
                        "Server '{}' has port 0, expected 1-65535",
                        config.name
                    )));
                }
                None => {
                    return Err(Error::ConfigInvalid(format!(
                        "Server '{}' uses network transport but no port is configured",
                        config.name
                    )));
                }
            }
        } else {
            None
        };

        let working_dir = match &config.source_dir {
            Some(dir) if dir.is_dir() => dir.clone(),
            Some(dir) => {
                return Err(Error::ConfigInvalid(format!(
                    "Source directory {} of server '{}' does not exist",
                    dir.display(),
                    config.name
                )));
            }
            None => std::env::current_dir().map_err(|e| {
                Error::Process(format!("Failed to resolve working directory: {}", e))
            })?,
        };

        let mut env = config.env.clone();
        env.insert("MCP_SERVER_NAME".to_string(), config.name.clone());
        env.insert("MCP_TRANSPORT".to_string(), transport.as_str().to_string());
        if let Some(port) = port {
            env.insert("MCP_HOST".to_string(), config.host.clone());
            env.insert("MCP_PORT".to_string(), port.to_string());
        }

        Ok(Self {
            name: config.name.clone(),
            transport,
            port,
            command: config.command_line(port, transport),
            env,
            working_dir,
        })
    }

    /// Spawn the process with its output appended to `log_path`.
    ///
    /// Returns the child and the log length before the spawn, so output
    /// produced by this run can be told apart from earlier runs.
    pub fn spawn(&self, log_path: &Path) -> Result<(Child, u64)> {
        if let Some(dir) = log_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Process(format!("Failed to create log directory {}: {}", dir.display(), e))
            })?;
        }

        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| {
                Error::Process(format!("Failed to open log file {}: {}", log_path.display(), e))
            })?;
        let log_offset = stdout_log.metadata().map(|m| m.len()).unwrap_or(0);
        let stderr_log = stdout_log
            .try_clone()
            .map_err(|e| Error::Process(format!("Failed to duplicate log handle: {}", e)))?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::ConfigInvalid(format!("Server '{}' has empty command", self.name)))?;

        let mut std_command = std::process::Command::new(program);
        std_command
            .args(args)
            .envs(&self.env)
            .current_dir(&self.working_dir);

        // Own process group: terminal signals reach the manager, not the
        // server, and stop can signal the whole tree.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        // A stdio server reads its channel from stdin; the pipe stays open for
        // as long as this invocation tracks the child.
        let stdin = if self.transport.is_network() {
            Stdio::null()
        } else {
            Stdio::piped()
        };

        let mut command = Command::from(std_command);
        command
            .stdin(stdin)
            .stdout(std::process::Stdio::from(stdout_log))
            .stderr(std::process::Stdio::from(stderr_log))
            .kill_on_drop(false);

        tracing::debug!(
            server = %self.name,
            command = ?self.command,
            working_dir = %self.working_dir.display(),
            "Spawning server process"
        );

        let child = command.spawn().map_err(|e| {
            Error::Process(format!(
                "Failed to start process for '{}' ({}): {}",
                self.name, program, e
            ))
        })?;

        Ok((child, log_offset))
    }

    /// The handle recorded for a successfully started process.
    pub fn into_handle(self, pid: u32, detached: bool) -> ProcessHandle {
        ProcessHandle {
            pid,
            name: self.name,
            transport: self.transport,
            port: self.port,
            started_at: Utc::now(),
            command: self.command,
            working_dir: self.working_dir,
            detached,
        }
    }
}

struct TrackedChild {
    child: Child,
    pid: u32,
    detached: bool,
}

/// Children spawned by this invocation, keyed by server name.
///
/// Keeping the [`Child`] lets the manager reap processes it started and
/// observe their exit without racing pid reuse. Dropping an entry hands the
/// child to the background reaper.
#[derive(Clone, Default)]
pub struct ChildTable {
    inner: Arc<Mutex<HashMap<String, TrackedChild>>>,
}

impl ChildTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, name: &str, child: Child, detached: bool) {
        let pid = child.id();
        if let Ok(mut children) = self.inner.lock() {
            children.insert(
                name.to_string(),
                TrackedChild {
                    child,
                    pid,
                    detached,
                },
            );
        }
    }

    pub(crate) fn remove(&self, name: &str) {
        if let Ok(mut children) = self.inner.lock() {
            children.remove(name);
        }
    }

    /// Whether the tracked child for `name` with this pid has exited.
    ///
    /// Returns `None` when no such child is tracked, in which case the caller
    /// has to ask the OS.
    pub fn poll_exit(&self, name: &str, pid: u32) -> Option<bool> {
        let mut children = self.inner.lock().ok()?;
        let tracked = children.get_mut(name)?;
        if tracked.pid != pid {
            return None;
        }
        match tracked.child.try_status() {
            Ok(Some(status)) => {
                tracing::debug!(server = %name, pid, %status, "Tracked child has exited");
                Some(true)
            }
            Ok(None) => Some(false),
            Err(e) => {
                tracing::warn!(server = %name, pid, error = %e, "Failed to poll tracked child");
                None
            }
        }
    }

    /// Names and pids of tracked children that should not outlive the tool.
    pub fn attached(&self) -> Vec<(String, u32)> {
        self.inner
            .lock()
            .map(|children| {
                children
                    .iter()
                    .filter(|(_, tracked)| !tracked.detached)
                    .map(|(name, tracked)| (name.clone(), tracked.pid))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of tracked children.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|children| children.len()).unwrap_or(0)
    }

    /// Whether no children are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
