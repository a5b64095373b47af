use crate::error::{Error, Result};
use crate::transport::TransportMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host used for network servers when the configuration does not name one.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Configuration for a single managed server.
///
/// This structure defines how to start one server process: the command to
/// execute, its arguments, the environment overlay applied on top of the
/// inherited environment, and the transport the server speaks.
///
/// Arguments may contain the placeholders `{port}`, `{host}`, `{transport}`
/// and `{name}`; they are substituted when the server is started so that
/// port overrides reach the process.
///
/// # JSON Schema
///
/// ```json
/// {
///   "name": "web",
///   "transport": "network",
///   "port": 9000,
///   "command": "python",
///   "args": ["-m", "server", "--port", "{port}"],
///   "env": { "LOG_LEVEL": "debug" },
///   "source_dir": "/home/me/servers/web",
///   "enabled": true,
///   "created_at": "2024-05-01T10:00:00Z",
///   "updated_at": "2024-05-01T10:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name.
    pub name: String,

    /// Transport the server speaks.
    #[serde(default)]
    pub transport: TransportMode,

    /// Port for network transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Host the server listens on for network transport.
    #[serde(default = "default_host")]
    pub host: String,

    /// Command to execute when starting the server.
    /// This can be an absolute path or a command available in the PATH.
    pub command: String,

    /// Command-line arguments to pass to the server.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set when launching the server.
    /// These will be combined with the current environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Root of the server's source tree; used as the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,

    /// Free-form description shown in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Disabled servers are kept in the registry but refuse to start.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last edited.
    pub updated_at: DateTime<Utc>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    /// Create an enabled stdio server configuration.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            transport: TransportMode::Stdio,
            port: None,
            host: default_host(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            source_dir: None,
            description: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the command-line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the transport and, for network servers, the port.
    pub fn with_transport(mut self, transport: TransportMode, port: Option<u16>) -> Self {
        self.transport = transport;
        self.port = port;
        self
    }

    /// Add one environment variable to the overlay.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the source directory the server runs from.
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Arguments with placeholders substituted for the given launch parameters.
    pub fn resolved_args(&self, port: Option<u16>, transport: TransportMode) -> Vec<String> {
        let port = port.map(|p| p.to_string()).unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port)
                    .replace("{host}", &self.host)
                    .replace("{transport}", transport.as_str())
                    .replace("{name}", &self.name)
            })
            .collect()
    }

    /// The full command vector for the given launch parameters.
    pub fn command_line(&self, port: Option<u16>, transport: TransportMode) -> Vec<String> {
        let mut command = vec![self.command.clone()];
        command.extend(self.resolved_args(port, transport));
        command
    }
}

/// Thresholds and timeouts for the built-in health probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Default per-probe timeout, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Resident memory above which the server is degraded.
    pub memory_warning_mb: f64,
    /// Resident memory above which the server is unhealthy.
    pub memory_critical_mb: f64,
    /// CPU utilisation above which the server is degraded.
    pub cpu_warning_percent: f64,
    /// CPU utilisation above which the server is unhealthy.
    pub cpu_critical_percent: f64,
    /// Window over which CPU utilisation is sampled, in milliseconds.
    pub cpu_sample_ms: u64,
    /// Number of trailing log lines scanned for error markers.
    pub log_tail_lines: usize,
    /// Substrings that mark a log line as an error.
    pub log_error_markers: Vec<String>,
    /// Error line count at which the log probe reports degraded.
    pub log_warning_count: usize,
    /// Error line count at which the log probe reports unhealthy.
    pub log_critical_count: usize,
    /// HTTP path the protocol probe sends its JSON-RPC ping to.
    pub protocol_path: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            memory_warning_mb: 512.0,
            memory_critical_mb: 1024.0,
            cpu_warning_percent: 80.0,
            cpu_critical_percent: 95.0,
            cpu_sample_ms: 500,
            log_tail_lines: 100,
            log_error_markers: ["ERROR", "CRITICAL", "Exception", "Traceback"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            log_warning_count: 1,
            log_critical_count: 5,
            protocol_path: "/mcp".to_string(),
        }
    }
}

impl HealthSettings {
    /// Default per-probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// CPU sampling window.
    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_ms)
    }
}

/// Settings for the manager itself.
///
/// Every field has a default, so an empty JSON object is a valid
/// configuration. The registry documents and per-server logs live under
/// [`ManagerConfig::home`].
///
/// ```json
/// {
///   "home": "/home/me/.mcp-manager",
///   "stop_timeout_secs": 10,
///   "health": { "memory_warning_mb": 256.0 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding `servers.json`, `processes.json` and `logs/`.
    pub home: PathBuf,
    /// How long a loaded registry snapshot is reused, in milliseconds.
    pub cache_ttl_ms: u64,
    /// How long a freshly spawned process must survive, in milliseconds.
    pub startup_grace_ms: u64,
    /// Default graceful stop timeout, in seconds.
    pub stop_timeout_secs: u64,
    /// How long to wait after a forceful kill, in seconds.
    pub kill_timeout_secs: u64,
    /// Settling delay between the stop and start halves of a restart, in milliseconds.
    pub restart_delay_ms: u64,
    /// Overall deadline for stopping tracked children when the tool exits, in seconds.
    pub shutdown_deadline_secs: u64,
    /// Number of health reports kept per server for trend summaries.
    pub history_limit: usize,
    /// Health probe thresholds.
    pub health: HealthSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            cache_ttl_ms: 30_000,
            startup_grace_ms: 500,
            stop_timeout_secs: 10,
            kill_timeout_secs: 2,
            restart_delay_ms: 1_000,
            shutdown_deadline_secs: 5,
            history_limit: 50,
            health: HealthSettings::default(),
        }
    }
}

fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os("MCP_MANAGER_HOME") {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-manager")
}

impl ManagerConfig {
    /// Default settings rooted at the given directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Default settings rooted at `MCP_MANAGER_HOME`, or `~/.mcp-manager`.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses settings from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Path of the server configuration document.
    pub fn servers_path(&self) -> PathBuf {
        self.home.join("servers.json")
    }

    /// Path of the process handle document.
    pub fn processes_path(&self) -> PathBuf {
        self.home.join("processes.json")
    }

    /// Directory holding per-server log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Log file of one server.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", name))
    }

    /// Registry snapshot lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Startup grace period.
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    /// Default graceful stop timeout.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Wait after a forceful kill.
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    /// Restart settling delay.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Exit cleanup deadline.
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}
