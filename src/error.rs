/// Error handling module for MCP Manager.
///
/// This module defines the error types used throughout the library.
/// Every operation exposed to the command-line layer returns one of these
/// variants, and each variant maps to a stable exit status through
/// [`Error::exit_code`].
///
/// # Example
///
/// ```
/// use mcp_manager::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServerNotFound(name)) => println!("Server '{}' is not registered", name),
///         Err(Error::AlreadyRunning { name, pid }) => println!("'{}' already runs as pid {}", name, pid),
///         Err(e) => println!("{} error: {}", e.category(), e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the mcp-manager library.
///
/// Each variant carries enough context (server name, operation, underlying
/// message) to render a useful message without consulting logs.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested server is not registered.
    ///
    /// This error occurs when:
    /// - A server name is passed that has no configuration record
    /// - A server was removed between two calls
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// No process handle is recorded for the server.
    #[error("No process record for server: {0}")]
    HandleNotFound(String),

    /// A server with the same name is already registered.
    #[error("Server already exists: {0}")]
    DuplicateName(String),

    /// The server configuration is disabled and cannot be started.
    #[error("Server is disabled: {0}")]
    Disabled(String),

    /// The server already has a live process.
    ///
    /// This error occurs when:
    /// - Attempting to start a server whose process handle is still alive
    #[error("Server '{name}' is already running (pid {pid})")]
    AlreadyRunning {
        /// Server name
        name: String,
        /// Process id of the live process
        pid: u32,
    },

    /// The server has no live process.
    ///
    /// This error occurs when:
    /// - Attempting to stop a server that is not running
    /// - The recorded process was found dead during reconciliation
    #[error("Server is not running: {0}")]
    NotRunning(String),

    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration is well formed but contains invalid values.
    ///
    /// This error occurs when:
    /// - A server name does not follow the naming rule
    /// - Network transport is selected without a usable port
    /// - The command is empty
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The process exited during the startup grace period.
    #[error("Server '{name}' exited during startup ({status}){}", format_output(.output))]
    StartupFailed {
        /// Server name
        name: String,
        /// Exit status as reported by the OS
        status: String,
        /// Output captured from the server log since the spawn, if any
        output: Option<String>,
    },

    /// Neither the graceful stop nor the forceful kill terminated the process.
    #[error("Server '{name}' (pid {pid}) did not exit after a forceful kill")]
    StopTimeout {
        /// Server name
        name: String,
        /// Process id that survived
        pid: u32,
    },

    /// A health probe name is not registered.
    #[error("Probe not found: {0}")]
    ProbeNotFound(String),

    /// Operation timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The on-disk registry could not be read or written.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Error when spawning or signalling a server process.
    #[error("Server process error: {0}")]
    Process(String),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

fn format_output(output: &Option<String>) -> String {
    match output {
        Some(text) if !text.trim().is_empty() => format!(":\n{}", text.trim_end()),
        _ => String::new(),
    }
}

impl Error {
    /// Short, human-readable category used when rendering the error.
    pub fn category(&self) -> &'static str {
        match self {
            Error::ServerNotFound(_) | Error::HandleNotFound(_) | Error::ProbeNotFound(_) => {
                "not-found"
            }
            Error::DuplicateName(_) => "duplicate",
            Error::AlreadyRunning { .. } => "already-running",
            Error::NotRunning(_) => "not-running",
            Error::Disabled(_) | Error::ConfigInvalid(_) | Error::ConfigParse(_) => {
                "config-invalid"
            }
            Error::StartupFailed { .. } => "startup-failed",
            Error::StopTimeout { .. } => "stop-timeout",
            Error::Timeout(_) => "timeout",
            Error::Registry(_)
            | Error::Process(_)
            | Error::Serialization(_)
            | Error::Other(_) => "unexpected",
        }
    }

    /// Non-zero process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            "not-found" => 2,
            "duplicate" => 3,
            "already-running" => 4,
            "not-running" => 5,
            "config-invalid" => 6,
            "startup-failed" => 7,
            "stop-timeout" => 8,
            "timeout" => 9,
            _ => 1,
        }
    }
}

/// Result type for mcp-manager operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_non_zero_and_distinct_per_category() {
        let errors = [
            Error::ServerNotFound("a".into()),
            Error::DuplicateName("a".into()),
            Error::AlreadyRunning { name: "a".into(), pid: 1 },
            Error::NotRunning("a".into()),
            Error::Disabled("a".into()),
            Error::StartupFailed { name: "a".into(), status: "exit status: 1".into(), output: None },
            Error::StopTimeout { name: "a".into(), pid: 1 },
            Error::Timeout("a".into()),
            Error::Other("a".into()),
        ];
        let codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        assert!(codes.iter().all(|code| *code != 0));
        let mut unique = codes.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_startup_failed_includes_output() {
        let err = Error::StartupFailed {
            name: "echo".into(),
            status: "exit status: 2".into(),
            output: Some("boom\n".into()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("echo"));
        assert!(rendered.ends_with("boom"));
    }
}
