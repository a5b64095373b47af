//! Transport modes for managed servers.
//!
//! A managed server talks to its client either over its own standard
//! input/output or over a network port. The transport decides which health
//! probes are applicable and whether a port must be configured.
pub mod json_rpc;

pub use json_rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a managed server communicates with its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Standard input/output of the child process.
    #[default]
    Stdio,
    /// A TCP port the server listens on.
    #[serde(alias = "http", alias = "sse")]
    Network,
}

impl TransportMode {
    /// Whether this transport listens on a port.
    pub fn is_network(self) -> bool {
        matches!(self, TransportMode::Network)
    }

    /// Lowercase name, as stored in the registry.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Stdio => "stdio",
            TransportMode::Network => "network",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            // MCP names for the HTTP transports
            "network" | "http" | "sse" => Ok(TransportMode::Network),
            other => Err(Error::ConfigInvalid(format!(
                "Unknown transport '{}', expected 'stdio' or 'network'",
                other
            ))),
        }
    }
}
