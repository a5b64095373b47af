//! Configuration module for MCP Manager.
//!
//! This module holds the two kinds of configuration the manager works with:
//!
//! * [`ServerConfig`] - how to run one managed server. These records are owned
//!   by the registry and persisted in its server document.
//! * [`ManagerConfig`] - settings for the manager itself: where the registry
//!   and logs live, timeouts for the stop protocol, and health thresholds.
//!
//! # Examples
//!
//! Describing a network server:
//!
//! ```
//! use mcp_manager::config::ServerConfig;
//! use mcp_manager::transport::TransportMode;
//!
//! let config = ServerConfig::new("web", "python")
//!     .with_args(["-m", "server", "--port", "{port}"])
//!     .with_transport(TransportMode::Network, Some(9000))
//!     .with_env("LOG_LEVEL", "debug");
//!
//! assert_eq!(config.resolved_args(Some(9000), TransportMode::Network)[3], "9000");
//! ```
//!
//! Loading manager settings:
//!
//! ```no_run
//! use mcp_manager::config::ManagerConfig;
//!
//! let config = ManagerConfig::from_file("manager.json").unwrap();
//! println!("Registry lives in {}", config.home.display());
//! ```
mod parser;
pub mod validator;

pub use parser::{HealthSettings, ManagerConfig, ServerConfig, DEFAULT_HOST};
pub use validator::{validate_manager_config, validate_server_config, validate_server_name};
