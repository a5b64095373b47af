use assert_fs::prelude::*;
use mcp_manager::config::{
    validate_manager_config, validate_server_config, ManagerConfig, ServerConfig,
};
use mcp_manager::error::{Error, Result};
use mcp_manager::transport::TransportMode;
use std::time::Duration;

#[test]
fn test_parse_manager_config_file() -> Result<()> {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("manager.json");
    file.write_str(
        r#"{
            "home": "/srv/mcp",
            "stop_timeout_secs": 3,
            "health": {
                "memory_warning_mb": 128.0,
                "log_error_markers": ["FATAL"]
            }
        }"#,
    )
    .unwrap();

    let config = ManagerConfig::from_file(file.path())?;

    assert_eq!(config.home.to_str(), Some("/srv/mcp"));
    assert_eq!(config.stop_timeout(), Duration::from_secs(3));
    assert_eq!(config.kill_timeout(), Duration::from_secs(2));
    assert_eq!(config.health.memory_warning_mb, 128.0);
    assert_eq!(config.health.memory_critical_mb, 1024.0);
    assert_eq!(config.health.log_error_markers, vec!["FATAL"]);
    validate_manager_config(&config)?;

    Ok(())
}

#[test]
fn test_malformed_config_is_a_parse_error() {
    let result = ManagerConfig::parse_from_str(r#"{ "stop_timeout_secs": "soon" }"#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));

    let result = ManagerConfig::from_file("/definitely/missing/manager.json");
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_inverted_thresholds_are_rejected() {
    let mut config = ManagerConfig::with_home("/tmp/mgr");
    config.health.memory_warning_mb = 2048.0;
    assert!(matches!(
        validate_manager_config(&config),
        Err(Error::ConfigInvalid(_))
    ));

    let mut config = ManagerConfig::with_home("/tmp/mgr");
    config.stop_timeout_secs = 0;
    assert!(validate_manager_config(&config).is_err());
}

#[test]
fn test_server_config_json_round_trip() -> Result<()> {
    let config = ServerConfig::new("web", "python")
        .with_args(["-m", "server", "--port", "{port}"])
        .with_transport(TransportMode::Network, Some(9000))
        .with_env("LOG_LEVEL", "debug");

    let json = serde_json::to_string(&config).map_err(|e| Error::Serialization(e.to_string()))?;
    let parsed: ServerConfig =
        serde_json::from_str(&json).map_err(|e| Error::Serialization(e.to_string()))?;

    assert_eq!(parsed, config);
    assert!(json.contains(r#""transport":"network""#));
    validate_server_config(&parsed)?;

    Ok(())
}

#[test]
fn test_empty_command_is_rejected() {
    let config = ServerConfig::new("echo", "  ");
    assert!(matches!(
        validate_server_config(&config),
        Err(Error::ConfigInvalid(_))
    ));
}
