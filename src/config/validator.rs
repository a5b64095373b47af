use crate::config::{ManagerConfig, ServerConfig};
use crate::error::{Error, Result};

/// Longest accepted server name.
const MAX_NAME_LEN: usize = 64;

/// Validates a server name.
///
/// Names start with an ASCII letter or digit and continue with letters,
/// digits, `-` or `_`, up to 64 characters. They double as file names for
/// the server's log, so path separators and dots are rejected.
pub fn validate_server_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::ConfigInvalid("Server name is empty".to_string()));
    };

    if !first.is_ascii_alphanumeric() {
        return Err(Error::ConfigInvalid(format!(
            "Server name '{}' must start with a letter or digit",
            name
        )));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(Error::ConfigInvalid(format!(
            "Server name '{}' is longer than {} characters",
            name, MAX_NAME_LEN
        )));
    }

    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
        return Err(Error::ConfigInvalid(format!(
            "Server name '{}' contains invalid character '{}'",
            name, bad
        )));
    }

    Ok(())
}

/// Validates a server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    validate_server_name(&config.name)?;

    if config.command.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has empty command",
            config.name
        )));
    }

    if config.transport.is_network() {
        match config.port {
            None => {
                return Err(Error::ConfigInvalid(format!(
                    "Server '{}' uses network transport but has no port",
                    config.name
                )));
            }
            Some(0) => {
                return Err(Error::ConfigInvalid(format!(
                    "Server '{}' has port 0, expected 1-65535",
                    config.name
                )));
            }
            Some(_) => {}
        }
    }

    if config.updated_at < config.created_at {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' was updated before it was created",
            config.name
        )));
    }

    Ok(())
}

/// Validates the manager settings
pub fn validate_manager_config(config: &ManagerConfig) -> Result<()> {
    if config.stop_timeout_secs == 0 || config.kill_timeout_secs == 0 {
        return Err(Error::ConfigInvalid(
            "Stop and kill timeouts must be at least one second".to_string(),
        ));
    }

    if config.history_limit == 0 {
        return Err(Error::ConfigInvalid(
            "Health history limit must be at least 1".to_string(),
        ));
    }

    let health = &config.health;
    if health.probe_timeout_ms == 0 {
        return Err(Error::ConfigInvalid(
            "Probe timeout must be greater than zero".to_string(),
        ));
    }

    if health.memory_warning_mb > health.memory_critical_mb {
        return Err(Error::ConfigInvalid(format!(
            "Memory warning threshold {} MB exceeds critical threshold {} MB",
            health.memory_warning_mb, health.memory_critical_mb
        )));
    }

    if health.cpu_warning_percent > health.cpu_critical_percent {
        return Err(Error::ConfigInvalid(format!(
            "CPU warning threshold {}% exceeds critical threshold {}%",
            health.cpu_warning_percent, health.cpu_critical_percent
        )));
    }

    if health.log_warning_count > health.log_critical_count {
        return Err(Error::ConfigInvalid(format!(
            "Log warning count {} exceeds critical count {}",
            health.log_warning_count, health.log_critical_count
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportMode;

    #[test]
    fn test_name_rules() {
        assert!(validate_server_name("echo").is_ok());
        assert!(validate_server_name("web-2_beta").is_ok());
        assert!(validate_server_name("").is_err());
        assert!(validate_server_name("-web").is_err());
        assert!(validate_server_name("../etc").is_err());
        assert!(validate_server_name("a.b").is_err());
        assert!(validate_server_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_network_requires_port() {
        let config = ServerConfig::new("web", "node").with_transport(TransportMode::Network, None);
        assert!(matches!(
            validate_server_config(&config),
            Err(Error::ConfigInvalid(_))
        ));

        let config = config.with_transport(TransportMode::Network, Some(8080));
        assert!(validate_server_config(&config).is_ok());
    }
}
