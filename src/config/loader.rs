//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: networks={:?}, follow_redirect={}, idle_timeout={}s",
        config.door.networks,
        config.door.follow_redirect,
        config.door.idle_timeout().as_secs()
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `TPROXY_DOOR_LISTEN_ADDR`: Override listen address
/// - `TPROXY_DOOR_LOG_LEVEL`: Override log level
/// - `TPROXY_DOOR_MAX_CONNECTIONS`: Override max connections
/// - `TPROXY_DOOR_IDLE_TIMEOUT`: Override idle timeout (seconds)
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    if let Ok(addr) = std::env::var("TPROXY_DOOR_LISTEN_ADDR") {
        config.listen.address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "TPROXY_DOOR_LISTEN_ADDR".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Ok(level) = std::env::var("TPROXY_DOOR_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(max) = std::env::var("TPROXY_DOOR_MAX_CONNECTIONS") {
        config.connection.max_connections = max.parse().map_err(|_| ConfigError::EnvError {
            name: "TPROXY_DOOR_MAX_CONNECTIONS".into(),
            reason: format!("Invalid number: {max}"),
        })?;
        debug!(
            "Max connections overridden to {}",
            config.connection.max_connections
        );
    }

    if let Ok(secs) = std::env::var("TPROXY_DOOR_IDLE_TIMEOUT") {
        config.door.timeout = secs.parse().map_err(|_| ConfigError::EnvError {
            name: "TPROXY_DOOR_IDLE_TIMEOUT".into(),
            reason: format!("Invalid number of seconds: {secs}"),
        })?;
        debug!("Idle timeout overridden to {}s", config.door.timeout);
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
