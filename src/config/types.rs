//! Configuration types for tproxy-door
//!
//! Configuration is loaded from JSON files and validated at startup.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::destination::{Address, Network};
use crate::error::ConfigError;
use crate::io::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Idle timeout applied when `door.timeout` is zero
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub listen: ListenConfig,

    /// Door (destination and idle policy) configuration
    pub door: DoorConfig,

    /// Connection limits and buffers
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.door.validate()?;
        self.connection.validate()?;
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            listen: ListenConfig::default(),
            door: DoorConfig::follow_redirect(vec![Network::Tcp]),
            connection: ConnectionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// How the listener learns a connection's original destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    /// Ordinary listener, nothing recovered
    Plain,
    /// NAT redirect, recovered with `SO_ORIGINAL_DST`
    Redirect,
    /// TPROXY, the accepted socket's local address is the original destination
    #[default]
    Tproxy,
}

impl std::fmt::Display for ListenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Plain => "plain",
            Self::Redirect => "redirect",
            Self::Tproxy => "tproxy",
        })
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "127.0.0.1:7893")
    pub address: SocketAddr,

    /// Listener mode
    #[serde(default)]
    pub mode: ListenMode,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Enable SO_REUSEPORT
    #[serde(default = "default_true")]
    pub reuse_port: bool,
}

impl ListenConfig {
    /// Validate listen configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::validation("listen.backlog must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 7893)),
            mode: ListenMode::default(),
            backlog: default_backlog(),
            reuse_port: true,
        }
    }
}

/// Destination and idle policy of the door
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DoorConfig {
    /// Networks this door accepts (must not be empty)
    #[serde(default)]
    pub networks: Vec<Network>,

    /// Predefined destination address
    #[serde(default)]
    pub address: Option<String>,

    /// Predefined destination port
    #[serde(default)]
    pub port: u16,

    /// Idle timeout in seconds; 0 selects the default of two minutes
    #[serde(default)]
    pub timeout: u64,

    /// Prefer the destination recovered from the redirected socket
    #[serde(default)]
    pub follow_redirect: bool,
}

impl DoorConfig {
    /// Door with a fixed destination
    #[must_use]
    pub fn fixed(networks: Vec<Network>, address: impl Into<String>, port: u16) -> Self {
        Self {
            networks,
            address: Some(address.into()),
            port,
            timeout: 0,
            follow_redirect: false,
        }
    }

    /// Door that routes to whatever destination the listener recovered
    #[must_use]
    pub const fn follow_redirect(networks: Vec<Network>) -> Self {
        Self {
            networks,
            address: None,
            port: 0,
            timeout: 0,
            follow_redirect: true,
        }
    }

    /// Set the idle timeout in seconds
    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Validate door configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if no network is listed, a
    /// listed network is `unknown`, or the address is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(ConfigError::validation("door.networks: no network specified"));
        }
        if self.networks.contains(&Network::Unknown) {
            return Err(ConfigError::validation(
                "door.networks: 'unknown' is not an accepted network",
            ));
        }
        if matches!(self.address.as_deref(), Some(a) if a.trim().is_empty()) {
            return Err(ConfigError::validation("door.address must not be empty"));
        }
        Ok(())
    }

    /// Parsed predefined address
    #[must_use]
    pub fn predefined_address(&self) -> Option<Address> {
        self.address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .and_then(|a| a.parse().ok())
    }

    /// Effective idle timeout
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        if self.timeout == 0 {
            DEFAULT_IDLE_TIMEOUT
        } else {
            Duration::from_secs(self.timeout)
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

/// Connection limits and buffer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connect timeout toward the destination in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum bytes read from a stream per chunk
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Bytes a session pipe may hold before writers wait
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Graceful shutdown drain timeout in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "connection.max_connections must be greater than 0",
            ));
        }
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::ValidationError(format!(
                "connection.buffer_size must be between {MIN_BUFFER_SIZE} and {MAX_BUFFER_SIZE}"
            )));
        }
        if self.pipe_capacity < self.buffer_size {
            return Err(ConfigError::validation(
                "connection.pipe_capacity must be at least connection.buffer_size",
            ));
        }
        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get drain timeout as Duration
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            buffer_size: default_buffer_size(),
            pipe_capacity: default_pipe_capacity(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_backlog() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_max_connections() -> usize {
    65536
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    crate::io::DEFAULT_BUFFER_SIZE
}

fn default_pipe_capacity() -> usize {
    crate::session::DEFAULT_PIPE_CAPACITY
}

fn default_drain_timeout_secs() -> u64 {
    30
}
