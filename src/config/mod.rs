//! Configuration module for tproxy-door
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use tproxy_door::config::load_config;
//!
//! let config = load_config("/etc/tproxy-door/config.json").unwrap();
//! println!("Follow redirect: {}", config.door.follow_redirect);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, ConnectionConfig, DoorConfig, ListenConfig, ListenMode, LogConfig,
    DEFAULT_IDLE_TIMEOUT,
};
