//! Configuration loading tests
//!
//! Loads configuration files from disk and builds the runtime pieces from
//! them the same way the binary does.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use tproxy_door::config::{create_default_config, load_config, ListenMode, DEFAULT_IDLE_TIMEOUT};
use tproxy_door::destination::{Address, Network};
use tproxy_door::door::DoorHandler;
use tproxy_door::error::ConfigError;
use tproxy_door::session::DirectDispatcher;
use tproxy_door::tproxy::DoorListener;

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_fixed_door_from_file() {
    let file = write_config(
        r#"{
            "listen": { "address": "127.0.0.1:0", "mode": "plain", "reuse_port": false },
            "door": {
                "networks": ["tcp"],
                "address": "example.com",
                "port": 443,
                "timeout": 30
            },
            "connection": { "max_connections": 64, "connect_timeout_secs": 3 },
            "log": { "level": "debug", "format": "json" }
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.listen.mode, ListenMode::Plain);
    assert_eq!(config.door.networks, vec![Network::Tcp]);
    assert_eq!(
        config.door.predefined_address(),
        Some(Address::Domain("example.com".into()))
    );
    assert_eq!(config.door.idle_timeout(), Duration::from_secs(30));
    assert!(!config.door.follow_redirect);
    assert_eq!(config.connection.max_connections, 64);
    assert_eq!(config.log.format, "json");

    let handler = DoorHandler::new(config.door.clone()).unwrap();
    assert_eq!(handler.networks(), &[Network::Tcp]);

    let dispatcher =
        DirectDispatcher::new(&config.connection).with_idle_timeout(config.door.idle_timeout());
    assert_eq!(dispatcher.connect_timeout(), Duration::from_secs(3));
    assert_eq!(dispatcher.idle_timeout(), Duration::from_secs(30));

    let listener = DoorListener::bind(&config.listen).unwrap();
    assert_eq!(listener.mode(), ListenMode::Plain);
    assert_ne!(listener.listen_addr().port(), 0);
}

#[test]
fn test_follow_redirect_defaults() {
    let file = write_config(
        r#"{
            "listen": { "address": "0.0.0.0:7893" },
            "door": { "networks": ["tcp"], "follow_redirect": true }
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.listen.mode, ListenMode::Tproxy);
    assert!(config.door.follow_redirect);
    assert!(config.door.address.is_none());
    assert_eq!(config.door.port, 0);
    assert_eq!(config.door.idle_timeout(), DEFAULT_IDLE_TIMEOUT);
}

#[test]
fn test_generated_config_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    create_default_config(&path).unwrap();
    let config = load_config(&path).unwrap();

    assert!(config.door.follow_redirect);
    assert_eq!(config.door.networks, vec![Network::Tcp]);
    assert!(DoorHandler::new(config.door).is_ok());
}

#[test]
fn test_empty_networks_rejected() {
    let file = write_config(
        r#"{
            "listen": { "address": "127.0.0.1:7893" },
            "door": { "networks": [], "address": "10.0.0.1", "port": 80 }
        }"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
    assert!(err.to_string().contains("no network specified"));
}

#[test]
fn test_malformed_json_rejected() {
    let file = write_config(r#"{ "door": { "networks": ["tcp"] "#);

    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn test_missing_file() {
    let err = load_config("/nonexistent/tproxy-door/config.json").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}
