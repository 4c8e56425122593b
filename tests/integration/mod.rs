//! Integration tests for tproxy-door
//!
//! These tests run the door over real loopback sockets.
//!
//! # Test Organization
//!
//! - `door_e2e`: listener → manager → door → direct dispatcher → upstream
//! - `config_loading`: configuration files through to a running handler
//!
//! # Test Requirements
//!
//! - Tests only use loopback sockets and need no privileges
//! - TPROXY and NAT redirect paths need iptables and are covered by unit
//!   tests of the listener modes instead

pub mod config_loading;
pub mod door_e2e;
