//! Connection handling module
//!
//! This module provides connection management, including:
//! - Connection limiting with backpressure
//! - TCP connection handling through the door
//! - Statistics collection
//! - Graceful shutdown

mod manager;
mod stats;
mod tcp;

pub use manager::{run_accept_loop, ConnectionManager};
pub use stats::{ConnectionStats, FailureKind, StatsSnapshot};
pub use tcp::{handle_tcp_connection, spawn_tcp_handler, TcpConnectionContext, TcpConnectionResult};
