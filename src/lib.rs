//! tproxy-door: transparent-proxy connection terminator
//!
//! This crate accepts client connections whose real destination is either
//! configured statically or recovered from the platform (TPROXY or NAT
//! redirect), opens a session toward that destination through a
//! [`Dispatcher`](session::Dispatcher) and relays bytes both ways until the
//! session ends, either side fails or the connection goes idle.
//!
//! # Features
//!
//! - **Destination policy**: fixed address/port or follow the redirect
//! - **Inactivity timeout**: one timer shared by both directions
//! - **Failure propagation**: the first failing direction error-closes the
//!   session and unblocks the other
//! - **Listener**: plain, `SO_ORIGINAL_DST` redirect and `IP_TRANSPARENT` modes
//! - **Connection management**: backpressure, statistics and graceful shutdown
//!
//! # Architecture
//!
//! ```text
//! Client → iptables → DoorListener → DoorHandler ──▶ Session ──▶ Dispatcher → Destination
//!                                        │   uplink / downlink
//!                                        └── ActivityTimer
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tproxy_door::config::load_config;
//! use tproxy_door::connection::{run_accept_loop, ConnectionManager};
//! use tproxy_door::door::DoorHandler;
//! use tproxy_door::session::DirectDispatcher;
//! use tproxy_door::tproxy::DoorListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/tproxy-door/config.json")?;
//!
//! let handler = Arc::new(DoorHandler::new(config.door.clone())?);
//! let dispatcher = Arc::new(
//!     DirectDispatcher::new(&config.connection).with_idle_timeout(config.door.idle_timeout()),
//! );
//! let manager = Arc::new(ConnectionManager::new(&config.connection, handler, dispatcher));
//!
//! let listener = DoorListener::bind(&config.listen)?;
//! run_accept_loop(listener, manager).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Connection management and statistics
//! - [`destination`]: Destination types
//! - [`door`]: The connection terminator
//! - [`error`]: Error types
//! - [`io`]: Relay loop, chunk adapters and inactivity timer
//! - [`resolver`]: Destination resolution
//! - [`session`]: Sessions, pipes and dispatchers
//! - [`tproxy`]: Listener sockets and original destination recovery

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod destination;
pub mod door;
pub mod error;
pub mod io;
pub mod resolver;
pub mod session;
pub mod tproxy;

// Re-export commonly used types at the crate root
pub use config::{Config, DoorConfig, ListenConfig};
pub use connection::{ConnectionManager, ConnectionStats};
pub use destination::{Address, Destination, Network};
pub use door::{DoorHandler, InboundContext};
pub use error::{
    ConfigError, ConnectionError, Direction, DispatchError, DoorError, IdleTimeout, TproxyError,
    TransportError,
};
pub use io::CopyResult;
pub use session::{DirectDispatcher, Dispatcher, Session};
pub use tproxy::{AcceptedConnection, DoorListener};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
