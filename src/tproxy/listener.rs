//! Door TCP listener
//!
//! Accepts client connections and recovers their original destination
//! according to the configured [`ListenMode`].

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::connection::AcceptedConnection;
use super::socket::{create_listener_socket, get_original_dst, get_original_dst_v6};
use crate::config::{ListenConfig, ListenMode};
use crate::error::TproxyError;

/// TCP listener feeding the door
#[derive(Debug)]
pub struct DoorListener {
    /// The underlying tokio TCP listener
    listener: TcpListener,

    /// Bound address
    listen_addr: SocketAddr,

    /// How original destinations are recovered
    mode: ListenMode,
}

impl DoorListener {
    /// Create and bind a listener.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError` if:
    /// - Socket creation fails
    /// - Binding fails
    /// - `CAP_NET_ADMIN` capability is missing in TPROXY mode
    pub fn bind(config: &ListenConfig) -> Result<Self, TproxyError> {
        info!("Creating {} listener on {}", config.mode, config.address);

        let socket = create_listener_socket(config.address, config.mode, config.reuse_port)?;

        socket
            .bind(&config.address.into())
            .map_err(|e| TproxyError::BindError {
                addr: config.address,
                reason: e.to_string(),
            })?;

        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
        socket
            .listen(backlog)
            .map_err(|e| TproxyError::socket_option("listen", e.to_string()))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| TproxyError::SocketCreation(e.to_string()))?;
        let listen_addr = listener.local_addr()?;

        info!(
            "{} listener ready on {} (backlog={})",
            config.mode, listen_addr, config.backlog
        );

        Ok(Self {
            listener,
            listen_addr,
            mode: config.mode,
        })
    }

    /// Wrap an already bound tokio listener
    #[must_use]
    pub fn from_listener(listener: TcpListener, mode: ListenMode) -> Self {
        let listen_addr = listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        Self {
            listener,
            listen_addr,
            mode,
        }
    }

    /// Accept the next connection.
    ///
    /// A destination that cannot be recovered is logged and left absent; it
    /// is not an accept failure.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError::AcceptError` if accept fails.
    pub async fn accept(&self) -> Result<AcceptedConnection, TproxyError> {
        let (stream, client_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TproxyError::AcceptError(e.to_string()))?;

        let original_dst = self.recover_destination(&stream);
        debug!(
            "Accepted connection from {} (original destination: {:?})",
            client_addr, original_dst
        );

        Ok(AcceptedConnection::new(stream, client_addr, original_dst))
    }

    fn recover_destination(&self, stream: &TcpStream) -> Option<SocketAddr> {
        let recovered = match self.mode {
            ListenMode::Plain => return None,
            ListenMode::Tproxy => stream.local_addr().map_err(TproxyError::from),
            ListenMode::Redirect => {
                let fd = stream.as_raw_fd();
                match stream.local_addr() {
                    Ok(SocketAddr::V6(_)) => get_original_dst_v6(fd),
                    Ok(SocketAddr::V4(_)) => get_original_dst(fd),
                    Err(e) => Err(e.into()),
                }
            }
        };

        match recovered {
            Ok(addr) => Some(addr),
            Err(e) => {
                debug!("Failed to recover original destination: {}", e);
                None
            }
        }
    }

    /// Get the bound address
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Get the listener mode
    #[must_use]
    pub const fn mode(&self) -> ListenMode {
        self.mode
    }
}
