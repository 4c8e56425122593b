//! Direct dispatcher
//!
//! Opens sessions by connecting straight to the destination over TCP and
//! bridging the socket to the session pipes until both directions end. The
//! bridge carries its own inactivity timer, so a destination that stops
//! reading cannot pin it after the door has let go of the session.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{link, Session, SessionPeer, DEFAULT_PIPE_CAPACITY};
use crate::config::{ConnectionConfig, DEFAULT_IDLE_TIMEOUT};
use crate::destination::{Address, Destination, Network};
use crate::error::DispatchError;
use crate::io::{
    cancel_after_inactivity, pipe_until_eof, StreamReader, StreamWriter, DEFAULT_BUFFER_SIZE,
};

/// Dispatcher that connects directly to the destination
#[derive(Debug, Clone)]
pub struct DirectDispatcher {
    connect_timeout: Duration,
    idle_timeout: Duration,
    buffer_size: usize,
    pipe_capacity: usize,
}

impl DirectDispatcher {
    /// Create a dispatcher from connection settings
    #[must_use]
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            buffer_size: config.buffer_size,
            pipe_capacity: config.pipe_capacity,
        }
    }

    /// Set how long a bridged socket may go without moving a byte
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Get the connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Get the bridge idle timeout
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    async fn resolve(&self, destination: &Destination) -> Result<Vec<SocketAddr>, DispatchError> {
        let port = destination.port;
        match &destination.address {
            Some(Address::Ip(ip)) => Ok(vec![SocketAddr::new(*ip, port)]),
            Some(Address::Domain(domain)) => {
                let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain.as_str(), port))
                    .await
                    .map_err(|e| DispatchError::connect_failed(destination, e.to_string()))?
                    .collect();
                if addrs.is_empty() {
                    return Err(DispatchError::connect_failed(
                        destination,
                        "no addresses resolved",
                    ));
                }
                Ok(addrs)
            }
            None => Err(DispatchError::connect_failed(destination, "no address")),
        }
    }

    async fn connect(&self, destination: &Destination) -> Result<TcpStream, DispatchError> {
        let mut last_error = None;
        for addr in self.resolve(destination).await? {
            match connect_socket(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(DispatchError::connect_failed(
            destination,
            last_error.map_or_else(|| "no usable address".to_string(), |e| e.to_string()),
        ))
    }
}

impl Default for DirectDispatcher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

#[async_trait]
impl super::Dispatcher for DirectDispatcher {
    async fn dispatch(
        &self,
        cancel: &CancellationToken,
        destination: &Destination,
    ) -> Result<Session, DispatchError> {
        if destination.network != Network::Tcp {
            return Err(DispatchError::UnsupportedNetwork(destination.network));
        }

        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DispatchError::Cancelled),
            connected = timeout(self.connect_timeout, self.connect(destination)) => match connected {
                Ok(result) => result?,
                Err(_) => {
                    return Err(DispatchError::Timeout {
                        destination: destination.to_string(),
                        timeout_secs: self.connect_timeout.as_secs(),
                    })
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        debug!("Direct connection to {} established", destination);

        let (session, peer) = link(self.pipe_capacity);
        tokio::spawn(bridge(
            stream,
            peer,
            cancel.child_token(),
            self.idle_timeout,
            self.buffer_size,
            destination.to_string(),
        ));
        Ok(session)
    }

    fn name(&self) -> &str {
        "direct"
    }
}

/// Create a non-blocking socket with keepalive and connect it
async fn connect_socket(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    // 60s idle before first probe, 15s between probes
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(15));
    socket.set_tcp_keepalive(&keepalive)?;

    // EINPROGRESS is expected for non-blocking sockets
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(e),
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream)?;

    stream.writable().await?;
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    Ok(stream)
}

/// Relay between the socket and the peer pipes until both directions end or
/// nothing moves for `idle_timeout`.
async fn bridge(
    stream: TcpStream,
    peer: SessionPeer,
    cancel: CancellationToken,
    idle_timeout: Duration,
    buffer_size: usize,
    destination: String,
) {
    let (cancel, timer) = cancel_after_inactivity(&cancel, idle_timeout);
    let (read_half, write_half) = stream.into_split();
    let mut upstream_reader = StreamReader::with_chunk_size(read_half, buffer_size);
    let mut upstream_writer = StreamWriter::new(write_half);
    let mut requests = peer.requests.clone();
    let mut responses = peer.responses.clone();

    let fail = |direction: &str, e: &io::Error| {
        debug!("Direct {} to {} failed: {}", direction, destination, e);
        peer.close_error();
        cancel.cancel();
    };

    let outbound = async {
        let result = pipe_until_eof(&mut requests, &mut upstream_writer, &cancel, Some(&timer)).await;
        if let Err(ref e) = result {
            fail("upload", e);
        }
        result
    };
    let inbound = async {
        let result = pipe_until_eof(&mut upstream_reader, &mut responses, &cancel, Some(&timer)).await;
        if let Err(ref e) = result {
            fail("download", e);
        }
        result
    };

    if let (Ok(up), Ok(down)) = tokio::join!(outbound, inbound) {
        debug!(
            "Direct session to {} finished: {} up / {} down bytes",
            destination, up, down
        );
    }
}
