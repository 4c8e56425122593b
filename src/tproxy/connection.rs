//! Accepted connection representation
//!
//! [`AcceptedConnection`] wraps an accepted TCP stream with the client
//! address and, when the listener could recover it, the destination the
//! client originally connected to.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::destination::Destination;
use crate::door::InboundContext;

/// A TCP connection accepted by the door's listener
#[derive(Debug)]
pub struct AcceptedConnection {
    /// The underlying TCP stream
    stream: TcpStream,

    /// Client's address (source)
    client_addr: SocketAddr,

    /// Where the client wanted to connect, if recovered
    original_dst: Option<SocketAddr>,

    /// When the connection was accepted
    accepted_at: Instant,
}

impl AcceptedConnection {
    /// Wrap an accepted stream
    #[must_use]
    pub fn new(stream: TcpStream, client_addr: SocketAddr, original_dst: Option<SocketAddr>) -> Self {
        Self {
            stream,
            client_addr,
            original_dst,
            accepted_at: Instant::now(),
        }
    }

    /// Wrap an accepted stream with a known destination.
    ///
    /// Useful for tests or when the destination is known by other means.
    #[must_use]
    pub fn with_destination(
        stream: TcpStream,
        client_addr: SocketAddr,
        original_dst: SocketAddr,
    ) -> Self {
        Self::new(stream, client_addr, Some(original_dst))
    }

    /// Get the underlying TCP stream
    #[must_use]
    pub const fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Get the client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Get the recovered original destination
    #[must_use]
    pub const fn original_dst(&self) -> Option<SocketAddr> {
        self.original_dst
    }

    /// Get when the connection was accepted
    #[must_use]
    pub const fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Get the connection age
    #[must_use]
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Split into the stream and the context the door consumes
    #[must_use]
    pub fn into_parts(self) -> (TcpStream, InboundContext) {
        let mut context = InboundContext::new(self.client_addr);
        if let Some(dst) = self.original_dst {
            context = context.with_original_destination(Destination::tcp(dst));
        }
        (self.stream, context)
    }
}
