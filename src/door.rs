//! Connection terminator
//!
//! [`DoorHandler`] takes an accepted client connection, resolves where it
//! should go, asks a [`Dispatcher`] for a session toward that destination and
//! relays bytes both ways until both directions end, one of them fails or the
//! connection stays idle past the configured timeout.
//!
//! # Failure propagation
//!
//! The uplink (client → session) and downlink (session → client) run as two
//! tasks in a [`JoinSet`]. The first failure error-closes both session halves
//! and cancels the connection token, which unblocks the other direction
//! wherever it is waiting. Both tasks are always joined before returning.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DoorConfig;
use crate::destination::{Destination, Network};
use crate::error::{ConfigError, ConnectionError, Direction, TransportError};
use crate::io::{
    cancel_after_inactivity, pipe_until_eof, CopyResult, StreamReader, StreamWriter,
    DEFAULT_BUFFER_SIZE,
};
use crate::resolver::resolve_destination;
use crate::session::Dispatcher;

/// Per-connection facts supplied by the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundContext {
    /// Client address
    pub source: SocketAddr,
    /// Destination recovered from the redirected socket, if any
    pub original_destination: Option<Destination>,
}

impl InboundContext {
    /// Context with no recovered destination
    #[must_use]
    pub const fn new(source: SocketAddr) -> Self {
        Self {
            source,
            original_destination: None,
        }
    }

    /// Attach the recovered destination
    #[must_use]
    pub fn with_original_destination(mut self, destination: Destination) -> Self {
        self.original_destination = Some(destination);
        self
    }
}

/// Terminates client connections toward a configured or recovered destination
#[derive(Debug, Clone)]
pub struct DoorHandler {
    config: DoorConfig,
    buffer_size: usize,
}

impl DoorHandler {
    /// Create a handler
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid, e.g. lists no
    /// network.
    pub fn new(config: DoorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            buffer_size: DEFAULT_BUFFER_SIZE,
        })
    }

    /// Set the per-read chunk size used on the client stream
    #[must_use]
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Networks this door accepts
    #[must_use]
    pub fn networks(&self) -> &[Network] {
        &self.config.networks
    }

    /// Door configuration
    #[must_use]
    pub const fn config(&self) -> &DoorConfig {
        &self.config
    }

    /// Relay `conn` to its destination until the connection ends.
    ///
    /// `shutdown` is the parent of the connection token; cancelling it tears
    /// the connection down like any other transport failure.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidDestination` if no usable destination could
    ///   be resolved; the dispatcher is not called.
    /// - `ConnectionError::Dispatch` if the session could not be opened.
    /// - `ConnectionError::Transport` for the first direction that failed,
    ///   including idle timeouts and shutdown.
    pub async fn process<C>(
        &self,
        shutdown: &CancellationToken,
        network: Network,
        conn: C,
        context: InboundContext,
        dispatcher: &dyn Dispatcher,
    ) -> Result<CopyResult, ConnectionError>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
    {
        let destination =
            resolve_destination(&self.config, network, context.original_destination)?;

        let (cancel, timer) = cancel_after_inactivity(shutdown, self.config.idle_timeout());

        debug!(
            "Dispatching {} from {} via {}",
            destination,
            context.source,
            dispatcher.name()
        );
        let session = dispatcher.dispatch(&cancel, &destination).await?;

        let start = Instant::now();
        let (client_read, client_write) = tokio::io::split(conn);
        let mut tasks = JoinSet::new();
        let mut directions = HashMap::with_capacity(2);

        {
            let mut reader = StreamReader::with_chunk_size(client_read, self.buffer_size);
            let mut writer = session.ingress.clone();
            let cancel = cancel.clone();
            let timer = timer.clone();
            let handle = tasks.spawn(async move {
                pipe_until_eof(&mut reader, &mut writer, &cancel, Some(&timer)).await
            });
            directions.insert(handle.id(), Direction::Request);
        }
        {
            let mut reader = session.egress.clone();
            let mut writer = StreamWriter::new(client_write);
            let cancel = cancel.clone();
            let timer = timer.clone();
            let handle = tasks.spawn(async move {
                pipe_until_eof(&mut reader, &mut writer, &cancel, Some(&timer)).await
            });
            directions.insert(handle.id(), Direction::Response);
        }

        let mut result = CopyResult::default();
        let mut failure: Option<(Direction, io::Error)> = None;

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(io::Error::other(e))),
            };
            let Some(&direction) = directions.get(&id) else {
                continue;
            };

            match outcome {
                Ok(bytes) => match direction {
                    Direction::Request => result.client_to_upstream = bytes,
                    Direction::Response => result.upstream_to_client = bytes,
                },
                Err(e) => {
                    if failure.is_none() {
                        session.close_error();
                        cancel.cancel();
                        failure = Some((direction, e));
                    }
                }
            }
        }

        // Keep the watchdog alive until both directions are done
        drop(timer);

        if let Some((direction, source)) = failure {
            debug!(
                "Connection to {} failed in {} direction after {:?}: {}",
                destination,
                direction,
                start.elapsed(),
                source
            );
            return Err(TransportError::new(direction, source).into());
        }

        debug!(
            "Connection to {} finished: {} bytes up, {} bytes down in {:?}",
            destination,
            result.client_to_upstream,
            result.upstream_to_client,
            start.elapsed()
        );
        Ok(result)
    }
}
