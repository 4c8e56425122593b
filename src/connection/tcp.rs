//! TCP connection handling
//!
//! Runs one accepted connection through the [`DoorHandler`] and reports how
//! it ended.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::stats::{ConnectionStats, FailureKind};
use crate::destination::Network;
use crate::door::DoorHandler;
use crate::error::ConnectionError;
use crate::io::CopyResult;
use crate::session::Dispatcher;
use crate::tproxy::AcceptedConnection;

/// Context for handling a TCP connection
pub struct TcpConnectionContext {
    /// The accepted connection
    pub conn: AcceptedConnection,

    /// Door terminating the connection
    pub handler: Arc<DoorHandler>,

    /// Dispatcher opening sessions
    pub dispatcher: Arc<dyn Dispatcher>,

    /// Cancelled on shutdown
    pub shutdown: CancellationToken,
}

/// Result of handling a TCP connection
#[derive(Debug)]
pub struct TcpConnectionResult {
    /// Client address
    pub client_addr: SocketAddr,
    /// Original destination recovered by the listener
    pub original_dst: Option<SocketAddr>,
    /// Copy result (bytes transferred)
    pub copy_result: Option<CopyResult>,
    /// Error if the connection failed
    pub error: Option<ConnectionError>,
}

/// Handle a TCP connection through the door.
pub async fn handle_tcp_connection(ctx: TcpConnectionContext) -> TcpConnectionResult {
    let client_addr = ctx.conn.client_addr();
    let original_dst = ctx.conn.original_dst();
    let (stream, context) = ctx.conn.into_parts();

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", client_addr, e);
    }

    let outcome = ctx
        .handler
        .process(
            &ctx.shutdown,
            Network::Tcp,
            stream,
            context,
            ctx.dispatcher.as_ref(),
        )
        .await;

    let mut result = TcpConnectionResult {
        client_addr,
        original_dst,
        copy_result: None,
        error: None,
    };

    match outcome {
        Ok(copy_result) => {
            info!(
                "Connection closed: {}, {} up / {} down bytes",
                client_addr, copy_result.client_to_upstream, copy_result.upstream_to_client
            );
            result.copy_result = Some(copy_result);
        }
        Err(e) => {
            if e.is_timeout() {
                warn!("Connection from {} idle for too long: {}", client_addr, e);
            } else {
                debug!("Connection from {} ended with error: {}", client_addr, e);
            }
            result.error = Some(e);
        }
    }

    result
}

/// Spawn a task to handle a TCP connection with proper instrumentation
pub fn spawn_tcp_handler(
    ctx: TcpConnectionContext,
    stats: Arc<ConnectionStats>,
) -> tokio::task::JoinHandle<()> {
    let span = tracing::info_span!(
        "tcp_connection",
        client = %ctx.conn.client_addr(),
        dst = ?ctx.conn.original_dst(),
    );

    tokio::spawn(
        async move {
            let result = handle_tcp_connection(ctx).await;

            match (result.copy_result, &result.error) {
                (Some(copied), _) => stats.record_completed(copied),
                (None, Some(e)) => stats.record_failure(e),
                (None, None) => stats.record_failure_kind(FailureKind::Interrupted),
            }
        }
        .instrument(span),
    )
}
