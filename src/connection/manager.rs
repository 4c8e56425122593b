//! Connection Manager
//!
//! Centralized connection management:
//! - Connection limiting via semaphore-based backpressure
//! - Graceful shutdown through a root cancellation token and draining
//! - Statistics collection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stats::{ConnectionStats, FailureKind, StatsSnapshot};
use super::tcp::{spawn_tcp_handler, TcpConnectionContext};
use crate::config::ConnectionConfig;
use crate::door::DoorHandler;
use crate::error::{ConnectionError, DoorError};
use crate::session::Dispatcher;
use crate::tproxy::{AcceptedConnection, DoorListener};

/// Connection manager for handling concurrent connections
pub struct ConnectionManager {
    /// Semaphore for connection limiting
    semaphore: Arc<Semaphore>,

    /// Maximum connections allowed
    max_connections: usize,

    /// Connection statistics
    stats: Arc<ConnectionStats>,

    /// Door terminating every connection
    handler: Arc<DoorHandler>,

    /// Dispatcher opening sessions
    dispatcher: Arc<dyn Dispatcher>,

    /// Drain timeout for graceful shutdown
    drain_timeout: Duration,

    /// Parent of every connection token
    shutdown: CancellationToken,

    /// Whether shutdown has been initiated
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(
        config: &ConnectionConfig,
        handler: Arc<DoorHandler>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            stats: Arc::new(ConnectionStats::new()),
            handler,
            dispatcher,
            drain_timeout: config.drain_timeout(),
            shutdown: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Handle a new connection with backpressure
    ///
    /// Acquires a permit before spawning the connection task, so no more than
    /// `max_connections` connections run at once.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::ShuttingDown` during shutdown and
    /// `ConnectionError::LimitReached` when no permit is available.
    pub fn handle_connection(&self, conn: AcceptedConnection) -> Result<(), ConnectionError> {
        if self.is_shutting_down() {
            self.stats.record_rejected();
            return Err(ConnectionError::ShuttingDown);
        }

        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            self.stats.record_rejected();
            let current = self.active_connections();
            warn!(
                "Connection limit reached ({}/{}), rejecting connection from {}",
                current,
                self.max_connections,
                conn.client_addr()
            );
            return Err(ConnectionError::limit_reached(current, self.max_connections));
        };

        self.stats.record_accepted();

        debug!(
            "Accepted connection from {} (active: {}/{})",
            conn.client_addr(),
            self.stats.active(),
            self.max_connections
        );

        let ctx = TcpConnectionContext {
            conn,
            handler: Arc::clone(&self.handler),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: self.shutdown.clone(),
        };
        let stats = Arc::clone(&self.stats);
        let handle = spawn_tcp_handler(ctx, Arc::clone(&stats));

        tokio::spawn(async move {
            // Hold the permit until the connection is done
            let _permit = permit;
            if let Err(e) = handle.await {
                warn!("Connection task failed: {}", e);
                // A panicked handler never reported its outcome
                stats.record_failure_kind(FailureKind::Interrupted);
            }
        });

        Ok(())
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get a snapshot of current statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Get the configured connection limit
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get current active connection count
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Get available connection slots
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Check if at capacity
    #[must_use]
    pub fn at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Token cancelled when shutdown starts
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Initiate graceful shutdown
    ///
    /// Stops accepting connections, cancels every running connection and
    /// waits up to the drain timeout for their tasks to finish.
    pub async fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        info!("Initiating connection manager shutdown");
        self.shutdown.cancel();

        let drain_start = tokio::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        while drain_start.elapsed() < self.drain_timeout {
            let active = self.active_connections();
            if active == 0 {
                info!("All connections drained");
                return;
            }

            debug!(
                "Waiting for {} connections to drain ({:.1}s remaining)",
                active,
                self.drain_timeout
                    .saturating_sub(drain_start.elapsed())
                    .as_secs_f64()
            );

            tokio::time::sleep(check_interval).await;
        }

        let remaining = self.active_connections();
        if remaining > 0 {
            warn!(
                "Drain timeout reached with {} connections still active",
                remaining
            );
        }
    }

    /// Check if shutting down
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}

/// Run the connection accept loop
///
/// Accepts connections from `listener` and hands them to `manager` until the
/// manager shuts down.
///
/// # Errors
///
/// Returns `DoorError::Tproxy` on a non-recoverable accept error.
pub async fn run_accept_loop(
    listener: DoorListener,
    manager: Arc<ConnectionManager>,
) -> Result<(), DoorError> {
    info!(
        "Starting accept loop on {} (max {} connections)",
        listener.listen_addr(),
        manager.max_connections()
    );

    loop {
        let accepted = tokio::select! {
            () = manager.shutdown_token().cancelled() => {
                info!("Accept loop stopping due to shutdown");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(conn) => {
                if let Err(e) = manager.handle_connection(conn) {
                    debug!("Failed to handle connection: {}", e);
                }
            }
            Err(e) if e.is_recoverable() => {
                debug!("Recoverable accept error: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::config::{DoorConfig, ListenMode};
    use crate::destination::{Destination, Network};
    use crate::error::DispatchError;
    use crate::session::{link, Session, SessionPeer};

    /// Sessions stay open and silent until the peers are dropped
    #[derive(Default)]
    struct HoldingDispatcher {
        peers: parking_lot::Mutex<Vec<SessionPeer>>,
    }

    #[async_trait]
    impl Dispatcher for HoldingDispatcher {
        async fn dispatch(
            &self,
            _cancel: &CancellationToken,
            _destination: &Destination,
        ) -> Result<Session, DispatchError> {
            let (session, peer) = link(1024);
            self.peers.lock().push(peer);
            Ok(session)
        }

        fn name(&self) -> &str {
            "holding"
        }
    }

    fn create_test_manager(max_connections: usize) -> ConnectionManager {
        let config = ConnectionConfig {
            max_connections,
            drain_timeout_secs: 5,
            ..ConnectionConfig::default()
        };
        let handler = DoorHandler::new(DoorConfig::fixed(vec![Network::Tcp], "10.0.0.1", 80))
            .unwrap();

        ConnectionManager::new(
            &config,
            Arc::new(handler),
            Arc::new(HoldingDispatcher::default()),
        )
    }

    async fn accepted(listener: &TcpListener) -> (TcpStream, AcceptedConnection) {
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, client_addr) = listener.accept().await.unwrap();
        (client, AcceptedConnection::new(server, client_addr, None))
    }

    #[test]
    fn test_manager_creation() {
        let manager = create_test_manager(10);
        assert_eq!(manager.max_connections(), 10);
        assert_eq!(manager.active_connections(), 0);
        assert_eq!(manager.available_slots(), 10);
        assert!(!manager.at_capacity());
        assert_eq!(manager.stats().total_accepted(), 0);
    }

    #[tokio::test]
    async fn test_limit_rejects_extra_connections() {
        let manager = create_test_manager(1);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (_c1, first) = accepted(&listener).await;
        manager.handle_connection(first).unwrap();
        assert!(manager.at_capacity());

        let (_c2, second) = accepted(&listener).await;
        let err = manager.handle_connection(second).unwrap_err();
        assert!(matches!(err, ConnectionError::LimitReached { current: 1, max: 1 }));
        assert_eq!(manager.stats().rejected(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_connections() {
        let manager = create_test_manager(4);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (mut client, conn) = accepted(&listener).await;
        manager.handle_connection(conn).unwrap();
        assert_eq!(manager.active_connections(), 1);

        manager.shutdown().await;
        assert!(manager.is_shutting_down());
        assert_eq!(manager.active_connections(), 0);
        assert_eq!(manager.stats().errored(), 1);
        assert_eq!(manager.stats().failures(FailureKind::Interrupted), 1);

        // The client side sees the connection closed
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        // Double shutdown should be safe
        manager.shutdown().await;

        let (_c, late) = accepted(&listener).await;
        assert!(matches!(
            manager.handle_connection(late),
            Err(ConnectionError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_accept_loop_stops_on_shutdown() {
        let manager = Arc::new(create_test_manager(4));
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = DoorListener::from_listener(inner, ListenMode::Plain);
        let addr = listener.listen_addr();

        let accept_loop = tokio::spawn(run_accept_loop(listener, Arc::clone(&manager)));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        while manager.stats().total_accepted() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        manager.shutdown().await;
        accept_loop.await.unwrap().unwrap();
        assert_eq!(manager.stats().total_accepted(), 1);
    }
}
