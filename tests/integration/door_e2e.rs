//! End-to-end tests for tproxy-door
//!
//! Each test runs the whole data path over loopback:
//! client → `DoorListener` → `ConnectionManager` → `DoorHandler` →
//! `DirectDispatcher` → upstream server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tproxy_door::config::{ConnectionConfig, DoorConfig, ListenConfig, ListenMode};
use tproxy_door::connection::{run_accept_loop, ConnectionManager, FailureKind};
use tproxy_door::destination::Network;
use tproxy_door::door::DoorHandler;
use tproxy_door::error::DoorError;
use tproxy_door::session::DirectDispatcher;
use tproxy_door::tproxy::DoorListener;

// ============================================================================
// Helpers
// ============================================================================

struct RunningDoor {
    addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    accept_loop: JoinHandle<Result<(), DoorError>>,
}

impl RunningDoor {
    async fn stop(self) {
        self.manager.shutdown().await;
        self.accept_loop.await.unwrap().unwrap();
    }
}

fn start_door(door: DoorConfig) -> RunningDoor {
    let connection = ConnectionConfig {
        connect_timeout_secs: 2,
        drain_timeout_secs: 2,
        ..ConnectionConfig::default()
    };
    let listen = ListenConfig {
        address: "127.0.0.1:0".parse().unwrap(),
        mode: ListenMode::Plain,
        backlog: 128,
        reuse_port: false,
    };

    let dispatcher = Arc::new(
        DirectDispatcher::new(&connection).with_idle_timeout(door.idle_timeout()),
    );
    let handler = DoorHandler::new(door)
        .unwrap()
        .with_buffer_size(connection.buffer_size);
    let manager = Arc::new(ConnectionManager::new(
        &connection,
        Arc::new(handler),
        dispatcher,
    ));

    let listener = DoorListener::bind(&listen).unwrap();
    let addr = listener.listen_addr();
    let accept_loop = tokio::spawn(run_accept_loop(listener, Arc::clone(&manager)));

    RunningDoor {
        addr,
        manager,
        accept_loop,
    }
}

/// Upstream that echoes every connection until the client half-closes
async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.into_split();
                if tokio::io::copy(&mut rd, &mut wr).await.is_ok() {
                    let _ = wr.shutdown().await;
                }
            });
        }
    });
    addr
}

/// Upstream that accepts connections and never sends or reads anything
async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn fixed(upstream: SocketAddr) -> DoorConfig {
    DoorConfig::fixed(vec![Network::Tcp], upstream.ip().to_string(), upstream.port())
}

async fn round_trip(door: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let client = TcpStream::connect(door).await.unwrap();
    let (mut rd, mut wr) = client.into_split();
    let payload = payload.to_vec();
    let writer = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr.shutdown().await.unwrap();
    });
    let mut reply = Vec::new();
    rd.read_to_end(&mut reply).await.unwrap();
    writer.await.unwrap();
    reply
}

// ============================================================================
// Data Path
// ============================================================================

#[tokio::test]
async fn test_fixed_destination_echo() {
    let upstream = start_echo_upstream().await;
    let door = start_door(fixed(upstream));

    assert_eq!(round_trip(door.addr, b"ping").await, b"ping");

    let manager = Arc::clone(&door.manager);
    wait_for("completion", || manager.stats().completed() == 1).await;
    let stats = door.manager.stats_snapshot();
    assert_eq!(stats.bytes_up, 4);
    assert_eq!(stats.bytes_down, 4);
    assert_eq!(stats.errored, 0);

    door.stop().await;
}

#[tokio::test]
async fn test_domain_destination() {
    let upstream = start_echo_upstream().await;
    let door = start_door(DoorConfig::fixed(
        vec![Network::Tcp],
        "localhost",
        upstream.port(),
    ));

    assert_eq!(round_trip(door.addr, b"resolved").await, b"resolved");
    door.stop().await;
}

#[tokio::test]
async fn test_large_payload_keeps_order() {
    let upstream = start_echo_upstream().await;
    let door = start_door(fixed(upstream));

    let payload: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let reply = round_trip(door.addr, &payload).await;
    assert_eq!(reply.len(), payload.len());
    assert!(reply == payload, "payload corrupted or reordered");

    door.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections() {
    let upstream = start_echo_upstream().await;
    let door = start_door(fixed(upstream));

    let mut clients = Vec::new();
    for i in 0..16u8 {
        let addr = door.addr;
        clients.push(tokio::spawn(async move {
            let payload = vec![i; 4096 + usize::from(i)];
            let reply = round_trip(addr, &payload).await;
            assert_eq!(reply, payload);
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let manager = Arc::clone(&door.manager);
    wait_for("all completions", || manager.stats().completed() == 16).await;
    door.stop().await;
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test]
async fn test_idle_connection_times_out() {
    let upstream = start_silent_upstream().await;
    let door = start_door(fixed(upstream).with_timeout(1));

    let started = Instant::now();
    let mut client = TcpStream::connect(door.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(10), client.read(&mut buf))
        .await
        .expect("door should close the idle connection")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(started.elapsed() >= Duration::from_millis(900));

    let manager = Arc::clone(&door.manager);
    wait_for("timeout accounting", || manager.stats().timed_out() == 1).await;
    door.stop().await;
}

#[tokio::test]
async fn test_refused_upstream_closes_client() {
    let refused = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let door = start_door(fixed(refused));

    let mut client = TcpStream::connect(door.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);

    let manager = Arc::clone(&door.manager);
    wait_for("error accounting", || manager.stats().errored() == 1).await;
    assert_eq!(door.manager.stats().failures(FailureKind::Dispatch), 1);
    assert_eq!(door.manager.stats().completed(), 0);
    door.stop().await;
}

#[tokio::test]
async fn test_missing_destination_closes_client() {
    // A plain listener never recovers a destination
    let door = start_door(DoorConfig::follow_redirect(vec![Network::Tcp]));

    let mut client = TcpStream::connect(door.addr).await.unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);

    let manager = Arc::clone(&door.manager);
    wait_for("error accounting", || manager.stats().errored() == 1).await;
    assert_eq!(door.manager.stats().failures(FailureKind::NoDestination), 1);
    door.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_active_connections() {
    let upstream = start_silent_upstream().await;
    let door = start_door(fixed(upstream));

    let mut client = TcpStream::connect(door.addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let manager = Arc::clone(&door.manager);
    wait_for("accept", || manager.active_connections() == 1).await;

    door.manager.shutdown().await;
    assert_eq!(door.manager.active_connections(), 0);

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    door.accept_loop.await.unwrap().unwrap();
}
