//! Connection statistics
//!
//! Counters shared by every connection task of a [`ConnectionManager`].
//! Failed connections are counted once in `errored` and once under the
//! [`FailureKind`] derived from their [`ConnectionError`].
//!
//! [`ConnectionManager`]: super::ConnectionManager

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{ConnectionError, Direction};
use crate::io::CopyResult;

/// Why an accepted connection ended without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No usable destination was resolved
    NoDestination,
    /// The dispatcher could not open a session
    Dispatch,
    /// Client to destination relay failed
    Request,
    /// Destination to client relay failed
    Response,
    /// Torn down by the inactivity timer
    IdleTimeout,
    /// Cancelled by shutdown
    Interrupted,
}

impl FailureKind {
    const ALL: [Self; 6] = [
        Self::NoDestination,
        Self::Dispatch,
        Self::Request,
        Self::Response,
        Self::IdleTimeout,
        Self::Interrupted,
    ];

    /// Classify a connection error. Idle timeouts and shutdown win over the
    /// direction they surfaced in.
    #[must_use]
    pub fn of(error: &ConnectionError) -> Self {
        match error {
            ConnectionError::InvalidDestination(_) => Self::NoDestination,
            ConnectionError::Dispatch(_) => Self::Dispatch,
            ConnectionError::Transport(e) if e.is_timeout() => Self::IdleTimeout,
            ConnectionError::Transport(e) if e.source.kind() == std::io::ErrorKind::Interrupted => {
                Self::Interrupted
            }
            ConnectionError::Transport(e) => match e.direction {
                Direction::Request => Self::Request,
                Direction::Response => Self::Response,
            },
            ConnectionError::LimitReached { .. } | ConnectionError::ShuttingDown => {
                Self::Interrupted
            }
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Atomic connection statistics
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    /// Client to destination bytes of completed connections
    bytes_up: AtomicU64,
    /// Destination to client bytes of completed connections
    bytes_down: AtomicU64,
    failures: [AtomicU64; FailureKind::ALL.len()],
}

impl ConnectionStats {
    /// Create new connection statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection handed to the door
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection whose both directions reached end of stream
    pub fn record_completed(&self, copied: CopyResult) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_up
            .fetch_add(copied.client_to_upstream, Ordering::Relaxed);
        self.bytes_down
            .fetch_add(copied.upstream_to_client, Ordering::Relaxed);
    }

    /// Record a connection that ended with `error`
    pub fn record_failure(&self, error: &ConnectionError) {
        self.record_failure_kind(FailureKind::of(error));
    }

    /// Record a failed connection of a known kind
    pub fn record_failure_kind(&self, kind: FailureKind) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.failures[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection refused before reaching the door
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections handed to the door
    #[must_use]
    pub fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections still running
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Connections that completed cleanly
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Failed connections of one kind
    #[must_use]
    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failures[kind.index()].load(Ordering::Relaxed)
    }

    /// Failed connections of every kind
    #[must_use]
    pub fn errored(&self) -> u64 {
        FailureKind::ALL.iter().map(|k| self.failures(*k)).sum()
    }

    /// Connections closed by the idle timer
    #[must_use]
    pub fn timed_out(&self) -> u64 {
        self.failures(FailureKind::IdleTimeout)
    }

    /// Connections refused by the limit or during shutdown
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_accepted: self.total_accepted(),
            active: self.active(),
            completed: self.completed(),
            errored: self.errored(),
            rejected: self.rejected(),
            no_destination: self.failures(FailureKind::NoDestination),
            dispatch_failed: self.failures(FailureKind::Dispatch),
            request_failed: self.failures(FailureKind::Request),
            response_failed: self.failures(FailureKind::Response),
            timed_out: self.timed_out(),
            interrupted: self.failures(FailureKind::Interrupted),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Snapshot of connection statistics at a point in time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_accepted: u64,
    pub active: u64,
    pub completed: u64,
    /// Sum of every failure kind
    pub errored: u64,
    pub rejected: u64,
    pub no_destination: u64,
    pub dispatch_failed: u64,
    pub request_failed: u64,
    pub response_failed: u64,
    pub timed_out: u64,
    pub interrupted: u64,
    /// Client to destination bytes of completed connections
    pub bytes_up: u64,
    /// Destination to client bytes of completed connections
    pub bytes_down: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Bytes relayed by completed connections in both directions
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }

    /// Percentage of finished connections that completed cleanly.
    /// Shutdown interruptions are not held against the door.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.errored - self.interrupted;
        if finished == 0 {
            100.0
        } else {
            (self.completed as f64 / finished as f64) * 100.0
        }
    }
}
