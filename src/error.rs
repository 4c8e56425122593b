//! Error types for tproxy-door
//!
//! Errors are grouped by subsystem. Lower layers hand back raw `io::Error`s;
//! the door wraps them with the phase and direction they occurred in and
//! reports a single terminal error per connection.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::destination::Network;

/// Top-level error type for tproxy-door
#[derive(Debug, Error)]
pub enum DoorError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener socket errors
    #[error("TPROXY error: {0}")]
    Tproxy(#[from] TproxyError),

    /// Session dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Per-connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DoorError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Tproxy(e) => e.is_recoverable(),
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Connection(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Listener socket errors
#[derive(Debug, Error)]
pub enum TproxyError {
    /// Failed to create socket
    #[error("Failed to create listener socket: {0}")]
    SocketCreation(String),

    /// Failed to set socket option (IP_TRANSPARENT, etc.)
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Failed to accept connection
    #[error("Accept error: {0}")]
    AcceptError(String),

    /// Failed to retrieve original destination
    #[error("Failed to get original destination: {0}")]
    OriginalDstError(String),

    /// Permission denied (CAP_NET_ADMIN required)
    #[error("Permission denied: TPROXY requires CAP_NET_ADMIN capability")]
    PermissionDenied,

    /// I/O error
    #[error("Listener I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TproxyError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation(_)
            | Self::SocketOption { .. }
            | Self::BindError { .. }
            | Self::PermissionDenied => false,
            Self::AcceptError(_) | Self::OriginalDstError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while opening a session toward a destination
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Connection to the destination failed
    #[error("Failed to connect to {destination}: {reason}")]
    ConnectFailed { destination: String, reason: String },

    /// Connection to the destination timed out
    #[error("Connection to {destination} timed out after {timeout_secs}s")]
    Timeout {
        destination: String,
        timeout_secs: u64,
    },

    /// The dispatcher cannot carry this network
    #[error("Network {0} is not supported by this dispatcher")]
    UnsupportedNetwork(Network),

    /// Dispatch was cancelled before the session was ready
    #[error("Dispatch cancelled")]
    Cancelled,

    /// I/O error during dispatch
    #[error("Dispatch I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl DispatchError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectFailed { .. } | Self::Timeout { .. } => true,
            Self::UnsupportedNetwork(_) | Self::Cancelled => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a connect failed error
    pub fn connect_failed(destination: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }
}

/// Direction of a relay loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to destination
    Request,
    /// Destination to client
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// Marker carried inside the `io::Error` of a relay loop cancelled by the
/// inactivity timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection idle timeout")]
pub struct IdleTimeout;

impl From<IdleTimeout> for io::Error {
    fn from(marker: IdleTimeout) -> Self {
        Self::new(io::ErrorKind::TimedOut, marker)
    }
}

/// A failure while relaying one direction of a connection
#[derive(Debug, Error)]
#[error("failed to transport {direction}: {source}")]
pub struct TransportError {
    /// Direction that failed first
    pub direction: Direction,
    /// Underlying I/O error (or cancellation mapped to one)
    #[source]
    pub source: io::Error,
}

impl TransportError {
    /// Create a transport error for the given direction
    pub const fn new(direction: Direction, source: io::Error) -> Self {
        Self { direction, source }
    }

    /// Whether the connection was torn down by the inactivity timer.
    ///
    /// A `TimedOut` error raised by a socket is not an idle timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.source
            .get_ref()
            .is_some_and(|inner| inner.is::<IdleTimeout>())
    }
}

/// Connection handling errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No usable destination could be resolved
    #[error("Unable to get destination: {0}")]
    InvalidDestination(String),

    /// The session could not be opened
    #[error("Failed to dispatch: {0}")]
    Dispatch(#[from] DispatchError),

    /// Streaming failed in one direction
    #[error("Connection ends: {0}")]
    Transport(#[from] TransportError),

    /// Connection limit reached
    #[error("Connection limit reached ({current}/{max})")]
    LimitReached { current: usize, max: usize },

    /// Shutdown in progress
    #[error("Server is shutting down")]
    ShuttingDown,
}

impl ConnectionError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidDestination(_) | Self::ShuttingDown => false,
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Transport(e) => e.is_timeout(),
            Self::LimitReached { .. } => true,
        }
    }

    /// Whether this is an idle-timeout transport failure
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Create an invalid destination error
    pub fn invalid_destination(reason: impl Into<String>) -> Self {
        Self::InvalidDestination(reason.into())
    }

    /// Create a limit reached error
    pub const fn limit_reached(current: usize, max: usize) -> Self {
        Self::LimitReached { current, max }
    }
}

/// Type alias for Result with DoorError
pub type Result<T> = std::result::Result<T, DoorError>;
