//! Sessions toward a destination
//!
//! A [`Session`] is the door's view of the data path to a destination: an
//! ingress pipe it writes client bytes into and an egress pipe it reads
//! destination bytes from. The [`Dispatcher`] that opened the session holds
//! the other ends as a [`SessionPeer`].
//!
//! ```text
//!            ingress (requests)
//! door  ──▶ PipeWriter ═══ PipeReader ──▶  dispatcher
//!       ◀── PipeReader ═══ PipeWriter ◀──
//!            egress (responses)
//! ```

mod direct;
mod pipe;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::destination::Destination;
use crate::error::DispatchError;

pub use direct::DirectDispatcher;
pub use pipe::{pipe, PipeReader, PipeStatus, PipeWriter, DEFAULT_PIPE_CAPACITY};

/// The door's side of a session
#[derive(Debug)]
pub struct Session {
    /// Sink for client-origin bytes
    pub ingress: PipeWriter,
    /// Source of destination-origin bytes
    pub egress: PipeReader,
}

impl Session {
    /// Error-close both halves
    pub fn close_error(&self) {
        self.ingress.close_error();
        self.egress.close_error();
    }
}

/// The dispatcher's side of a session
#[derive(Debug)]
pub struct SessionPeer {
    /// Client-origin bytes to forward to the destination
    pub requests: PipeReader,
    /// Sink for destination-origin bytes
    pub responses: PipeWriter,
}

impl SessionPeer {
    /// Error-close both halves
    pub fn close_error(&self) {
        self.requests.close_error();
        self.responses.close_error();
    }
}

/// Create a connected session pair whose pipes buffer `capacity` bytes each
#[must_use]
pub fn link(capacity: usize) -> (Session, SessionPeer) {
    let (ingress, requests) = pipe(capacity);
    let (responses, egress) = pipe(capacity);
    (
        Session { ingress, egress },
        SessionPeer {
            requests,
            responses,
        },
    )
}

/// Opens sessions toward destinations
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Open a session for `destination`.
    ///
    /// Implementations must give up when `cancel` fires, and should tie any
    /// background work they start for the session to it.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if the session cannot be opened.
    async fn dispatch(
        &self,
        cancel: &CancellationToken,
        destination: &Destination,
    ) -> Result<Session, DispatchError>;

    /// Short name for logs
    fn name(&self) -> &str;
}
