//! Destination resolution
//!
//! Picks the destination of an accepted connection: the predefined address
//! and port from the door configuration, or the destination the listener
//! recovered from the redirected socket when `follow_redirect` is set.

use crate::config::DoorConfig;
use crate::destination::{Destination, Network};
use crate::error::ConnectionError;

/// Resolve the destination for a connection on `network`.
///
/// `original` is the destination recovered by the listener, if any. When the
/// door follows redirects it replaces the configured destination entirely.
///
/// # Errors
///
/// Returns `ConnectionError::InvalidDestination` if the result has no
/// address, no port or an unknown network.
pub fn resolve_destination(
    config: &DoorConfig,
    network: Network,
    original: Option<Destination>,
) -> Result<Destination, ConnectionError> {
    let mut destination = Destination::new(network, config.predefined_address(), config.port);

    if config.follow_redirect {
        if let Some(original) = original {
            destination = original;
        }
    }

    if destination.address.is_none() {
        return Err(ConnectionError::invalid_destination(format!(
            "no address for {destination}"
        )));
    }
    if !destination.is_valid() {
        return Err(ConnectionError::invalid_destination(destination.to_string()));
    }
    Ok(destination)
}
