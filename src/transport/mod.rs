//! Connection management for the tracking link.
//!
//! This module owns everything below the packet layer: turning the configured endpoint
//! into a socket address, holding exactly one TCP or UDP socket, and keeping that socket
//! alive from a background thread.
//!
//! # Key Components
//!
//! - [`Link`]: The primitives the rest of the crate needs from a connection. The
//!   [`Transport`] is the production implementation; tests drive the supervisor and the
//!   client through scripted links.
//! - [`Transport`]: Socket owner. Open, close, write and status queries run under a
//!   single mutex; reads only take it long enough to clone the handle.
//! - [`LinkSupervisor`]: Background reader. Polls [`Link::status`], forces a reconnect
//!   when the link goes stale, reassembles downlink commands and dispatches them.
//! - [`resolver`]: Endpoint resolution and ip literal classification.
//!
//! # Status Model
//!
//! [`ConnectionStatus`] is derived from the socket on every call and never cached. A
//! stale socket is never resumed in place; the supervisor tears it down and opens a new
//! one.
//!
//! # See Also
//!
//! - [`protocol`](crate::protocol): Builds the records that travel over the link.
#[cfg(test)]
pub(crate) mod mock;
pub mod resolver;
mod socket;
mod supervisor;
mod sys;

use std::{fmt, io, str::FromStr};

use thiserror::Error;

pub use resolver::{Family, ResolveError};
pub use socket::Transport;
pub use supervisor::{CommandHandler, DEFAULT_BACKOFF, LinkSupervisor, SharedHandler};

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("address resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("socket fault: {0}")]
    Io(#[from] io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("no open socket")]
    NotConnected,
}

/// Socket flavour used for the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "TCP"),
            TransportKind::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" => Ok(TransportKind::Tcp),
            "UDP" => Ok(TransportKind::Udp),
            other => Err(ConfigError::Method(other.to_string())),
        }
    }
}

/// Coarse health of the link, derived from the socket's native state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Primitives shared by the foreground sender and the background reader.
///
/// Implementations must be safe to call from both threads at once. Only [`Link::read`]
/// may block for long; everything else should return quickly.
pub trait Link: Send + Sync + 'static {
    /// Resolves the endpoint and opens a fresh socket, closing any previous one.
    fn connect(&self) -> Result<(), TransportError>;

    /// Closes the socket. Succeeds when nothing is open.
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Writes one record. Fails unless every byte was handed to the socket.
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Reads up to `bufsize` bytes. An empty result means nothing arrived in time or
    /// the peer closed.
    fn read(&self, bufsize: usize) -> Vec<u8>;

    fn status(&self) -> ConnectionStatus;

    /// Monotonic count of bytes the peer has acknowledged on the current socket.
    fn acked_bytes(&self) -> u64;

    /// Unblocks a pending [`Link::read`] so a stopping reader observes its flag.
    fn interrupt(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_from_str() {
        assert_eq!("TCP".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!("UDP".parse::<TransportKind>().unwrap(), TransportKind::Udp);
    }

    #[test]
    #[should_panic(expected = "Method")]
    fn transport_kind_is_case_sensitive() {
        "tcp".parse::<TransportKind>().unwrap();
    }

    #[test]
    fn transport_kind_display_round_trips() {
        for kind in [TransportKind::Tcp, TransportKind::Udp] {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), kind);
        }
    }
}
