//! Transport interface the session protocol runs over.
//!
//! A transport delivers whole packets on one of two [`Channel`]s and reports
//! connection lifecycle to a [`TransportHandler`]. Handlers are invoked from
//! transport tasks, potentially for many connections at once, so they must be
//! `Send + Sync` and do their own locking.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery class of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ordered, loss-intolerant traffic: requests, replies, roster updates.
    Reliable,
    /// Latency-sensitive traffic that may be dropped.
    Unreliable,
}

impl Channel {
    /// Every channel, in index order.
    pub const ALL: [Channel; 2] = [Channel::Reliable, Channel::Unreliable];

    /// Dense index for per-channel tables.
    pub fn index(self) -> usize {
        match self {
            Self::Reliable => 0,
            Self::Unreliable => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => f.write_str("reliable"),
            Self::Unreliable => f.write_str("unreliable"),
        }
    }
}

/// Unique identifier for a connection within a transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side said goodbye.
    Goodbye,
    /// Nothing was heard from the remote side within the idle timeout.
    TimedOut,
    /// This side closed the connection.
    Local,
    /// The transport failed.
    TransportError(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goodbye => f.write_str("remote closed the connection"),
            Self::TimedOut => f.write_str("connection timed out"),
            Self::Local => f.write_str("closed locally"),
            Self::TransportError(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// Errors from sending on a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,

    /// The socket buffer is full; the packet was dropped.
    #[error("send would block")]
    WouldBlock,

    /// The packet exceeds what the transport can carry.
    #[error("packet of {size} bytes exceeds transport maximum {max}")]
    TooLarge {
        /// Packet size.
        size: usize,
        /// Largest packet the transport accepts.
        max: usize,
    },

    /// Any other socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live connection to one remote peer.
pub trait Connection: Send + Sync {
    /// This connection's id.
    fn id(&self) -> ConnectionId;

    /// Send one packet on `channel`.
    fn send(&self, channel: Channel, packet: &[u8]) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn disconnect(&self);

    /// Whether the connection is still open.
    fn is_connected(&self) -> bool;
}

/// Receiver of transport lifecycle and data callbacks.
///
/// For one connection, `on_connected` happens before any `on_data`, and
/// `on_disconnected` is delivered at most once and last. Callbacks for
/// different connections may run concurrently.
pub trait TransportHandler: Send + Sync {
    /// A peer completed the handshake. Return `false` to refuse it.
    fn on_connected(&self, connection: Arc<dyn Connection>, handshake: &[u8]) -> bool;

    /// A packet arrived from an accepted connection.
    fn on_data(&self, id: ConnectionId, channel: Channel, packet: &[u8]);

    /// An accepted connection ended.
    fn on_disconnected(&self, id: ConnectionId, reason: DisconnectReason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_uniqueness() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.next_id();
        let id2 = id_gen.next_id();
        let id3 = id_gen.next_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.0 + 1, id2.0);
        assert_eq!(id2.0 + 1, id3.0);
    }

    #[test]
    fn test_channel_indices_are_dense() {
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
    }
}
