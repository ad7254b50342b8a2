//! Datagram envelope: one kind byte in front of the body.

use crate::transport::Channel;

/// Largest datagram the transport sends or accepts.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest application packet: a datagram minus the kind byte.
pub const MAX_PACKET: usize = MAX_DATAGRAM - 1;

/// What a datagram carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatagramKind {
    /// Client opens a connection; body is the handshake payload.
    Hello = 0,
    /// Server accepted the connection; body is the assigned connection id.
    Welcome = 1,
    /// Server refused the connection.
    Reject = 2,
    /// Application packet on the reliable channel.
    Reliable = 3,
    /// Application packet on the unreliable channel.
    Unreliable = 4,
    /// Keepalive probe.
    Ping = 5,
    /// Keepalive answer.
    Pong = 6,
    /// Orderly close.
    Goodbye = 7,
}

impl DatagramKind {
    /// Kind that carries application data on `channel`.
    pub fn data(channel: Channel) -> Self {
        match channel {
            Channel::Reliable => Self::Reliable,
            Channel::Unreliable => Self::Unreliable,
        }
    }

    /// Channel for data-carrying kinds.
    pub fn channel(self) -> Option<Channel> {
        match self {
            Self::Reliable => Some(Channel::Reliable),
            Self::Unreliable => Some(Channel::Unreliable),
            _ => None,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Hello,
            1 => Self::Welcome,
            2 => Self::Reject,
            3 => Self::Reliable,
            4 => Self::Unreliable,
            5 => Self::Ping,
            6 => Self::Pong,
            7 => Self::Goodbye,
            _ => return None,
        })
    }
}

/// Build a datagram.
pub fn encode(kind: DatagramKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(kind as u8);
    out.extend_from_slice(body);
    out
}

/// Split a datagram into kind and body. `None` for empty or unknown datagrams.
pub fn decode(datagram: &[u8]) -> Option<(DatagramKind, &[u8])> {
    let (&first, body) = datagram.split_first()?;
    DatagramKind::from_byte(first).map(|kind| (kind, body))
}
