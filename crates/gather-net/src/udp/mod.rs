//! Datagram transport over tokio UDP sockets.
//!
//! Every datagram starts with a [`DatagramKind`] byte. A client opens a
//! connection with `Hello` carrying the handshake and resends it until the
//! server answers `Welcome` or `Reject`. Both sides close with `Goodbye`;
//! silence past the idle timeout closes the connection as well, which the
//! client prevents with `Ping`/`Pong` keepalives.
//!
//! Channels are labels only: neither channel retransmits lost datagrams.

mod client;
mod connection;
pub mod packet;
mod server;

pub use client::{ConnectError, UdpClient, UdpClientConfig};
pub use connection::UdpConnection;
pub use packet::{DatagramKind, MAX_PACKET};
pub use server::{UdpServer, UdpServerConfig};
