//! One UDP peer as a [`Connection`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::Notify;

use super::packet::{self, DatagramKind, MAX_PACKET};
use crate::transport::{Channel, Connection, ConnectionId, TransportError};

/// A remote peer reached through a shared socket.
///
/// Sends never wait: a full socket buffer drops the datagram and reports
/// [`TransportError::WouldBlock`].
#[derive(Debug)]
pub struct UdpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    open: AtomicBool,
    closed: Notify,
}

impl UdpConnection {
    pub(crate) fn new(id: ConnectionId, peer: SocketAddr, socket: Arc<UdpSocket>) -> Self {
        Self {
            id,
            peer,
            socket,
            open: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send a datagram regardless of the open flag.
    pub(crate) fn send_datagram(
        &self,
        kind: DatagramKind,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let datagram = packet::encode(kind, body);
        match self.socket.try_send_to(&datagram, self.peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(TransportError::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves once [`Connection::disconnect`] has been called.
    pub(crate) async fn wait_closed(&self) {
        self.closed.notified().await;
    }

    /// Mark closed without waking the owning task.
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Connection for UdpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, channel: Channel, packet: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if packet.len() > MAX_PACKET {
            return Err(TransportError::TooLarge {
                size: packet.len(),
                max: MAX_PACKET,
            });
        }
        self.send_datagram(DatagramKind::data(channel), packet)
    }

    fn disconnect(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            // A stored permit wakes the owning task even if it is not waiting yet.
            self.closed.notify_one();
        }
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
