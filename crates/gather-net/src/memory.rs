//! In-process connection that records what is sent on it.
//!
//! Lets protocol logic be driven without sockets: hand a [`MemoryConnection`]
//! to a [`TransportHandler`](crate::TransportHandler) and inspect the packets
//! it produced.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transport::{Channel, Connection, ConnectionId, TransportError};

/// A [`Connection`] backed by an in-memory packet log.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    sent: Mutex<Vec<(Channel, Vec<u8>)>>,
    open: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryConnection {
    /// Create an open connection.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Make subsequent sends fail with [`TransportError::WouldBlock`].
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Drain and return every packet sent so far.
    pub fn take_sent(&self) -> Vec<(Channel, Vec<u8>)> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Number of packets sent and not yet taken.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, channel: Channel, packet: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::WouldBlock);
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push((channel, packet.to_vec())),
            Err(poisoned) => poisoned.into_inner().push((channel, packet.to_vec())),
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
