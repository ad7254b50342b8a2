//! UDP server: demultiplexes datagrams into one task per peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use super::connection::UdpConnection;
use super::packet::{self, DatagramKind, MAX_DATAGRAM};
use crate::platform::{self, SocketConfig};
use crate::transport::{
    Channel, Connection, ConnectionId, DisconnectReason, IdGenerator, TransportHandler,
};

/// Datagrams queued per peer before new ones are dropped.
const PEER_INBOX_CAPACITY: usize = 256;

/// Configuration for [`UdpServer`].
#[derive(Debug, Clone)]
pub struct UdpServerConfig {
    /// Maximum concurrent peers. Further hellos are rejected.
    pub max_connections: usize,
    /// A peer silent for this long is disconnected.
    pub idle_timeout: Duration,
    /// Socket options.
    pub socket: SocketConfig,
}

impl Default for UdpServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            idle_timeout: Duration::from_secs(15),
            socket: SocketConfig::default(),
        }
    }
}

enum Inbound {
    Hello,
    Data(Channel, Vec<u8>),
    Ping,
    Goodbye,
}

struct PeerEntry {
    id: ConnectionId,
    inbox: mpsc::Sender<Inbound>,
}

/// Datagram server delivering connection events to a [`TransportHandler`].
///
/// The receive loop only routes datagrams; each peer's handler callbacks run
/// on that peer's own task, so peers are served concurrently and in order.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn TransportHandler>,
    config: UdpServerConfig,
    peers: Arc<DashMap<SocketAddr, PeerEntry>>,
    id_gen: IdGenerator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl UdpServer {
    /// Bind a socket to `addr`.
    pub fn bind(
        addr: SocketAddr,
        handler: Arc<dyn TransportHandler>,
        config: UdpServerConfig,
    ) -> std::io::Result<Self> {
        let socket = platform::bind_udp(addr, &config.socket)?;
        Ok(Self::with_socket(socket, handler, config))
    }

    /// Serve on a pre-bound socket (useful for tests).
    pub fn with_socket(
        socket: UdpSocket,
        handler: Arc<dyn TransportHandler>,
        config: UdpServerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            socket: Arc::new(socket),
            handler,
            config,
            peers: Arc::new(DashMap::new()),
            id_gen: IdGenerator::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Number of peers with a live task.
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Run the receive loop until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> std::io::Result<()> {
        tracing::info!("UDP transport listening on {}", self.socket.local_addr()?);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, from)) => self.dispatch(from, &buf[..n]),
                        // Some platforms surface ICMP errors from earlier sends here.
                        Err(e) => tracing::warn!("recv_from failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("UDP transport shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the receive loop and all peer tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn dispatch(&self, from: SocketAddr, datagram: &[u8]) {
        let Some((kind, body)) = packet::decode(datagram) else {
            tracing::trace!("Ignoring malformed datagram from {from}");
            return;
        };

        if let Some(peer) = self.peers.get(&from) {
            let inbound = match kind {
                DatagramKind::Hello => Inbound::Hello,
                DatagramKind::Reliable | DatagramKind::Unreliable => {
                    let Some(channel) = kind.channel() else {
                        return;
                    };
                    Inbound::Data(channel, body.to_vec())
                }
                DatagramKind::Ping => Inbound::Ping,
                DatagramKind::Goodbye => Inbound::Goodbye,
                DatagramKind::Welcome | DatagramKind::Reject | DatagramKind::Pong => return,
            };
            match peer.inbox.try_send(inbound) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Inbox full for {:?}, dropping datagram", peer.id);
                }
                Err(TrySendError::Closed(_)) => {}
            }
            return;
        }

        if kind != DatagramKind::Hello {
            tracing::trace!("Ignoring {kind:?} from unknown peer {from}");
            return;
        }

        if self.peers.len() >= self.config.max_connections {
            tracing::warn!("Connection limit reached, rejecting {from}");
            let reject = packet::encode(DatagramKind::Reject, &[]);
            let _ = self.socket.try_send_to(&reject, from);
            return;
        }

        self.accept(from, body.to_vec());
    }

    fn accept(&self, from: SocketAddr, handshake: Vec<u8>) {
        let id = self.id_gen.next_id();
        let connection = Arc::new(UdpConnection::new(id, from, Arc::clone(&self.socket)));
        let (inbox_tx, inbox_rx) = mpsc::channel(PEER_INBOX_CAPACITY);
        self.peers.insert(
            from,
            PeerEntry {
                id,
                inbox: inbox_tx,
            },
        );
        tracing::debug!("Hello from {from}, assigned {id:?}");

        let task = PeerTask {
            connection,
            handshake,
            inbox: inbox_rx,
            handler: Arc::clone(&self.handler),
            peers: Arc::clone(&self.peers),
            idle_timeout: self.config.idle_timeout,
            shutdown_rx: self.shutdown_rx.clone(),
        };
        tokio::spawn(task.run());
    }
}

struct PeerTask {
    connection: Arc<UdpConnection>,
    handshake: Vec<u8>,
    inbox: mpsc::Receiver<Inbound>,
    handler: Arc<dyn TransportHandler>,
    peers: Arc<DashMap<SocketAddr, PeerEntry>>,
    idle_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl PeerTask {
    async fn run(mut self) {
        let id = self.connection.id();
        let addr = self.connection.peer_addr();
        let welcome = id.0.to_le_bytes();

        let conn: Arc<dyn Connection> = Arc::clone(&self.connection) as Arc<dyn Connection>;
        if !self.handler.on_connected(conn, &self.handshake) {
            tracing::info!("Refused connection from {addr}");
            let _ = self.connection.send_datagram(DatagramKind::Reject, &[]);
            self.connection.mark_closed();
            self.peers.remove_if(&addr, |_, peer| peer.id == id);
            return;
        }
        tracing::info!("Accepted connection {id:?} from {addr}");
        let _ = self.connection.send_datagram(DatagramKind::Welcome, &welcome);

        let reason = loop {
            tokio::select! {
                received = tokio::time::timeout(self.idle_timeout, self.inbox.recv()) => {
                    match received {
                        Err(_) => break DisconnectReason::TimedOut,
                        Ok(None) => break DisconnectReason::Local,
                        Ok(Some(Inbound::Data(channel, packet))) => {
                            self.handler.on_data(id, channel, &packet);
                        }
                        Ok(Some(Inbound::Ping)) => {
                            let _ = self.connection.send_datagram(DatagramKind::Pong, &[]);
                        }
                        // The client resends hello until it sees a welcome.
                        Ok(Some(Inbound::Hello)) => {
                            let _ = self.connection.send_datagram(DatagramKind::Welcome, &welcome);
                        }
                        Ok(Some(Inbound::Goodbye)) => break DisconnectReason::Goodbye,
                    }
                }
                _ = self.connection.wait_closed() => break DisconnectReason::Local,
                _ = self.shutdown_rx.changed() => break DisconnectReason::Local,
            }
        };

        if reason != DisconnectReason::Goodbye {
            let _ = self.connection.send_datagram(DatagramKind::Goodbye, &[]);
        }
        self.connection.mark_closed();
        self.peers.remove_if(&addr, |_, peer| peer.id == id);
        tracing::info!("Connection {id:?} closed: {reason}");
        self.handler.on_disconnected(id, reason);
    }
}
