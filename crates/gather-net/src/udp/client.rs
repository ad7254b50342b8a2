//! UDP client: handshake, receive loop, and keepalive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::connection::UdpConnection;
use super::packet::{self, DatagramKind, MAX_DATAGRAM};
use crate::platform::{self, SocketConfig};
use crate::transport::{Connection, ConnectionId, DisconnectReason, TransportHandler};

/// Errors from [`UdpClient::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Socket setup or I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server did not answer the hello in time.
    #[error("no answer from {addr} within {timeout:?}")]
    TimedOut {
        /// Server address.
        addr: SocketAddr,
        /// How long the client waited.
        timeout: Duration,
    },

    /// The server refused the handshake.
    #[error("server rejected the connection")]
    Rejected,

    /// The local handler refused the connection.
    #[error("connection refused by local handler")]
    Refused,
}

/// Configuration for [`UdpClient`].
#[derive(Debug, Clone)]
pub struct UdpClientConfig {
    /// Give up on the handshake after this long.
    pub connect_timeout: Duration,
    /// Resend the hello at this interval until answered.
    pub hello_interval: Duration,
    /// Ping the server at this interval.
    pub keepalive_interval: Duration,
    /// Consider the server gone after this much silence.
    pub idle_timeout: Duration,
    /// Socket options.
    pub socket: SocketConfig,
}

impl Default for UdpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            hello_interval: Duration::from_millis(250),
            keepalive_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(15),
            socket: SocketConfig {
                reuse_addr: false,
                ..Default::default()
            },
        }
    }
}

/// A connected client. Dropping it closes the connection.
pub struct UdpClient {
    connection: Arc<UdpConnection>,
    task: Option<JoinHandle<()>>,
}

impl UdpClient {
    /// Connect to `server`, sending `handshake` in the hello.
    ///
    /// On success `handler.on_connected` has been called, and a background
    /// task delivers `on_data` and finally `on_disconnected`.
    pub async fn connect(
        server: SocketAddr,
        handshake: &[u8],
        handler: Arc<dyn TransportHandler>,
        config: UdpClientConfig,
    ) -> Result<Self, ConnectError> {
        let bind_addr = if server.is_ipv4() {
            platform::ipv4_bind_address(0)
        } else {
            SocketAddr::new(std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
        };
        let socket = Arc::new(platform::bind_udp(bind_addr, &config.socket)?);

        let id = tokio::time::timeout(
            config.connect_timeout,
            handshake_loop(&socket, server, handshake, config.hello_interval),
        )
        .await
        .map_err(|_| ConnectError::TimedOut {
            addr: server,
            timeout: config.connect_timeout,
        })??;

        let connection = Arc::new(UdpConnection::new(id, server, Arc::clone(&socket)));
        let conn: Arc<dyn Connection> = Arc::clone(&connection) as Arc<dyn Connection>;
        if !handler.on_connected(conn, handshake) {
            let _ = connection.send_datagram(DatagramKind::Goodbye, &[]);
            connection.mark_closed();
            return Err(ConnectError::Refused);
        }
        tracing::info!("Connected to {server} as {id:?}");

        let task = ClientTask {
            connection: Arc::clone(&connection),
            socket,
            server,
            handler,
            keepalive_interval: config.keepalive_interval,
            idle_timeout: config.idle_timeout,
        };
        Ok(Self {
            connection,
            task: Some(tokio::spawn(task.run())),
        })
    }

    /// The connection, for sending.
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection) as Arc<dyn Connection>
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Start closing the connection. `on_disconnected` follows asynchronously.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Close the connection and wait for the background task to finish.
    pub async fn shutdown(mut self) {
        self.connection.disconnect();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

async fn handshake_loop(
    socket: &UdpSocket,
    server: SocketAddr,
    handshake: &[u8],
    hello_interval: Duration,
) -> Result<ConnectionId, ConnectError> {
    let hello = packet::encode(DatagramKind::Hello, handshake);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        socket.send_to(&hello, server).await?;
        let resend_at = Instant::now() + hello_interval;

        while let Ok(received) = tokio::time::timeout_at(resend_at, socket.recv_from(&mut buf)).await
        {
            let (n, from) = received?;
            if from != server {
                continue;
            }
            match packet::decode(&buf[..n]) {
                Some((DatagramKind::Welcome, body)) => {
                    let id = <[u8; 8]>::try_from(body)
                        .map(u64::from_le_bytes)
                        .unwrap_or_default();
                    return Ok(ConnectionId(id));
                }
                Some((DatagramKind::Reject, _)) => return Err(ConnectError::Rejected),
                _ => {}
            }
        }
        tracing::debug!("No answer from {server}, resending hello");
    }
}

struct ClientTask {
    connection: Arc<UdpConnection>,
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    handler: Arc<dyn TransportHandler>,
    keepalive_interval: Duration,
    idle_timeout: Duration,
}

impl ClientTask {
    async fn run(self) {
        let id = self.connection.id();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut keepalive = tokio::time::interval(self.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_heard = Instant::now();

        let reason = loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (n, from) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            tracing::warn!("recv_from failed: {e}");
                            continue;
                        }
                    };
                    if from != self.server {
                        continue;
                    }
                    last_heard = Instant::now();
                    let Some((kind, body)) = packet::decode(&buf[..n]) else {
                        tracing::trace!("Ignoring malformed datagram from {from}");
                        continue;
                    };
                    match kind {
                        DatagramKind::Reliable | DatagramKind::Unreliable => {
                            if let Some(channel) = kind.channel() {
                                self.handler.on_data(id, channel, body);
                            }
                        }
                        DatagramKind::Ping => {
                            let _ = self.connection.send_datagram(DatagramKind::Pong, &[]);
                        }
                        DatagramKind::Goodbye => break DisconnectReason::Goodbye,
                        DatagramKind::Reject => {
                            break DisconnectReason::TransportError("rejected by server".into());
                        }
                        DatagramKind::Hello | DatagramKind::Welcome | DatagramKind::Pong => {}
                    }
                }
                _ = keepalive.tick() => {
                    if last_heard.elapsed() >= self.idle_timeout {
                        break DisconnectReason::TimedOut;
                    }
                    let _ = self.connection.send_datagram(DatagramKind::Ping, &[]);
                }
                _ = self.connection.wait_closed() => break DisconnectReason::Local,
            }
        };

        if reason != DisconnectReason::Goodbye {
            let _ = self.connection.send_datagram(DatagramKind::Goodbye, &[]);
        }
        self.connection.mark_closed();
        tracing::info!("Disconnected from {}: {reason}", self.server);
        self.handler.on_disconnected(id, reason);
    }
}
