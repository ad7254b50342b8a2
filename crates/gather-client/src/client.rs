//! Client facade tying transport, event queue and batcher together.

use std::sync::Arc;
use std::time::Duration;

use gather_config::ClientConfig;
use gather_net::messages::{create_game_request, encode_handshake, join_game_request};
use gather_net::udp::{ConnectError, UdpClient, UdpClientConfig};
use gather_net::{Channel, Connection, SessionId, TransportError, TransportHandler};

use crate::batcher::{BatchError, OutboundBatcher};
use crate::event_queue::{ClientEvent, EventHandler, EventQueue};
use crate::inbound::InboundHandler;

/// Errors from [`GameClient::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server address could not be resolved.
    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        /// Address as configured.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Resolution produced no addresses.
    #[error("no address found for {0}")]
    NoAddress(String),

    /// The transport handshake failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// A game client.
///
/// Network callbacks only enqueue; all client-visible state changes happen
/// in [`tick`](Self::tick), on the caller's thread.
pub struct GameClient {
    connection: Arc<dyn Connection>,
    queue: Arc<EventQueue>,
    batcher: OutboundBatcher,
    // Keeps the UDP tasks alive; `None` for caller-supplied transports.
    transport: Option<UdpClient>,
}

impl GameClient {
    /// Connect to the server named in `config` over UDP.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let host = format!("{}:{}", config.server_address, config.server_port);
        let addr = tokio::net::lookup_host(&host)
            .await
            .map_err(|source| ClientError::Resolve {
                addr: host.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ClientError::NoAddress(host.clone()))?;

        let queue = Arc::new(EventQueue::new());
        let inbound = Arc::new(InboundHandler::new(Arc::clone(&queue)));
        let transport_config = UdpClientConfig {
            connect_timeout: config.connect_timeout(),
            keepalive_interval: config.keepalive_interval(),
            ..Default::default()
        };
        let transport = UdpClient::connect(
            addr,
            &encode_handshake(config.client_version),
            inbound as Arc<dyn TransportHandler>,
            transport_config,
        )
        .await?;

        tracing::info!("Connected to {host} with client version {}", config.client_version);
        let connection = transport.connection();
        let mut client = Self::with_connection(connection, queue, config.min_send_interval());
        client.transport = Some(transport);
        Ok(client)
    }

    /// Build a client over an existing connection whose incoming packets are
    /// decoded into `queue` (normally by an [`InboundHandler`]).
    pub fn with_connection(
        connection: Arc<dyn Connection>,
        queue: Arc<EventQueue>,
        min_send_interval: Duration,
    ) -> Self {
        Self {
            connection,
            queue,
            batcher: OutboundBatcher::new(min_send_interval),
            transport: None,
        }
    }

    /// Ask the server for a new session.
    pub fn create_game(&self) -> Result<(), TransportError> {
        self.connection
            .send(Channel::Reliable, &create_game_request())
    }

    /// Ask to join `session`.
    pub fn join_game(&self, session: SessionId) -> Result<(), TransportError> {
        self.connection
            .send(Channel::Reliable, &join_game_request(session))
    }

    /// Queue application data for the next batched send on `channel`.
    pub fn send_game_data(&mut self, channel: Channel, data: &[u8]) -> Result<(), BatchError> {
        self.batcher.write(channel, data)
    }

    /// Run one client update: dispatch pending events to `handler`, then let
    /// the batcher send if its interval has elapsed. Returns the number of
    /// events dispatched.
    pub fn tick<H: EventHandler + ?Sized>(&mut self, dt: Duration, handler: &mut H) -> usize {
        let events = self.queue.drain();
        for event in &events {
            match event {
                ClientEvent::Joined(session) if self.batcher.session_id().is_none() => {
                    self.batcher.arm(*session);
                }
                ClientEvent::SessionConflict { current, received } => {
                    tracing::error!(
                        "Session state ambiguous ({current} vs {received}), reconnect advised"
                    );
                }
                _ => {}
            }
            event.dispatch(handler);
        }
        self.batcher.tick(dt, self.connection.as_ref());
        events.len()
    }

    /// The session joined, once a `Joined` event has been applied by
    /// [`tick`](Self::tick).
    pub fn session_id(&self) -> Option<SessionId> {
        self.batcher.session_id()
    }

    /// Whether the transport is still connected.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the connection. A `Disconnected` event follows.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_net::messages::{game_data_frame, read_game_data, reply_frame};
    use gather_net::{
        ConnectionId, DisconnectReason, ErrorCode, FrameTag, JoinReply, MemoryConnection,
        split_frames,
    };

    struct Recorder {
        joined: Vec<SessionId>,
        failed: Vec<ErrorCode>,
        data: Vec<Vec<u8>>,
        disconnected: bool,
    }

    impl EventHandler for Recorder {
        fn on_joined(&mut self, session: SessionId) {
            self.joined.push(session);
        }
        fn on_request_failed(&mut self, code: ErrorCode) {
            self.failed.push(code);
        }
        fn on_game_data(&mut self, _channel: Channel, _session: SessionId, data: &[u8]) {
            self.data.push(data.to_vec());
        }
        fn on_disconnected(&mut self, _reason: &str) {
            self.disconnected = true;
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            joined: Vec::new(),
            failed: Vec::new(),
            data: Vec::new(),
            disconnected: false,
        }
    }

    fn client() -> (GameClient, Arc<MemoryConnection>, Arc<InboundHandler>) {
        let conn = Arc::new(MemoryConnection::new(ConnectionId(1)));
        let queue = Arc::new(EventQueue::new());
        let inbound = Arc::new(InboundHandler::new(Arc::clone(&queue)));
        let client = GameClient::with_connection(
            Arc::clone(&conn) as Arc<dyn Connection>,
            queue,
            Duration::from_millis(100),
        );
        (client, conn, inbound)
    }

    #[test]
    fn test_requests_go_out_reliable() {
        let (client, conn, _) = client();
        client.create_game().unwrap();
        client.join_game(SessionId(3)).unwrap();
        let sent = conn.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(c, _)| *c == Channel::Reliable));
        assert_eq!(sent[0].1, create_game_request());
        assert_eq!(sent[1].1, join_game_request(SessionId(3)));
    }

    #[test]
    fn test_join_arms_batcher_on_tick() {
        let (mut client, conn, inbound) = client();
        let mut handler = recorder();
        assert_eq!(
            client.send_game_data(Channel::Unreliable, b"early"),
            Err(BatchError::NotInSession)
        );

        inbound.handle_packet(
            Channel::Reliable,
            &reply_frame(FrameTag::CreateGame, JoinReply::Joined(SessionId(9))),
        );
        // Recorded by the network side, but not visible until tick.
        assert_eq!(inbound.session_id(), Some(SessionId(9)));
        assert_eq!(client.session_id(), None);
        assert_eq!(client.tick(Duration::ZERO, &mut handler), 1);
        assert_eq!(handler.joined, vec![SessionId(9)]);
        assert_eq!(client.session_id(), Some(SessionId(9)));

        client.send_game_data(Channel::Unreliable, b"move").unwrap();
        client.tick(Duration::from_millis(100), &mut handler);
        let (channel, packet) = &conn.take_sent()[0];
        assert_eq!(*channel, Channel::Unreliable);
        let frame = split_frames(packet).next().unwrap().unwrap();
        assert_eq!(
            read_game_data(frame.payload).unwrap(),
            (SessionId(9), &b"move"[..])
        );
    }

    #[test]
    fn test_events_only_applied_on_tick() {
        let (mut client, _conn, inbound) = client();
        let mut handler = recorder();
        inbound.handle_packet(
            Channel::Reliable,
            &reply_frame(
                FrameTag::JoinGame,
                JoinReply::Failed(ErrorCode::SessionNotFound),
            ),
        );
        inbound.handle_packet(
            Channel::Unreliable,
            &game_data_frame(SessionId(1), b"state").unwrap(),
        );
        assert!(handler.failed.is_empty());

        assert_eq!(client.tick(Duration::ZERO, &mut handler), 2);
        assert_eq!(handler.failed, vec![ErrorCode::SessionNotFound]);
        assert_eq!(handler.data, vec![b"state".to_vec()]);
    }

    #[test]
    fn test_disconnect_event() {
        let (mut client, conn, inbound) = client();
        let mut handler = recorder();
        client.disconnect();
        assert!(!client.is_connected());
        assert!(!conn.is_connected());

        inbound.on_disconnected(ConnectionId(1), DisconnectReason::Local);
        client.tick(Duration::ZERO, &mut handler);
        assert!(handler.disconnected);
    }
}
