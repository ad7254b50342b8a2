//! Network-thread side of the client: decode and enqueue, nothing else.

use std::sync::{Arc, OnceLock};

use gather_net::messages::{self, MessageError, decode_body, read_reply};
use gather_net::{
    Channel, Connection, ConnectionId, DisconnectReason, Frame, FrameTag, JoinReply,
    PlayerJoined, PlayerLeft, PlayersInGame, SessionId, TransportHandler, split_frames,
};

use crate::event_queue::{ClientEvent, EventQueue};

/// Decodes server packets into [`ClientEvent`]s.
///
/// The first session id from a success reply is recorded here, on the
/// network thread, only to recognise duplicate or conflicting replies. The
/// game sees the session through the `Joined` event.
#[derive(Debug)]
pub struct InboundHandler {
    queue: Arc<EventQueue>,
    session: OnceLock<SessionId>,
}

impl InboundHandler {
    /// Create a handler feeding `queue`.
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self {
            queue,
            session: OnceLock::new(),
        }
    }

    /// The session joined, once a success reply has arrived.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.get().copied()
    }

    /// Decode every frame of `packet` and enqueue the results. A malformed
    /// frame ends processing of the packet.
    pub fn handle_packet(&self, channel: Channel, packet: &[u8]) {
        for frame in split_frames(packet) {
            let result = frame
                .map_err(MessageError::from)
                .and_then(|frame| self.handle_frame(channel, &frame));
            if let Err(e) = result {
                tracing::warn!("Malformed packet from server: {e}");
                break;
            }
        }
    }

    fn handle_frame(&self, channel: Channel, frame: &Frame<'_>) -> Result<(), MessageError> {
        match frame.kind() {
            Some(FrameTag::CreateGame | FrameTag::JoinGame) => {
                let reply = read_reply(frame)?;
                self.handle_reply(reply);
            }
            Some(FrameTag::PlayerJoined) => {
                let body: PlayerJoined = decode_body(frame.payload)?;
                self.queue.push(ClientEvent::PlayerJoined(body.player_id));
            }
            Some(FrameTag::PlayersInGame) => {
                let body: PlayersInGame = decode_body(frame.payload)?;
                self.queue.push(ClientEvent::PlayersInGame(body.players));
            }
            Some(FrameTag::PlayerLeft) => {
                let body: PlayerLeft = decode_body(frame.payload)?;
                self.queue.push(ClientEvent::PlayerLeft(body.player_id));
            }
            Some(FrameTag::GameData) => {
                let (session_id, data) = messages::read_game_data(frame.payload)?;
                self.queue.push(ClientEvent::GameData {
                    channel,
                    session_id,
                    data: data.to_vec(),
                });
            }
            None => tracing::debug!("Ignoring unknown tag {}", frame.raw_tag),
        }
        Ok(())
    }

    fn handle_reply(&self, reply: JoinReply) {
        let received = match reply {
            JoinReply::Failed(code) => {
                self.queue.push(ClientEvent::RequestFailed(code));
                return;
            }
            JoinReply::Joined(id) => id,
        };

        match self.session.set(received) {
            Ok(()) => self.queue.push(ClientEvent::Joined(received)),
            Err(_) => match self.session.get().copied() {
                Some(current) if current == received => {
                    tracing::debug!("Duplicate reply for {received}");
                }
                Some(current) => {
                    tracing::warn!("Server reported {received} while already in {current}");
                    self.queue
                        .push(ClientEvent::SessionConflict { current, received });
                }
                None => {}
            },
        }
    }
}

impl TransportHandler for InboundHandler {
    fn on_connected(&self, connection: Arc<dyn Connection>, _handshake: &[u8]) -> bool {
        tracing::debug!("Transport up as {:?}", connection.id());
        true
    }

    fn on_data(&self, _id: ConnectionId, channel: Channel, packet: &[u8]) {
        self.handle_packet(channel, packet);
    }

    fn on_disconnected(&self, _id: ConnectionId, reason: DisconnectReason) {
        // Events still queued describe a session this client has lost.
        self.queue.clear();
        self.queue.push(ClientEvent::Disconnected(reason.to_string()));
    }
}
