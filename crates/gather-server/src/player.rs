//! Per-connection player: request dispatch and the create/join transition.

use std::sync::{Arc, Mutex, MutexGuard};

use gather_net::messages::{self, reply_frame};
use gather_net::{
    Channel, Connection, ErrorCode, FrameTag, FrameWriter, JoinReply, PlayerId, SessionId,
    split_frames,
};

use crate::registry::SessionRegistry;
use crate::session::{Departure, Member};

/// A connected player.
///
/// `current_session` moves from `None` to a session id at most once. The
/// player lock is held across the whole create/join, so duplicate requests
/// from one connection are serialized and only the first can succeed. Lock
/// order is player, then session roster.
pub struct Player {
    id: PlayerId,
    client_version: i32,
    connection: Arc<dyn Connection>,
    current_session: Mutex<Option<SessionId>>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("client_version", &self.client_version)
            .field("connection", &self.connection.id())
            .field("current_session", &self.current_session())
            .finish()
    }
}

impl Player {
    /// Create a player not yet in any session.
    pub fn new(id: PlayerId, client_version: i32, connection: Arc<dyn Connection>) -> Self {
        Self {
            id,
            client_version,
            connection,
            current_session: Mutex::new(None),
        }
    }

    /// This player's id.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Version announced in the handshake.
    pub fn client_version(&self) -> i32 {
        self.client_version
    }

    /// The session this player belongs to, if any.
    pub fn current_session(&self) -> Option<SessionId> {
        *self.lock_session()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.current_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn member(&self) -> Member {
        Member {
            id: self.id,
            connection: Arc::clone(&self.connection),
        }
    }

    /// Process every frame in one incoming packet.
    ///
    /// A malformed frame stops processing of the rest of the packet. Valid
    /// `GameData` frames are relayed to the other session members as one
    /// packet on the channel they arrived on.
    pub fn handle_packet(&self, channel: Channel, packet: &[u8], registry: &SessionRegistry) {
        let mut relay = FrameWriter::new();

        for frame in split_frames(packet) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Malformed packet from {}: {e}", self.id);
                    break;
                }
            };

            match frame.kind() {
                Some(FrameTag::CreateGame) => {
                    let reply = self.create_game(registry);
                    self.send_reply(FrameTag::CreateGame, reply);
                }
                Some(FrameTag::JoinGame) => {
                    // Read the id even if the join will be refused.
                    let requested = match frame.reader().read_i32() {
                        Ok(id) => SessionId(id),
                        Err(e) => {
                            tracing::warn!("Malformed JoinGame from {}: {e}", self.id);
                            break;
                        }
                    };
                    let reply = self.join_game(requested, registry);
                    self.send_reply(FrameTag::JoinGame, reply);
                }
                Some(FrameTag::GameData) => {
                    let session = match messages::read_game_data(frame.payload) {
                        Ok((session, _)) => session,
                        Err(e) => {
                            tracing::warn!("Malformed GameData from {}: {e}", self.id);
                            break;
                        }
                    };
                    if self.current_session() != Some(session) {
                        tracing::warn!(
                            "Dropping GameData from {} for {session}, not its session",
                            self.id
                        );
                        continue;
                    }
                    if let Err(e) = relay.push_frame(FrameTag::GameData, frame.payload) {
                        tracing::warn!("Cannot relay GameData from {}: {e}", self.id);
                    }
                }
                Some(other) => {
                    tracing::debug!("Ignoring server-only {other:?} frame from {}", self.id);
                }
                None => {
                    tracing::debug!("Ignoring unknown tag {} from {}", frame.raw_tag, self.id);
                }
            }
        }

        if !relay.is_empty() {
            self.relay(channel, relay.as_bytes(), registry);
        }
    }

    /// Create a session and join it as its first member.
    pub fn create_game(&self, registry: &SessionRegistry) -> JoinReply {
        let mut current = self.lock_session();
        if current.is_some() {
            return JoinReply::Failed(ErrorCode::AlreadyInSession);
        }

        let Some(session) = registry.create_session() else {
            tracing::error!("Session ids exhausted, refusing CreateGame from {}", self.id);
            return JoinReply::Failed(ErrorCode::SessionNotFound);
        };
        if let Err(e) = session.add_player(self.member()) {
            tracing::error!("{} could not enter new {}: {e}", self.id, session.id());
            return JoinReply::Failed(ErrorCode::SessionNotFound);
        }
        *current = Some(session.id());
        registry.publish(Arc::clone(&session));

        tracing::info!("{} created {}", self.id, session.id());
        JoinReply::Joined(session.id())
    }

    /// Join the published session `requested`.
    pub fn join_game(&self, requested: SessionId, registry: &SessionRegistry) -> JoinReply {
        let mut current = self.lock_session();
        if current.is_some() {
            return JoinReply::Failed(ErrorCode::AlreadyInSession);
        }

        let Some(session) = registry.lookup(requested) else {
            tracing::debug!("{} asked for unknown {requested}", self.id);
            return JoinReply::Failed(ErrorCode::SessionNotFound);
        };
        if let Err(e) = session.add_player(self.member()) {
            tracing::debug!("{} could not join {requested}: {e}", self.id);
            return JoinReply::Failed(ErrorCode::SessionNotFound);
        }
        *current = Some(requested);

        tracing::info!("{} joined {requested}", self.id);
        JoinReply::Joined(requested)
    }

    /// Leave the current session after disconnect. An emptied session is
    /// unpublished.
    pub fn leave(&self, registry: &SessionRegistry) {
        let current = self.lock_session();
        let Some(session_id) = *current else {
            return;
        };
        let Some(session) = registry.lookup(session_id) else {
            return;
        };

        match session.remove_player(self.id) {
            Departure::Closed => {
                registry.remove(&session);
                tracing::info!("{session_id} closed, last member {} left", self.id);
            }
            Departure::Left => tracing::debug!("{} left {session_id}", self.id),
            Departure::NotMember => {}
        }
    }

    fn relay(&self, channel: Channel, packet: &[u8], registry: &SessionRegistry) {
        let Some(session_id) = self.current_session() else {
            return;
        };
        if let Some(session) = registry.lookup(session_id) {
            session.broadcast_except(self.id, channel, packet);
        }
    }

    fn send_reply(&self, tag: FrameTag, reply: JoinReply) {
        if let Err(e) = self
            .connection
            .send(Channel::Reliable, &reply_frame(tag, reply))
        {
            tracing::warn!("Reply to {} failed: {e}", self.id);
        }
    }
}
