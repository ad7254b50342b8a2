//! One game session and its roster.
//!
//! The roster mutex is the session's critical section: joins, departures and
//! broadcasts are serialized per session, while different sessions never
//! contend. Sends happen inside the section but never fail it; a failed send
//! is logged and the remaining members are still served.

use std::sync::{Arc, Mutex, MutexGuard};

use gather_net::messages::{self, MessageError};
use gather_net::{Channel, Connection, PlayerId, PlayerJoined, PlayerLeft, PlayersInGame, SessionId};

/// A roster entry: a player id and where to reach it.
#[derive(Clone)]
pub struct Member {
    /// The member's player id.
    pub id: PlayerId,
    /// The member's connection.
    pub connection: Arc<dyn Connection>,
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .finish()
    }
}

/// Errors from [`Session::add_player`].
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// The session emptied and was retired before the join.
    #[error("{0} is closed")]
    Closed(SessionId),

    /// The roster snapshot could not be encoded.
    #[error("failed to encode roster: {0}")]
    Encode(#[from] MessageError),
}

/// Result of [`Session::remove_player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The player was not in the roster.
    NotMember,
    /// The player left; other members remain.
    Left,
    /// The player was the last member; the session is now closed.
    Closed,
}

#[derive(Debug, Default)]
struct Roster {
    members: Vec<Member>,
    closed: bool,
}

/// A game session: id plus join-ordered roster.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    roster: Mutex<Roster>,
}

impl Session {
    /// Create an empty, open session.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            roster: Mutex::new(Roster::default()),
        }
    }

    /// This session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn lock_roster(&self) -> MutexGuard<'_, Roster> {
        // A panic while holding the lock leaves the roster itself intact.
        self.roster.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `member` to the roster.
    ///
    /// Within one critical section: every existing member is sent
    /// `PlayerJoined`, the member is appended, and the new member is sent
    /// `PlayersInGame` listing exactly the members present before it. A
    /// concurrent join is therefore either fully before or fully after this
    /// one from every member's point of view.
    pub fn add_player(&self, member: Member) -> Result<(), JoinError> {
        let joined = messages::body_frame(&PlayerJoined {
            player_id: member.id,
        })?;

        let mut roster = self.lock_roster();
        if roster.closed {
            return Err(JoinError::Closed(self.id));
        }

        let snapshot = PlayersInGame {
            players: roster.members.iter().map(|m| m.id).collect(),
        };
        // Encode before mutating so a failure leaves no partial join behind.
        let roster_frame = messages::body_frame(&snapshot)?;

        for existing in &roster.members {
            self.send_to(existing, Channel::Reliable, &joined);
        }
        roster.members.push(member.clone());
        self.send_to(&member, Channel::Reliable, &roster_frame);

        tracing::debug!(
            "{} joined {} ({} members)",
            member.id,
            self.id,
            roster.members.len()
        );
        Ok(())
    }

    /// Remove `player` from the roster and tell the remaining members.
    ///
    /// Removing the last member closes the session: later joins fail with
    /// [`JoinError::Closed`].
    pub fn remove_player(&self, player: PlayerId) -> Departure {
        let left = match messages::body_frame(&PlayerLeft { player_id: player }) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("Failed to encode PlayerLeft for {player}: {e}");
                None
            }
        };

        let mut roster = self.lock_roster();
        let Some(pos) = roster.members.iter().position(|m| m.id == player) else {
            return Departure::NotMember;
        };
        roster.members.remove(pos);

        if roster.members.is_empty() {
            roster.closed = true;
            return Departure::Closed;
        }
        if let Some(left) = left {
            for member in &roster.members {
                self.send_to(member, Channel::Reliable, &left);
            }
        }
        Departure::Left
    }

    /// Send `packet` to every member.
    pub fn broadcast(&self, channel: Channel, packet: &[u8]) {
        let roster = self.lock_roster();
        for member in &roster.members {
            self.send_to(member, channel, packet);
        }
    }

    /// Send `packet` to every member except `sender`.
    pub fn broadcast_except(&self, sender: PlayerId, channel: Channel, packet: &[u8]) {
        let roster = self.lock_roster();
        for member in roster.members.iter().filter(|m| m.id != sender) {
            self.send_to(member, channel, packet);
        }
    }

    /// Member ids in join order.
    pub fn members(&self) -> Vec<PlayerId> {
        self.lock_roster().members.iter().map(|m| m.id).collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.lock_roster().members.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.lock_roster().members.is_empty()
    }

    /// Whether the session has been retired.
    pub fn is_closed(&self) -> bool {
        self.lock_roster().closed
    }

    fn send_to(&self, member: &Member, channel: Channel, packet: &[u8]) {
        if let Err(e) = member.connection.send(channel, packet) {
            tracing::warn!(
                "Send to {} in {} on {channel} failed: {e}",
                member.id,
                self.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_net::messages::decode_body;
    use gather_net::{ConnectionId, FrameTag, MemoryConnection, split_frames};

    fn member(id: u32) -> (Member, Arc<MemoryConnection>) {
        let conn = Arc::new(MemoryConnection::new(ConnectionId(u64::from(id))));
        let member = Member {
            id: PlayerId(id),
            connection: Arc::clone(&conn) as Arc<dyn Connection>,
        };
        (member, conn)
    }

    /// Decode every frame `conn` was sent, as (tag, payload) pairs.
    fn received(conn: &MemoryConnection) -> Vec<(FrameTag, Vec<u8>)> {
        conn.take_sent()
            .iter()
            .flat_map(|(_, packet)| {
                split_frames(packet)
                    .map(|f| {
                        let f = f.unwrap();
                        (f.kind().unwrap(), f.payload.to_vec())
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_first_member_gets_empty_roster() {
        let session = Session::new(SessionId(1));
        let (m1, c1) = member(1);
        session.add_player(m1).unwrap();

        let frames = received(&c1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, FrameTag::PlayersInGame);
        let roster: PlayersInGame = decode_body(&frames[0].1).unwrap();
        assert!(roster.players.is_empty());
    }

    #[test]
    fn test_join_notifies_existing_and_snapshots_previous() {
        let session = Session::new(SessionId(1));
        let (m1, c1) = member(1);
        let (m2, c2) = member(2);
        session.add_player(m1).unwrap();
        c1.take_sent();
        session.add_player(m2).unwrap();

        let to_first = received(&c1);
        assert_eq!(to_first.len(), 1);
        assert_eq!(to_first[0].0, FrameTag::PlayerJoined);
        let joined: PlayerJoined = decode_body(&to_first[0].1).unwrap();
        assert_eq!(joined.player_id, PlayerId(2));

        let to_second = received(&c2);
        let roster: PlayersInGame = decode_body(&to_second[0].1).unwrap();
        assert_eq!(roster.players, vec![PlayerId(1)]);
        assert_eq!(session.members(), vec![PlayerId(1), PlayerId(2)]);
    }

    #[test]
    fn test_failed_send_does_not_abort_broadcast() {
        let session = Session::new(SessionId(1));
        let (m1, c1) = member(1);
        let (m2, c2) = member(2);
        let (m3, c3) = member(3);
        session.add_player(m1).unwrap();
        session.add_player(m2).unwrap();
        c1.take_sent();
        c2.take_sent();

        c1.set_fail_sends(true);
        session.add_player(m3).unwrap();
        assert_eq!(c1.sent_count(), 0);
        assert_eq!(received(&c2)[0].0, FrameTag::PlayerJoined);
        // The join itself stands even though one notification was lost.
        assert_eq!(session.len(), 3);
        let roster: PlayersInGame = decode_body(&received(&c3)[0].1).unwrap();
        assert_eq!(roster.players, vec![PlayerId(1), PlayerId(2)]);
    }

    #[test]
    fn test_broadcast_except_skips_sender() {
        let session = Session::new(SessionId(4));
        let (m1, c1) = member(1);
        let (m2, c2) = member(2);
        session.add_player(m1).unwrap();
        session.add_player(m2).unwrap();
        c1.take_sent();
        c2.take_sent();

        session.broadcast_except(PlayerId(1), Channel::Unreliable, b"state");
        assert_eq!(c1.sent_count(), 0);
        assert_eq!(c2.take_sent(), vec![(Channel::Unreliable, b"state".to_vec())]);

        session.broadcast(Channel::Reliable, b"all");
        assert_eq!(c1.sent_count(), 1);
        assert_eq!(c2.sent_count(), 1);
    }

    #[test]
    fn test_remove_player_notifies_and_closes_when_empty() {
        let session = Session::new(SessionId(1));
        let (m1, c1) = member(1);
        let (m2, _c2) = member(2);
        session.add_player(m1).unwrap();
        session.add_player(m2).unwrap();
        c1.take_sent();

        assert_eq!(session.remove_player(PlayerId(2)), Departure::Left);
        let frames = received(&c1);
        assert_eq!(frames[0].0, FrameTag::PlayerLeft);
        let left: PlayerLeft = decode_body(&frames[0].1).unwrap();
        assert_eq!(left.player_id, PlayerId(2));

        assert_eq!(session.remove_player(PlayerId(2)), Departure::NotMember);
        assert_eq!(session.remove_player(PlayerId(1)), Departure::Closed);
        assert!(session.is_closed());

        let (m3, _c3) = member(3);
        assert!(matches!(
            session.add_player(m3),
            Err(JoinError::Closed(SessionId(1)))
        ));
    }

    #[test]
    fn test_concurrent_joins_keep_rosters_consistent() {
        const JOINERS: u32 = 32;
        let session = Session::new(SessionId(1));
        let members: Vec<_> = (1..=JOINERS).map(member).collect();

        std::thread::scope(|s| {
            for (m, _) in &members {
                let session = &session;
                let m = m.clone();
                s.spawn(move || session.add_player(m).unwrap());
            }
        });

        // Join order is whatever the lock decided; the roster records it.
        let order = session.members();
        assert_eq!(order.len(), JOINERS as usize);

        for (k, joiner) in order.iter().enumerate() {
            let conn = &members[(joiner.0 - 1) as usize].1;
            let frames = received(conn);

            // First frame is the snapshot of exactly the earlier joiners.
            assert_eq!(frames[0].0, FrameTag::PlayersInGame);
            let roster: PlayersInGame = decode_body(&frames[0].1).unwrap();
            assert_eq!(roster.players, order[..k].to_vec());

            // Then exactly one PlayerJoined per later joiner, in join order.
            let later: Vec<PlayerId> = frames[1..]
                .iter()
                .map(|(tag, payload)| {
                    assert_eq!(*tag, FrameTag::PlayerJoined);
                    decode_body::<PlayerJoined>(payload).unwrap().player_id
                })
                .collect();
            assert_eq!(later, order[k + 1..].to_vec());
        }
    }
}
