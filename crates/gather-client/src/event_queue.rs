//! Hand-off of decoded network events to the tick thread.
//!
//! Network callbacks push [`ClientEvent`]s from any thread. The tick thread
//! swaps the whole pending list out under the lock and dispatches it after
//! releasing the lock, so handlers never run while a producer is blocked and
//! an event pushed during a drain waits for the next one.

use std::sync::{Mutex, MutexGuard};

use gather_net::{Channel, ErrorCode, PlayerId, SessionId};

/// A decoded network event awaiting the tick thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A create or join succeeded; the client is now in this session.
    Joined(SessionId),
    /// A create or join was refused.
    RequestFailed(ErrorCode),
    /// Another player entered the session.
    PlayerJoined(PlayerId),
    /// The members present when this client joined.
    PlayersInGame(Vec<PlayerId>),
    /// A member left the session.
    PlayerLeft(PlayerId),
    /// Application data relayed from another member.
    GameData {
        /// Channel it arrived on.
        channel: Channel,
        /// Session named in the frame.
        session_id: SessionId,
        /// Application bytes.
        data: Vec<u8>,
    },
    /// A success reply named a different session than the one already
    /// joined. The client state is ambiguous; reconnecting is advised.
    SessionConflict {
        /// The session joined first.
        current: SessionId,
        /// The session named by the later reply.
        received: SessionId,
    },
    /// The connection ended.
    Disconnected(String),
}

/// Receives dispatched events. Every method defaults to doing nothing.
pub trait EventHandler {
    /// See [`ClientEvent::Joined`].
    fn on_joined(&mut self, _session: SessionId) {}
    /// See [`ClientEvent::RequestFailed`].
    fn on_request_failed(&mut self, _code: ErrorCode) {}
    /// See [`ClientEvent::PlayerJoined`].
    fn on_player_joined(&mut self, _player: PlayerId) {}
    /// See [`ClientEvent::PlayersInGame`].
    fn on_players_in_game(&mut self, _players: &[PlayerId]) {}
    /// See [`ClientEvent::PlayerLeft`].
    fn on_player_left(&mut self, _player: PlayerId) {}
    /// See [`ClientEvent::GameData`].
    fn on_game_data(&mut self, _channel: Channel, _session: SessionId, _data: &[u8]) {}
    /// See [`ClientEvent::SessionConflict`].
    fn on_session_conflict(&mut self, _current: SessionId, _received: SessionId) {}
    /// See [`ClientEvent::Disconnected`].
    fn on_disconnected(&mut self, _reason: &str) {}
}

impl ClientEvent {
    /// Call the matching `handler` method.
    pub fn dispatch<H: EventHandler + ?Sized>(&self, handler: &mut H) {
        match self {
            Self::Joined(session) => handler.on_joined(*session),
            Self::RequestFailed(code) => handler.on_request_failed(*code),
            Self::PlayerJoined(player) => handler.on_player_joined(*player),
            Self::PlayersInGame(players) => handler.on_players_in_game(players),
            Self::PlayerLeft(player) => handler.on_player_left(*player),
            Self::GameData {
                channel,
                session_id,
                data,
            } => handler.on_game_data(*channel, *session_id, data),
            Self::SessionConflict { current, received } => {
                handler.on_session_conflict(*current, *received)
            }
            Self::Disconnected(reason) => handler.on_disconnected(reason),
        }
    }
}

/// Multi-producer, single-consumer FIFO of [`ClientEvent`]s.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<Vec<ClientEvent>>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ClientEvent>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event.
    pub fn push(&self, event: ClientEvent) {
        self.lock().push(event);
    }

    /// Take every pending event, oldest first.
    pub fn drain(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// Drain and dispatch to `handler`. Returns the number dispatched.
    pub fn drain_into<H: EventHandler + ?Sized>(&self, handler: &mut H) -> usize {
        let events = self.drain();
        for event in &events {
            event.dispatch(handler);
        }
        events.len()
    }

    /// Discard every pending event.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Vec<String>);

    impl EventHandler for Log {
        fn on_joined(&mut self, session: SessionId) {
            self.0.push(format!("joined {}", session.0));
        }
        fn on_player_joined(&mut self, player: PlayerId) {
            self.0.push(format!("player {}", player.0));
        }
        fn on_disconnected(&mut self, reason: &str) {
            self.0.push(format!("gone: {reason}"));
        }
    }

    #[test]
    fn test_fifo_dispatch() {
        let queue = EventQueue::new();
        queue.push(ClientEvent::Joined(SessionId(3)));
        queue.push(ClientEvent::PlayerJoined(PlayerId(8)));
        queue.push(ClientEvent::Disconnected("bye".into()));

        let mut log = Log::default();
        assert_eq!(queue.drain_into(&mut log), 3);
        assert_eq!(log.0, vec!["joined 3", "player 8", "gone: bye"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unhandled_events_are_ignored() {
        let queue = EventQueue::new();
        queue.push(ClientEvent::PlayerLeft(PlayerId(1)));
        queue.push(ClientEvent::RequestFailed(ErrorCode::SessionNotFound));
        let mut log = Log::default();
        assert_eq!(queue.drain_into(&mut log), 2);
        assert!(log.0.is_empty());
    }

    #[test]
    fn test_event_pushed_during_drain_waits_for_next_drain() {
        struct Requeue<'a> {
            queue: &'a EventQueue,
            seen: Vec<PlayerId>,
        }
        impl EventHandler for Requeue<'_> {
            fn on_player_joined(&mut self, player: PlayerId) {
                self.seen.push(player);
                if player.0 < 3 {
                    self.queue.push(ClientEvent::PlayerJoined(PlayerId(player.0 + 1)));
                }
            }
        }

        let queue = EventQueue::new();
        queue.push(ClientEvent::PlayerJoined(PlayerId(1)));
        let mut handler = Requeue {
            queue: &queue,
            seen: Vec::new(),
        };
        assert_eq!(queue.drain_into(&mut handler), 1);
        assert_eq!(handler.seen, vec![PlayerId(1)]);
        assert_eq!(queue.drain_into(&mut handler), 1);
        assert_eq!(handler.seen, vec![PlayerId(1), PlayerId(2)]);
    }

    #[test]
    fn test_per_producer_order_preserved_across_threads() {
        const PER_THREAD: u32 = 500;
        let queue = EventQueue::new();
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let queue = &queue;
                s.spawn(move || {
                    for i in 0..PER_THREAD {
                        queue.push(ClientEvent::PlayerJoined(PlayerId(t * PER_THREAD + i)));
                    }
                });
            }
        });

        let events = queue.drain();
        assert_eq!(events.len(), 4 * PER_THREAD as usize);
        let mut last = [None::<u32>; 4];
        for event in events {
            let ClientEvent::PlayerJoined(PlayerId(n)) = event else {
                panic!("unexpected {event:?}");
            };
            let producer = (n / PER_THREAD) as usize;
            if let Some(prev) = last[producer] {
                assert!(n > prev, "producer {producer} reordered");
            }
            last[producer] = Some(n);
        }
    }

    #[test]
    fn test_clear() {
        let queue = EventQueue::new();
        queue.push(ClientEvent::Joined(SessionId(1)));
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.drain().is_empty());
    }
}
