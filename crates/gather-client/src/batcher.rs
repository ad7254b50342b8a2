//! Rate-bounded outbound batching of `GameData`.
//!
//! Each channel keeps one open `GameData` frame headed by the session id.
//! Application writes append to it; at most once per `min_interval` the frame
//! is closed, sent as one packet, and a fresh frame is opened. A frame that
//! holds only its header is never sent.

use std::time::Duration;

use gather_net::messages::{self, GAME_DATA_HEADER_LEN};
use gather_net::udp::MAX_PACKET;
use gather_net::{
    Channel, Connection, FRAME_HEADER_LEN, FrameWriter, MAX_FRAME_PAYLOAD, SessionId,
};

/// Bytes of session header inside the `GameData` payload.
const SESSION_HEADER_LEN: usize = GAME_DATA_HEADER_LEN - FRAME_HEADER_LEN;

/// Errors from [`OutboundBatcher::write`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    /// No session has been joined yet.
    #[error("not in a session")]
    NotInSession,

    /// The write does not fit in the current interval's packet.
    #[error("write of {size} bytes does not fit, {available} bytes left in this interval")]
    FrameFull {
        /// Size of the rejected write.
        size: usize,
        /// Room left in the open frame.
        available: usize,
    },
}

/// Per-channel `GameData` accumulator.
#[derive(Debug)]
pub struct OutboundBatcher {
    min_interval: Duration,
    max_data: usize,
    elapsed: Duration,
    session: Option<SessionId>,
    buffers: [FrameWriter; 2],
}

impl OutboundBatcher {
    /// Create a batcher that sends at most once per `min_interval` per channel,
    /// sized for the UDP transport's largest packet.
    pub fn new(min_interval: Duration) -> Self {
        Self::with_packet_limit(min_interval, MAX_PACKET)
    }

    /// Create a batcher whose packets never exceed `max_packet` bytes.
    pub fn with_packet_limit(min_interval: Duration, max_packet: usize) -> Self {
        let max_packet = max_packet.min(FRAME_HEADER_LEN + MAX_FRAME_PAYLOAD);
        Self {
            min_interval,
            max_data: max_packet.saturating_sub(GAME_DATA_HEADER_LEN),
            elapsed: Duration::ZERO,
            session: None,
            buffers: [FrameWriter::new(), FrameWriter::new()],
        }
    }

    /// Start batching for `session`. Pending data for any earlier session is
    /// discarded.
    pub fn arm(&mut self, session: SessionId) {
        self.session = Some(session);
        for buffer in &mut self.buffers {
            reopen(buffer, session);
        }
    }

    /// The session frames are addressed to.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    /// Application bytes waiting on `channel`.
    pub fn pending(&self, channel: Channel) -> usize {
        self.buffers[channel.index()]
            .open_payload_len()
            .map_or(0, |len| len.saturating_sub(SESSION_HEADER_LEN))
    }

    /// Append application bytes to `channel`'s frame.
    pub fn write(&mut self, channel: Channel, bytes: &[u8]) -> Result<(), BatchError> {
        if self.session.is_none() {
            return Err(BatchError::NotInSession);
        }
        let available = self.max_data.saturating_sub(self.pending(channel));
        if bytes.len() > available {
            return Err(BatchError::FrameFull {
                size: bytes.len(),
                available,
            });
        }
        self.buffers[channel.index()].write_bytes(bytes);
        Ok(())
    }

    /// Advance the send timer by `dt`; flush once `min_interval` has passed.
    /// Returns the number of packets sent.
    pub fn tick(&mut self, dt: Duration, connection: &dyn Connection) -> usize {
        self.elapsed += dt;
        if self.elapsed < self.min_interval {
            return 0;
        }
        self.elapsed = Duration::ZERO;
        self.flush(connection)
    }

    /// Send every channel holding data now, ignoring the timer.
    pub fn flush(&mut self, connection: &dyn Connection) -> usize {
        let Some(session) = self.session else {
            return 0;
        };

        let mut sent = 0;
        for channel in Channel::ALL {
            let buffer = &mut self.buffers[channel.index()];
            if buffer.len() <= GAME_DATA_HEADER_LEN {
                continue;
            }
            match buffer.end_frame() {
                Ok(()) => match connection.send(channel, buffer.as_bytes()) {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        tracing::warn!("Sending {} bytes on {channel} failed: {e}", buffer.len());
                    }
                },
                Err(e) => tracing::warn!("Dropping {channel} batch: {e}"),
            }
            reopen(buffer, session);
        }
        sent
    }
}

fn reopen(buffer: &mut FrameWriter, session: SessionId) {
    buffer.clear();
    if let Err(e) = messages::start_game_data(buffer, session) {
        tracing::error!("Cannot open GameData frame: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_net::messages::read_game_data;
    use gather_net::{ConnectionId, FrameTag, MemoryConnection, split_frames};

    const INTERVAL: Duration = Duration::from_millis(100);
    const FRAME_DT: Duration = Duration::from_millis(16);

    fn armed() -> (OutboundBatcher, MemoryConnection) {
        let mut batcher = OutboundBatcher::new(INTERVAL);
        batcher.arm(SessionId(5));
        (batcher, MemoryConnection::new(ConnectionId(1)))
    }

    #[test]
    fn test_write_before_session_refused() {
        let mut batcher = OutboundBatcher::new(INTERVAL);
        assert_eq!(
            batcher.write(Channel::Unreliable, b"x"),
            Err(BatchError::NotInSession)
        );
        let conn = MemoryConnection::new(ConnectionId(1));
        assert_eq!(batcher.flush(&conn), 0);
    }

    #[test]
    fn test_header_only_frames_never_sent() {
        let (mut batcher, conn) = armed();
        for _ in 0..20 {
            batcher.tick(FRAME_DT, &conn);
        }
        assert_eq!(conn.sent_count(), 0);
    }

    #[test]
    fn test_writes_batched_into_one_frame() {
        let (mut batcher, conn) = armed();
        batcher.write(Channel::Unreliable, b"ab").unwrap();
        batcher.write(Channel::Unreliable, b"cd").unwrap();
        assert_eq!(batcher.pending(Channel::Unreliable), 4);
        assert_eq!(batcher.tick(INTERVAL, &conn), 1);

        let sent = conn.take_sent();
        assert_eq!(sent.len(), 1);
        let (channel, packet) = &sent[0];
        assert_eq!(*channel, Channel::Unreliable);
        let frames: Vec<_> = split_frames(packet).map(Result::unwrap).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), Some(FrameTag::GameData));
        let (session, data) = read_game_data(frames[0].payload).unwrap();
        assert_eq!(session, SessionId(5));
        assert_eq!(data, b"abcd");
        assert_eq!(batcher.pending(Channel::Unreliable), 0);
    }

    #[test]
    fn test_at_most_one_packet_per_channel_per_interval() {
        let (mut batcher, conn) = armed();
        let mut sends_per_window = Vec::new();
        let mut window = 0;
        let mut elapsed = Duration::ZERO;

        // One second of 16 ms frames, writing on both channels every frame.
        for _ in 0..63 {
            batcher.write(Channel::Reliable, b"r").unwrap();
            batcher.write(Channel::Unreliable, b"u").unwrap();
            window += batcher.tick(FRAME_DT, &conn);
            elapsed += FRAME_DT;
            if elapsed >= INTERVAL {
                sends_per_window.push(window);
                window = 0;
                elapsed = Duration::ZERO;
            }
        }

        assert!(sends_per_window.iter().all(|&n| n <= 2));
        let sent = conn.take_sent();
        for channel in Channel::ALL {
            let count = sent.iter().filter(|(c, _)| *c == channel).count();
            assert!(count <= 10, "{channel}: {count} packets in ~1s");
            assert!(count >= 9, "{channel}: {count} packets in ~1s");
        }
    }

    #[test]
    fn test_channels_flush_independently() {
        let (mut batcher, conn) = armed();
        batcher.write(Channel::Reliable, b"only").unwrap();
        assert_eq!(batcher.tick(INTERVAL, &conn), 1);
        assert_eq!(conn.take_sent()[0].0, Channel::Reliable);
    }

    #[test]
    fn test_failed_send_rearms() {
        let (mut batcher, conn) = armed();
        conn.set_fail_sends(true);
        batcher.write(Channel::Unreliable, b"lost").unwrap();
        assert_eq!(batcher.tick(INTERVAL, &conn), 0);
        assert_eq!(batcher.pending(Channel::Unreliable), 0);

        conn.set_fail_sends(false);
        batcher.write(Channel::Unreliable, b"next").unwrap();
        assert_eq!(batcher.tick(INTERVAL, &conn), 1);
        let (_, packet) = &conn.take_sent()[0];
        let frame = split_frames(packet).next().unwrap().unwrap();
        assert_eq!(read_game_data(frame.payload).unwrap().1, b"next");
    }

    #[test]
    fn test_frame_full() {
        let (mut batcher, _conn) = armed();
        let room = MAX_PACKET - GAME_DATA_HEADER_LEN;
        batcher
            .write(Channel::Unreliable, &vec![0u8; room])
            .unwrap();
        assert_eq!(
            batcher.write(Channel::Unreliable, b"x"),
            Err(BatchError::FrameFull {
                size: 1,
                available: 0
            })
        );
    }

    #[test]
    fn test_full_batch_fits_one_udp_packet() {
        let (mut batcher, conn) = armed();
        // Fits a frame payload but not a datagram.
        assert!(matches!(
            batcher.write(Channel::Unreliable, &vec![0u8; 65_531]),
            Err(BatchError::FrameFull { .. })
        ));

        batcher
            .write(Channel::Unreliable, &vec![1u8; MAX_PACKET - GAME_DATA_HEADER_LEN])
            .unwrap();
        assert_eq!(batcher.flush(&conn), 1);
        let (_, packet) = &conn.take_sent()[0];
        assert_eq!(packet.len(), MAX_PACKET);
    }

    #[test]
    fn test_custom_packet_limit() {
        let mut batcher = OutboundBatcher::with_packet_limit(INTERVAL, GAME_DATA_HEADER_LEN + 4);
        batcher.arm(SessionId(1));
        batcher.write(Channel::Reliable, b"ab").unwrap();
        assert_eq!(
            batcher.write(Channel::Reliable, b"cde"),
            Err(BatchError::FrameFull {
                size: 3,
                available: 2
            })
        );
        batcher.write(Channel::Reliable, b"cd").unwrap();
        assert_eq!(batcher.pending(Channel::Reliable), 4);
    }

    #[test]
    fn test_rearm_discards_old_session_data() {
        let (mut batcher, conn) = armed();
        batcher.write(Channel::Reliable, b"old").unwrap();
        batcher.arm(SessionId(6));
        assert_eq!(batcher.pending(Channel::Reliable), 0);
        batcher.write(Channel::Reliable, b"new").unwrap();
        batcher.flush(&conn);
        let (_, packet) = &conn.take_sent()[0];
        let frame = split_frames(packet).next().unwrap().unwrap();
        assert_eq!(read_game_data(frame.payload).unwrap().0, SessionId(6));
    }
}
