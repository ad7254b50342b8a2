//! Tagged sub-message framing.
//!
//! One transport packet carries zero or more frames back to back:
//!
//! ```text
//! +-----------+-------------------+--------------------+
//! | tag (u8)  | length (u16 LE)   |   payload          |
//! |           |                   |   (length bytes)   |
//! +-----------+-------------------+--------------------+
//! ```
//!
//! The length does **not** include the 3 header bytes. Packing several frames
//! into one packet amortizes per-packet overhead for small real-time updates,
//! so readers must iterate with [`split_frames`] until the packet is exhausted
//! rather than assume one frame per packet.
//!
//! Frames returned by [`split_frames`] borrow from the packet. The borrow
//! checker keeps the packet buffer alive (and unrecycled) until every frame
//! view derived from it is gone.

use std::iter::FusedIterator;

/// Bytes of header in front of every frame payload: tag + u16 length.
pub const FRAME_HEADER_LEN: usize = 3;

/// Largest payload a single frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    /// Client asks for a new session; server replies with the id or an error.
    CreateGame = 0,
    /// Client asks to join a session by id; server replies with the id or an error.
    JoinGame = 1,
    /// A player entered the recipient's session.
    PlayerJoined = 2,
    /// Roster snapshot sent to a player right after it joins.
    PlayersInGame = 3,
    /// Application state batch, prefixed by the session id.
    GameData = 4,
    /// A player left the recipient's session.
    PlayerLeft = 5,
}

impl TryFrom<u8> for FrameTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::CreateGame,
            1 => Self::JoinGame,
            2 => Self::PlayerJoined,
            3 => Self::PlayersInGame,
            4 => Self::GameData,
            5 => Self::PlayerLeft,
            other => return Err(other),
        })
    }
}

/// Errors raised while building frames.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The payload does not fit the u16 length field.
    #[error("frame payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Largest encodable payload.
        max: usize,
    },

    /// `start_frame` was called while another frame was still open.
    #[error("a frame is already open")]
    FrameAlreadyOpen,

    /// `end_frame` was called with no open frame.
    #[error("no frame is open")]
    NoOpenFrame,
}

/// Errors raised while splitting or reading frames.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than [`FRAME_HEADER_LEN`] bytes remained for a frame header.
    #[error("truncated frame header: {available} of {FRAME_HEADER_LEN} bytes")]
    TruncatedHeader {
        /// Bytes left in the packet.
        available: usize,
    },

    /// The header declared more payload than the packet holds.
    #[error("truncated frame payload: declared {declared} bytes, {available} available")]
    TruncatedPayload {
        /// Length from the header.
        declared: usize,
        /// Bytes left in the packet.
        available: usize,
    },

    /// A payload read ran past the end of the payload.
    #[error("short read: needed {needed} bytes, {available} available")]
    ShortRead {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// A payload was longer than its message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// A negative reply value that is not a known error code.
    #[error("unknown error code {0}")]
    UnknownErrorCode(i32),
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Incremental frame builder that can hold several frames in one buffer.
///
/// A frame is opened with [`start_frame`](Self::start_frame), filled with the
/// `write_*` methods, and closed with [`end_frame`](Self::end_frame), which
/// patches the length field. Writes made while no frame is open land in the
/// buffer unframed; callers keep a frame open while writing.
#[derive(Debug, Default, Clone)]
pub struct FrameWriter {
    buf: Vec<u8>,
    open_at: Option<usize>,
}

impl FrameWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new frame with the given tag.
    pub fn start_frame(&mut self, tag: FrameTag) -> Result<(), EncodeError> {
        if self.open_at.is_some() {
            return Err(EncodeError::FrameAlreadyOpen);
        }
        self.open_at = Some(self.buf.len());
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0]);
        Ok(())
    }

    /// Append a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Payload bytes written into the open frame so far, if one is open.
    pub fn open_payload_len(&self) -> Option<usize> {
        self.open_at
            .map(|start| self.buf.len() - start - FRAME_HEADER_LEN)
    }

    /// Close the open frame, writing its length into the header.
    ///
    /// An oversized frame is discarded from the buffer and reported.
    pub fn end_frame(&mut self) -> Result<(), EncodeError> {
        let start = self.open_at.take().ok_or(EncodeError::NoOpenFrame)?;
        let len = self.buf.len() - start - FRAME_HEADER_LEN;
        let Ok(len) = u16::try_from(len) else {
            self.buf.truncate(start);
            return Err(EncodeError::PayloadTooLarge {
                size: len,
                max: MAX_FRAME_PAYLOAD,
            });
        };
        self.buf[start + 1..start + FRAME_HEADER_LEN].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Append a complete frame.
    pub fn push_frame(&mut self, tag: FrameTag, payload: &[u8]) -> Result<(), EncodeError> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        self.start_frame(tag)?;
        self.write_bytes(payload);
        self.end_frame()
    }

    /// Whether a frame is currently open.
    pub fn is_frame_open(&self) -> bool {
        self.open_at.is_some()
    }

    /// Total bytes in the buffer, headers included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The encoded bytes. Only a valid packet when no frame is open.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Drop all content, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.open_at = None;
    }

    /// Consume the writer, returning the packet.
    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        if self.open_at.is_some() {
            return Err(EncodeError::FrameAlreadyOpen);
        }
        Ok(self.buf)
    }
}

/// Encode a single frame: tag, length, payload.
pub fn encode_frame(tag: FrameTag, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut writer = FrameWriter {
        buf: Vec::with_capacity(FRAME_HEADER_LEN + payload.len()),
        open_at: None,
    };
    writer.push_frame(tag, payload)?;
    writer.finish()
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One frame borrowed from its packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Raw tag byte. May be a tag this build does not know.
    pub raw_tag: u8,
    /// Payload view into the parent packet.
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// The tag, if it is one this build knows.
    pub fn kind(&self) -> Option<FrameTag> {
        FrameTag::try_from(self.raw_tag).ok()
    }

    /// A cursor over this frame's payload.
    pub fn reader(&self) -> PayloadReader<'a> {
        PayloadReader::new(self.payload)
    }
}

/// Iterator over the frames of one packet. See [`split_frames`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    packet: &'a [u8],
    cursor: usize,
    failed: bool,
}

/// Split a packet into its frames, in order.
///
/// Yields `Err` once for a malformed frame and then stops: frames after a
/// corrupt header cannot be located, so the rest of the packet is abandoned.
pub fn split_frames(packet: &[u8]) -> Frames<'_> {
    Frames {
        packet,
        cursor: 0,
        failed: false,
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.packet.len() {
            return None;
        }

        let rest = &self.packet[self.cursor..];
        if rest.len() < FRAME_HEADER_LEN {
            self.failed = true;
            return Some(Err(DecodeError::TruncatedHeader {
                available: rest.len(),
            }));
        }

        let raw_tag = rest[0];
        let declared = usize::from(u16::from_le_bytes([rest[1], rest[2]]));
        let body = &rest[FRAME_HEADER_LEN..];
        if body.len() < declared {
            self.failed = true;
            return Some(Err(DecodeError::TruncatedPayload {
                declared,
                available: body.len(),
            }));
        }

        self.cursor += FRAME_HEADER_LEN + declared;
        Some(Ok(Frame {
            raw_tag,
            payload: &body[..declared],
        }))
    }
}

impl FusedIterator for Frames<'_> {}

/// Sequential reader over a frame payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if available < len {
            return Err(DecodeError::ShortRead {
                needed: len,
                available,
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Consume and return everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Require that the payload was fully consumed.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
