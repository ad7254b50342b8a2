//! Typed frame bodies and request/reply builders.
//!
//! Fixed-width fields (session ids, reply codes, the handshake version) are
//! little-endian `i32`s. Roster notifications carry player ids as varints via
//! [`postcard`], which keeps a snapshot of a full session compact.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::framing::{
    DecodeError, EncodeError, FRAME_HEADER_LEN, Frame, FrameTag, FrameWriter, PayloadReader,
};
use crate::types::{JoinReply, PlayerId, SessionId};

/// Header bytes of a `GameData` frame before any application data: frame
/// header plus the session id.
pub const GAME_DATA_HEADER_LEN: usize = FRAME_HEADER_LEN + 4;

/// Bytes of a handshake payload: the client version.
pub const HANDSHAKE_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// A frame body encoded with postcard under a fixed tag.
pub trait Body: Serialize + DeserializeOwned {
    /// Tag the body is framed under.
    const TAG: FrameTag;
}

/// Sent to existing members when a player joins their session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoined {
    /// The new member.
    pub player_id: PlayerId,
}

/// Sent to a joining player: the members present before it joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayersInGame {
    /// Member ids in join order.
    pub players: Vec<PlayerId>,
}

/// Sent to remaining members when a player leaves their session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLeft {
    /// The departed member.
    pub player_id: PlayerId,
}

impl Body for PlayerJoined {
    const TAG: FrameTag = FrameTag::PlayerJoined;
}

impl Body for PlayersInGame {
    const TAG: FrameTag = FrameTag::PlayersInGame;
}

impl Body for PlayerLeft {
    const TAG: FrameTag = FrameTag::PlayerLeft;
}

/// Errors from encoding or decoding typed bodies.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Framing failed.
    #[error("framing error: {0}")]
    Encode(#[from] EncodeError),

    /// The payload was malformed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Postcard (de)serialization failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Append `body` to `writer` as one frame.
pub fn write_body<B: Body>(writer: &mut FrameWriter, body: &B) -> Result<(), MessageError> {
    let bytes = postcard::to_allocvec(body)?;
    writer.push_frame(B::TAG, &bytes)?;
    Ok(())
}

/// Encode `body` as a standalone single-frame packet.
pub fn body_frame<B: Body>(body: &B) -> Result<Vec<u8>, MessageError> {
    let mut writer = FrameWriter::new();
    write_body(&mut writer, body)?;
    Ok(writer.finish()?)
}

/// Decode a body from a frame payload, rejecting trailing bytes.
pub fn decode_body<B: Body>(payload: &[u8]) -> Result<B, MessageError> {
    let (body, rest) = postcard::take_from_bytes::<B>(payload)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()).into());
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Requests and replies
// ---------------------------------------------------------------------------

fn int_frame(tag: FrameTag, value: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + 4);
    out.push(tag as u8);
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out
}

/// `CreateGame` request: no payload.
pub fn create_game_request() -> Vec<u8> {
    vec![FrameTag::CreateGame as u8, 0, 0]
}

/// `JoinGame` request for `session`.
pub fn join_game_request(session: SessionId) -> Vec<u8> {
    int_frame(FrameTag::JoinGame, session.0)
}

/// Reply to a `CreateGame` or `JoinGame` request, framed under the request's tag.
pub fn reply_frame(tag: FrameTag, reply: JoinReply) -> Vec<u8> {
    int_frame(tag, reply.to_wire())
}

/// Decode a create/join reply frame.
pub fn read_reply(frame: &Frame<'_>) -> Result<JoinReply, DecodeError> {
    let mut reader = frame.reader();
    let value = reader.read_i32()?;
    reader.finish()?;
    JoinReply::from_wire(value)
}

// ---------------------------------------------------------------------------
// GameData
// ---------------------------------------------------------------------------

/// Open a `GameData` frame on `writer` and write its session header.
pub fn start_game_data(writer: &mut FrameWriter, session: SessionId) -> Result<(), EncodeError> {
    writer.start_frame(FrameTag::GameData)?;
    writer.write_i32(session.0);
    Ok(())
}

/// A single-frame `GameData` packet.
pub fn game_data_frame(session: SessionId, data: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut writer = FrameWriter::new();
    start_game_data(&mut writer, session)?;
    writer.write_bytes(data);
    writer.end_frame()?;
    writer.finish()
}

/// Split a `GameData` payload into its session id and application bytes.
pub fn read_game_data(payload: &[u8]) -> Result<(SessionId, &[u8]), DecodeError> {
    let mut reader = PayloadReader::new(payload);
    let session = SessionId(reader.read_i32()?);
    Ok((session, reader.rest()))
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Reasons a connection handshake is refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// No handshake payload was supplied.
    #[error("empty handshake")]
    Empty,

    /// The payload was too short to hold a version.
    #[error("handshake of {0} bytes is too short")]
    Truncated(usize),

    /// The client version is outside the accepted range.
    #[error("unsupported client version {0}")]
    UnsupportedVersion(i32),
}

/// Handshake payload announcing `client_version`.
pub fn encode_handshake(client_version: i32) -> [u8; HANDSHAKE_LEN] {
    client_version.to_le_bytes()
}

/// Read the client version from a handshake payload. Bytes beyond the
/// version are ignored.
pub fn decode_handshake(data: &[u8]) -> Result<i32, HandshakeError> {
    match data.len() {
        0 => Err(HandshakeError::Empty),
        n if n < HANDSHAKE_LEN => Err(HandshakeError::Truncated(n)),
        _ => Ok(i32::from_le_bytes([data[0], data[1], data[2], data[3]])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::split_frames;
    use crate::types::ErrorCode;

    fn only_frame(packet: &[u8]) -> Frame<'_> {
        let mut frames = split_frames(packet);
        let frame = frames.next().unwrap().unwrap();
        assert!(frames.next().is_none());
        frame
    }

    #[test]
    fn test_roster_roundtrip_keeps_join_order() {
        let roster = PlayersInGame {
            players: vec![PlayerId(9), PlayerId(2), PlayerId(300)],
        };
        let packet = body_frame(&roster).unwrap();
        let frame = only_frame(&packet);
        assert_eq!(frame.kind(), Some(FrameTag::PlayersInGame));
        assert_eq!(decode_body::<PlayersInGame>(frame.payload).unwrap(), roster);
    }

    #[test]
    fn test_player_ids_are_packed() {
        let packet = body_frame(&PlayerJoined {
            player_id: PlayerId(5),
        })
        .unwrap();
        // Small ids take a single varint byte.
        assert_eq!(packet, vec![FrameTag::PlayerJoined as u8, 1, 0, 5]);
    }

    #[test]
    fn test_empty_roster() {
        let packet = body_frame(&PlayersInGame { players: vec![] }).unwrap();
        let frame = only_frame(&packet);
        assert!(
            decode_body::<PlayersInGame>(frame.payload)
                .unwrap()
                .players
                .is_empty()
        );
    }

    #[test]
    fn test_body_trailing_bytes_rejected() {
        let result = decode_body::<PlayerLeft>(&[3, 0]);
        assert!(matches!(
            result,
            Err(MessageError::Decode(DecodeError::TrailingBytes(1)))
        ));
    }

    #[test]
    fn test_malformed_body_rejected() {
        let result = decode_body::<PlayersInGame>(&[5, 1]);
        assert!(matches!(result, Err(MessageError::Postcard(_))));
    }

    #[test]
    fn test_reply_frames() {
        let ok = reply_frame(FrameTag::CreateGame, JoinReply::Joined(SessionId(12)));
        let frame = only_frame(&ok);
        assert_eq!(frame.kind(), Some(FrameTag::CreateGame));
        assert_eq!(read_reply(&frame), Ok(JoinReply::Joined(SessionId(12))));

        let err = reply_frame(
            FrameTag::JoinGame,
            JoinReply::Failed(ErrorCode::SessionNotFound),
        );
        assert_eq!(
            read_reply(&only_frame(&err)),
            Ok(JoinReply::Failed(ErrorCode::SessionNotFound))
        );
    }

    #[test]
    fn test_join_request_layout() {
        let packet = join_game_request(SessionId(258));
        assert_eq!(packet, vec![1, 4, 0, 2, 1, 0, 0]);
        assert_eq!(create_game_request(), vec![0, 0, 0]);
    }

    #[test]
    fn test_game_data_header_length() {
        let packet = game_data_frame(SessionId(3), &[]).unwrap();
        assert_eq!(packet.len(), GAME_DATA_HEADER_LEN);

        let packet = game_data_frame(SessionId(3), b"move").unwrap();
        let frame = only_frame(&packet);
        let (session, data) = read_game_data(frame.payload).unwrap();
        assert_eq!(session, SessionId(3));
        assert_eq!(data, b"move");
    }

    #[test]
    fn test_handshake() {
        assert_eq!(decode_handshake(&encode_handshake(1)), Ok(1));
        assert_eq!(decode_handshake(&[]), Err(HandshakeError::Empty));
        assert_eq!(decode_handshake(&[1, 0]), Err(HandshakeError::Truncated(2)));
        assert_eq!(decode_handshake(&[2, 0, 0, 0, 99]), Ok(2));
    }
}
