//! Session protocol plumbing shared by the Gather server and client.
//!
//! - [`types`]: player/session ids, error codes, and the join/create reply.
//! - [`framing`]: the tagged sub-message frame codec (several frames per packet).
//! - [`messages`]: typed frame bodies, request/reply builders, and the handshake.
//! - [`transport`]: the channel transport interface the protocol runs over.
//! - [`memory`]: an in-process [`Connection`] for embedding and tests.
//! - [`udp`]: a datagram transport over tokio UDP sockets.

pub mod framing;
pub mod memory;
pub mod messages;
pub mod platform;
pub mod transport;
pub mod types;
pub mod udp;

pub use framing::{
    DecodeError, EncodeError, FRAME_HEADER_LEN, Frame, FrameTag, FrameWriter, Frames,
    MAX_FRAME_PAYLOAD, PayloadReader, encode_frame, split_frames,
};
pub use memory::MemoryConnection;
pub use messages::{
    GAME_DATA_HEADER_LEN, HandshakeError, MessageError, PlayerJoined, PlayerLeft, PlayersInGame,
};
pub use transport::{
    Channel, Connection, ConnectionId, DisconnectReason, IdGenerator, TransportError,
    TransportHandler,
};
pub use types::{ErrorCode, JoinReply, PlayerId, SessionId};
