//! Gather session server.
//!
//! Players connect over any [`gather_net::TransportHandler`]-driven transport,
//! create or join sessions, and have their `GameData` relayed to the rest of
//! their session.
//!
//! - [`ids`]: injected player and session id generators.
//! - [`registry`]: concurrent session id → session map.
//! - [`session`]: a session roster with atomic join and broadcast.
//! - [`player`]: per-connection request handling.
//! - [`server`]: the connection acceptor tying them together.

pub mod ids;
pub mod player;
pub mod registry;
pub mod server;
pub mod session;

pub use ids::{PlayerIdGenerator, SessionIdGenerator};
pub use player::Player;
pub use registry::SessionRegistry;
pub use server::{GameServer, ServerStats};
pub use session::{Departure, JoinError, Member, Session};
