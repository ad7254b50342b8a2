//! Gather game client.
//!
//! Incoming packets are decoded on the network thread by [`InboundHandler`]
//! and queued as [`ClientEvent`]s. The application calls
//! [`GameClient::tick`] once per update; that drains the queue into an
//! [`EventHandler`] and lets the [`OutboundBatcher`] send at most one
//! `GameData` packet per channel per send interval.

pub mod batcher;
pub mod client;
pub mod event_queue;
pub mod inbound;

pub use batcher::{BatchError, OutboundBatcher};
pub use client::{ClientError, GameClient};
pub use event_queue::{ClientEvent, EventHandler, EventQueue};
pub use inbound::InboundHandler;
