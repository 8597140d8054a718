//! Connection lifecycle and match orchestration

pub mod collector;
pub mod connection;
pub mod service;

pub use connection::{ConnectionId, Outbound};
pub use service::{GameServer, GameServerHandle, Inbound, ServerSettings, ServerStatus};
