//! WebSocket transport and wire protocol

pub mod codec;
pub mod handler;
pub mod protocol;
