//! HTTP surface: health, presets and the WebSocket upgrade

pub mod routes;

pub use routes::build_router;
