//! Application state shared across routes

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::{Config, GamePresets};
use crate::session::{ConnectionId, GameServerHandle};

/// Transport-level counters of one WebSocket
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub connected_at: DateTime<Utc>,
    pub messages_in: u64,
    pub rate_limited: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            connected_at: Utc::now(),
            messages_in: 0,
            rate_limited: 0,
        }
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub presets: Arc<GamePresets>,
    pub server: GameServerHandle,
    pub connections: Arc<DashMap<ConnectionId, ConnectionStats>>,
}

impl AppState {
    pub fn new(config: Config, presets: GamePresets, server: GameServerHandle) -> Self {
        Self {
            config: Arc::new(config),
            presets: Arc::new(presets),
            server,
            connections: Arc::new(DashMap::new()),
        }
    }

    pub fn record_message(&self, conn_id: ConnectionId, rate_limited: bool) {
        if let Some(mut stats) = self.connections.get_mut(&conn_id) {
            stats.messages_in += 1;
            if rate_limited {
                stats.rate_limited += 1;
            }
        }
    }

    /// Connect time of the longest-open socket
    pub fn oldest_connection(&self) -> Option<DateTime<Utc>> {
        self.connections.iter().map(|entry| entry.connected_at).min()
    }

    /// Total (messages, rate limited) over open connections
    pub fn message_totals(&self) -> (u64, u64) {
        self.connections
            .iter()
            .fold((0, 0), |(m, r), entry| (m + entry.messages_in, r + entry.rate_limited))
    }
}
