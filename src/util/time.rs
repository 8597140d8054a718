//! Server clock helpers

use std::time::Instant;

use chrono::{DateTime, Utc};

static SERVER_START: std::sync::OnceLock<(Instant, DateTime<Utc>)> = std::sync::OnceLock::new();

/// Record the server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(|| (Instant::now(), Utc::now()));
}

/// Server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|(start, _)| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Wall-clock start time, if recorded
pub fn started_at() -> Option<DateTime<Utc>> {
    SERVER_START.get().map(|(_, at)| *at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_is_recorded_once() {
        init_server_time();
        let first = started_at();
        init_server_time();
        assert!(first.is_some());
        assert_eq!(started_at(), first);
        assert!(uptime_secs() < 60);
    }
}
