//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting sessions, `"closing"` once the hub has shut down.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions currently driven by the dispatcher.
    pub active_sessions: usize,
    /// Sessions registered with the hub.
    pub hub_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    accepting: bool,
    active_sessions: usize,
    hub_sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: if accepting { "ok" } else { "closing" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_sessions,
        hub_sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_accepting() {
        assert_eq!(health_check(Instant::now(), true, 0, 0).status, "ok");
        assert_eq!(health_check(Instant::now(), false, 0, 0).status, "closing");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, true, 0, 0).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), true, 3, 2);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["active_sessions"], 3);
        assert_eq!(parsed["hub_sessions"], 2);
        assert!(parsed["uptime_secs"].is_number());
    }
}
