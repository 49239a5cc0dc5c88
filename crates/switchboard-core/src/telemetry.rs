//! Metric names emitted through the `metrics` facade.
//!
//! Kept in one place so the recorder side (the server's `/metrics` endpoint)
//! and the emitting side agree on spelling.

/// Sessions accepted (counter).
pub const SESSIONS_TOTAL: &str = "switchboard_sessions_total";
/// Sessions currently running (gauge).
pub const SESSIONS_ACTIVE: &str = "switchboard_sessions_active";
/// Session lifetime in seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "switchboard_session_duration_seconds";
/// Messages dropped because an outbound queue was full (counter).
pub const MESSAGES_DROPPED_TOTAL: &str = "switchboard_messages_dropped_total";
/// Keepalive pings written (counter).
pub const PINGS_SENT_TOTAL: &str = "switchboard_pings_sent_total";
/// Transport errors that ended a session (counter, labels: direction).
pub const TRANSPORT_ERRORS_TOTAL: &str = "switchboard_transport_errors_total";
/// Broadcast requests accepted by the hub (counter, labels: kind).
pub const BROADCASTS_TOTAL: &str = "switchboard_broadcasts_total";
/// Sessions registered with a hub (gauge).
pub const HUB_SESSIONS: &str = "switchboard_hub_sessions";
