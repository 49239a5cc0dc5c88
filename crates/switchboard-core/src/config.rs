//! Session and hub configuration.

use std::time::Duration;

use crate::errors::ConfigError;

/// Per-session timing and sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum time a single transport write may take.
    pub write_wait: Duration,
    /// Read deadline, extended whenever a ping or pong arrives.
    pub pong_wait: Duration,
    /// Idle period after which the output loop sends a ping.
    pub ping_period: Duration,
    /// Largest inbound payload accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity, in messages.
    pub message_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 1024,
            message_buffer_size: 1024,
        }
    }
}

impl SessionConfig {
    /// Check the invariants the session engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_wait.is_zero() {
            return Err(ConfigError::Zero("write_wait"));
        }
        if self.pong_wait.is_zero() {
            return Err(ConfigError::Zero("pong_wait"));
        }
        if self.ping_period.is_zero() {
            return Err(ConfigError::Zero("ping_period"));
        }
        if self.ping_period >= self.pong_wait {
            return Err(ConfigError::PingPeriod {
                ping_period: self.ping_period,
                pong_wait: self.pong_wait,
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Zero("max_message_size"));
        }
        if self.message_buffer_size == 0 {
            return Err(ConfigError::Zero("message_buffer_size"));
        }
        Ok(())
    }
}

/// Hub worker pool sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Number of broadcast delivery workers.
    pub shards: usize,
    /// Pending broadcasts buffered per worker.
    pub shard_capacity: usize,
    /// Pending register/unregister requests buffered by the control task.
    pub session_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            shard_capacity: 1024,
            session_capacity: 1024,
        }
    }
}

impl HubConfig {
    /// Reject zero-sized pools and buffers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::Zero("shards"));
        }
        if self.shard_capacity == 0 {
            return Err(ConfigError::Zero("shard_capacity"));
        }
        if self.session_capacity == 0 {
            return Err(ConfigError::Zero("session_capacity"));
        }
        Ok(())
    }
}
