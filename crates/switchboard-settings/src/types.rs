//! Settings schema. Every field has a default so a partial settings file
//! deserializes cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_core::{HubConfig, SessionConfig};

use crate::errors::Result;

/// Root settings object (`~/.switchboard/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// Per-session engine tuning.
    pub session: SessionSettings,
    /// Hub fan-out tuning.
    pub hub: HubSettings,
    /// Listener addresses and routes.
    pub server: ServerSettings,
}

impl SwitchboardSettings {
    /// Validated session configuration.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let config = self.session.to_config();
        config.validate()?;
        Ok(config)
    }

    /// Validated hub configuration.
    pub fn hub_config(&self) -> Result<HubConfig> {
        let config = self.hub.to_config();
        config.validate()?;
        Ok(config)
    }
}

/// Session timing and sizing. Durations are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Deadline for a single transport write.
    pub write_wait_ms: u64,
    /// Read deadline; extended whenever a ping or pong arrives.
    pub pong_wait_ms: u64,
    /// Idle interval after which the output loop sends a ping.
    pub ping_period_ms: u64,
    /// Largest inbound message in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity in messages.
    pub message_buffer_size: usize,
}

impl SessionSettings {
    fn to_config(&self) -> SessionConfig {
        SessionConfig {
            write_wait: Duration::from_millis(self.write_wait_ms),
            pong_wait: Duration::from_millis(self.pong_wait_ms),
            ping_period: Duration::from_millis(self.ping_period_ms),
            max_message_size: self.max_message_size,
            message_buffer_size: self.message_buffer_size,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let config = SessionConfig::default();
        Self {
            write_wait_ms: config.write_wait.as_millis() as u64,
            pong_wait_ms: config.pong_wait.as_millis() as u64,
            ping_period_ms: config.ping_period.as_millis() as u64,
            max_message_size: config.max_message_size,
            message_buffer_size: config.message_buffer_size,
        }
    }
}

/// Hub worker pool sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Number of broadcast workers.
    pub shards: usize,
    /// Pending broadcasts each worker buffers.
    pub shard_capacity: usize,
    /// Pending register/unregister requests.
    pub session_capacity: usize,
}

impl HubSettings {
    fn to_config(&self) -> HubConfig {
        HubConfig {
            shards: self.shards,
            shard_capacity: self.shard_capacity,
            session_capacity: self.session_capacity,
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        let config = HubConfig::default();
        Self {
            shards: config.shards,
            shard_capacity: config.shard_capacity,
            session_capacity: config.session_capacity,
        }
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP / web-socket port.
    pub ws_port: u16,
    /// Raw TCP port. The raw-stream listener is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
    /// Route that performs the web-socket upgrade.
    pub ws_path: String,
    /// Serve Prometheus metrics at `/metrics`.
    pub metrics_enabled: bool,
    /// How long shutdown waits for in-flight tasks, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ws_port: 8080,
            tcp_port: None,
            ws_path: "/ws".to_string(),
            metrics_enabled: true,
            shutdown_timeout_ms: 5_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use crate::errors::SettingsError;
    use switchboard_core::ConfigError;

    #[test]
    fn defaults_match_core_config() {
        let settings = SwitchboardSettings::default();
        assert_eq!(settings.session_config().unwrap(), SessionConfig::default());
        assert_eq!(settings.hub_config().unwrap(), HubConfig::default());
        assert_eq!(settings.session.pong_wait_ms, 60_000);
        assert_eq!(settings.session.ping_period_ms, 54_000);
        assert_eq!(settings.server.ws_path, "/ws");
        assert!(settings.server.tcp_port.is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SwitchboardSettings::default()).unwrap();
        assert_eq!(json["session"]["pongWaitMs"], 60_000);
        assert_eq!(json["hub"]["shardCapacity"], 1024);
        assert_eq!(json["server"]["wsPort"], 8080);
        assert!(json["server"].get("tcpPort").is_none());
    }

    #[test]
    fn partial_object_fills_defaults() {
        let settings: SwitchboardSettings =
            serde_json::from_value(serde_json::json!({"session": {"maxMessageSize": 4096}}))
                .unwrap();
        assert_eq!(settings.session.max_message_size, 4096);
        assert_eq!(settings.session.message_buffer_size, 1024);
        assert_eq!(settings.hub, HubSettings::default());
    }

    #[test]
    fn invalid_keepalive_is_rejected() {
        let mut settings = SwitchboardSettings::default();
        settings.session.ping_period_ms = 60_000;
        assert_matches!(
            settings.session_config(),
            Err(SettingsError::Config(ConfigError::PingPeriod { .. }))
        );
    }

    #[test]
    fn zero_shards_is_rejected() {
        let mut settings = SwitchboardSettings::default();
        settings.hub.shards = 0;
        assert_matches!(settings.hub_config(), Err(SettingsError::Config(_)));
    }
}
