//! Server error types.

use switchboard_core::ConfigError;
use switchboard_settings::SettingsError;
use thiserror::Error;

/// Errors from building or running a [`crate::SwitchboardServer`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or accepting on a socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Settings could not be turned into a valid configuration.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// Session or hub configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
