//! # switchboard-settings
//!
//! Layered configuration for Switchboard servers.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SwitchboardSettings::default()`]
//! 2. **User file**: `~/.switchboard/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SWITCHBOARD_*` overrides (highest priority)
//!
//! The global singleton is reloadable: [`reload_settings_from_path`] swaps
//! the cached value so later [`get_settings`] calls see the new data.
//!
//! # Usage
//!
//! ```no_run
//! use switchboard_settings::get_settings;
//!
//! let settings = get_settings();
//! let session = settings.session_config().unwrap_or_default();
//! println!("pong wait: {:?}", session.pong_wait);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::{HubSettings, ServerSettings, SessionSettings, SwitchboardSettings};

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings singleton. `None` until first access or explicit init.
static SETTINGS: RwLock<Option<Arc<SwitchboardSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.switchboard/settings.json` with env
/// var overrides, falling back to compiled defaults if loading fails. Later
/// calls return the cached value.
pub fn get_settings() -> Arc<SwitchboardSettings> {
    if let Some(s) = SETTINGS.read().as_ref() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    // Another thread may have initialized while we waited.
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            SwitchboardSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the global settings with a specific value.
pub fn init_settings(settings: SwitchboardSettings) {
    *SETTINGS.write() = Some(Arc::new(settings));
}

/// Reload settings from `path` and swap the global cache.
///
/// Falls back to defaults (with a warning) if the file cannot be loaded.
pub fn reload_settings_from_path(path: &Path) -> Arc<SwitchboardSettings> {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            SwitchboardSettings::default()
        }
    });
    *SETTINGS.write() = Some(Arc::clone(&new));
    tracing::info!(?path, "settings reloaded from disk");
    new
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    *SETTINGS.write() = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
