//! # switchyard-settings
//!
//! Configuration with layered sources for the Switchyard control plane.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SwitchyardSettings::default()`]
//! 2. **User file**: `~/.switchyard/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SWITCHYARD_*` overrides (highest priority)
//!
//! There is no global instance; the binary loads settings once and hands
//! them to the composition root.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_ends_with_file_name() {
        let path = settings_path();
        assert!(path.ends_with(".switchyard/settings.json"));
    }

    #[test]
    fn default_settings_values() {
        let settings = SwitchyardSettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.transport.ping_period_ms, 54_000);
        assert_eq!(settings.transport.pong_wait_ms, 60_000);
        assert_eq!(settings.transport.write_wait_ms, 10_000);
        assert_eq!(settings.agent.command_timeout_ms, 10_000);
        assert_eq!(settings.logging.level, LogLevel::Info);
    }
}
