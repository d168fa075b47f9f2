//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields get their compiled default.

mod server;
mod transport;

pub use server::*;
pub use transport::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded from `~/.switchyard/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "transport": { "pongWaitMs": 30000, "pingPeriodMs": 27000 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchyardSettings {
    /// Settings schema version.
    pub version: String,
    /// HTTP listener.
    pub server: ServerSettings,
    /// WebSocket keepalive and buffering.
    pub transport: TransportSettings,
    /// Agent channel behaviour.
    pub agent: AgentSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for SwitchyardSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            transport: TransportSettings::default(),
            agent: AgentSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SwitchyardSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        if t.ping_period_ms >= t.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "transport.pingPeriodMs ({}) must be less than transport.pongWaitMs ({})",
                t.ping_period_ms, t.pong_wait_ms
            )));
        }
        if t.write_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "transport.writeWaitMs must be positive".into(),
            ));
        }
        if t.outbound_buffer == 0 || t.command_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "transport buffers must hold at least one message".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        Ok(())
    }
}
