//! WebSocket keepalive and buffering settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Keepalive timing and queue sizes shared by every registry.
///
/// `ping_period_ms` must stay below `pong_wait_ms`, otherwise an idle but
/// healthy peer would miss its read deadline between pings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Interval between keepalive pings.
    pub ping_period_ms: u64,
    /// Read deadline, reset by every received frame.
    pub pong_wait_ms: u64,
    /// Deadline for a single socket write.
    pub write_wait_ms: u64,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
    /// Registry command channel capacity.
    pub command_buffer: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            ping_period_ms: 54_000,
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
            outbound_buffer: 256,
            command_buffer: 1024,
        }
    }
}

impl TransportSettings {
    /// Keepalive ping interval.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    /// Read deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}
