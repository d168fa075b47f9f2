//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket sessions opened (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Live WebSocket sessions (gauge, labels: role).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime (histogram, labels: role).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Registered members of a hub (gauge, labels: hub).
pub const HUB_MEMBERS: &str = "hub_members";
/// Members dropped for a full or closed queue during broadcast (counter, labels: hub).
pub const HUB_SHED_TOTAL: &str = "hub_shed_total";
/// Pump exits (counter, labels: reason).
pub const PUMP_EXITS_TOTAL: &str = "pump_exits_total";
/// Bus handlers that panicked (counter, labels: bus).
pub const BUS_HANDLER_PANICS_TOTAL: &str = "bus_handler_panics_total";
/// Connected agents (gauge).
pub const AGENTS_CONNECTED: &str = "agents_connected";
/// Commands enqueued for agents (counter, labels: type).
pub const AGENT_COMMANDS_TOTAL: &str = "agent_commands_total";
/// Commands refused (counter, labels: type, code).
pub const AGENT_COMMAND_FAILURES_TOTAL: &str = "agent_command_failures_total";
/// Messages received from agents (counter, labels: type).
pub const AGENT_MESSAGES_TOTAL: &str = "agent_messages_total";
/// Command-and-wait duration (histogram).
pub const AGENT_WAIT_DURATION_SECONDS: &str = "agent_wait_duration_seconds";
/// Frames produced by the event bridge (counter, labels: type).
pub const BRIDGE_FRAMES_TOTAL: &str = "bridge_frames_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            HUB_MEMBERS,
            HUB_SHED_TOTAL,
            PUMP_EXITS_TOTAL,
            BUS_HANDLER_PANICS_TOTAL,
            AGENTS_CONNECTED,
            AGENT_COMMANDS_TOTAL,
            AGENT_COMMAND_FAILURES_TOTAL,
            AGENT_MESSAGES_TOTAL,
            AGENT_WAIT_DURATION_SECONDS,
            BRIDGE_FRAMES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
