//! Event bridge: domain [`Event`]s to dashboard and log-viewer frames.
//!
//! [`event_to_frame`] is pure. [`EventBridge::install`] subscribes one
//! handler per event kind; `LogLine` goes to the viewers tailing that log of
//! its agent as `log_data`, everything else to every dashboard. Frames are
//! sent once.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde_json::{Value, json};
use switchyard_core::protocol::dashboard::DashboardFrame;
use switchyard_core::{AgentId, Event, EventKind, FabricError, Result, now_millis};
use tracing::{debug, warn};

use crate::bus::{EventBus, EventHandler};
use crate::metrics::BRIDGE_FRAMES_TOTAL;
use crate::websocket::hub::{Hub, Target};

/// Which registry a frame goes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Every dashboard.
    Dashboards,
    /// Log viewers tailing one log of one agent.
    LogViewers {
        /// Agent the line came from.
        agent_id: AgentId,
        /// Which log.
        log_type: String,
    },
}

/// Registry a frame for `event` is delivered through.
pub fn route_of(event: &Event) -> Route {
    match event {
        Event::LogLine {
            client_id, log_type, ..
        } => Route::LogViewers {
            agent_id: *client_id,
            log_type: log_type.clone(),
        },
        _ => Route::Dashboards,
    }
}

/// Serialize `payload` and add `client_id` to the resulting object.
fn with_client(client_id: AgentId, payload: &impl Serialize) -> Result<Value> {
    let mut value = serde_json::to_value(payload)?;
    if let Value::Object(map) = &mut value {
        let _ = map.insert("client_id".into(), json!(client_id));
    }
    Ok(value)
}

/// Build the wire frame for `event`, stamped with `timestamp`.
pub fn event_to_frame(event: &Event, timestamp: i64) -> Result<DashboardFrame> {
    let frame = match event {
        Event::SshLog {
            server_id,
            operation,
            log,
            log_type,
            progress,
        } => DashboardFrame::flat(
            "ssh_log",
            timestamp,
            json!({
                "server_id": server_id,
                "operation": operation,
                "log": log,
                "log_type": log_type,
                "progress": progress,
            }),
        ),
        Event::ServerStatus { servers } => {
            DashboardFrame::wrapped("server_status_update", timestamp, serde_json::to_value(servers)?)
        }
        Event::CertProgress {
            task_id,
            domain,
            step,
            message,
            error,
        } => DashboardFrame::flat(
            "cert_progress",
            timestamp,
            json!({
                "task_id": task_id,
                "domain": domain,
                "step": step,
                "message": message,
                "error": error,
            }),
        ),
        Event::ClientUpdateProgress { client_id, progress } => {
            DashboardFrame::wrapped("client_update_progress", timestamp, with_client(*client_id, progress)?)
        }
        Event::ClientUpdateResult { client_id, result } => {
            DashboardFrame::wrapped("client_update_result", timestamp, with_client(*client_id, result)?)
        }
        Event::FrpcControlResult {
            client_id,
            action,
            success,
            message,
        } => DashboardFrame::flat(
            "frpc_control_result",
            timestamp,
            json!({
                "client_id": client_id,
                "action": action,
                "success": success,
                "message": message,
            }),
        ),
        Event::LogLine {
            log_type, content, ..
        } => DashboardFrame::flat(
            "log_data",
            timestamp,
            json!({ "log_type": log_type, "content": content }),
        ),
        Event::TrafficPoint {
            client_id,
            proxy_name,
            bytes_in,
            bytes_out,
        } => DashboardFrame::wrapped(
            "traffic_update",
            timestamp,
            json!({
                "client_id": client_id,
                "proxy_name": proxy_name,
                "bytes_in": bytes_in,
                "bytes_out": bytes_out,
            }),
        ),
        Event::ClientStatusChanged { client_id, online } => DashboardFrame::wrapped(
            "client_status_update",
            timestamp,
            json!({ "client_id": client_id, "online": online }),
        ),
        Event::ClientReport { client_id, report } => {
            DashboardFrame::wrapped("client_report", timestamp, with_client(*client_id, report)?)
        }
        Event::Alert {
            rule_id,
            severity,
            message,
        } => DashboardFrame::wrapped(
            "alert",
            timestamp,
            json!({ "rule_id": rule_id, "severity": severity, "message": message }),
        ),
    };
    Ok(frame)
}

/// Delivers bus events to the two registries.
pub struct EventBridge {
    dashboards: Hub,
    log_viewers: Hub,
}

impl EventBridge {
    /// Subscribe a bridge to every event kind on `bus`.
    pub fn install(bus: &EventBus<Event>, dashboards: Hub, log_viewers: Hub) -> Arc<Self> {
        let bridge = Arc::new(Self {
            dashboards,
            log_viewers,
        });
        for kind in EventKind::ALL {
            bus.subscribe(kind, Arc::clone(&bridge) as Arc<dyn EventHandler<Event>>);
        }
        bridge
    }

    /// Convert and send one event.
    pub async fn forward(&self, event: &Event) -> Result<()> {
        let frame = event_to_frame(event, now_millis())?;
        counter!(BRIDGE_FRAMES_TOTAL, "type" => frame.frame_type).increment(1);
        match route_of(event) {
            Route::Dashboards => self.dashboards.broadcast_frame(&frame, Target::All).await,
            Route::LogViewers { agent_id, log_type } => {
                self.log_viewers
                    .broadcast_frame(&frame, Target::LogStream { agent_id, log_type })
                    .await
            }
        }
    }
}

#[async_trait]
impl EventHandler<Event> for EventBridge {
    async fn handle(&self, event: &Event) {
        match self.forward(event).await {
            Ok(()) => {}
            Err(FabricError::ShuttingDown) => {
                debug!(kind = event.kind().as_str(), "bridge dropped event during shutdown");
            }
            Err(e) => warn!(kind = event.kind().as_str(), error = %e, "bridge failed to forward event"),
        }
    }
}
