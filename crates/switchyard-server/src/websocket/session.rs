//! WebSocket session lifecycle, from upgrade through unregistration.
//!
//! Each session builds its [`Connection`], registers it with the owning
//! registry, runs both pumps until either ends, then unregisters.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocket;
use metrics::{counter, gauge, histogram};
use switchyard_core::AgentId;
use tracing::{Span, field, info, instrument, warn};

use super::connection::Connection;
use super::hub::Hub;
use super::pump::{IgnoreInbound, PumpConfig, PumpExit, drive};
use crate::agent::{AgentChannel, AgentFrames, LogStreams};
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::websocket::connection::Identity;

struct SessionStats {
    role: &'static str,
    started: Instant,
}

impl SessionStats {
    fn open(conn: &Connection) -> Self {
        let role = conn.identity().role();
        Span::current().record("conn_id", field::display(conn.id()));
        counter!(WS_CONNECTIONS_TOTAL, "role" => role).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "role" => role).increment(1.0);
        info!(identity = %conn.identity(), "session opened");
        Self {
            role,
            started: Instant::now(),
        }
    }

    fn close(self, conn: &Connection, exit: &PumpExit) {
        gauge!(WS_CONNECTIONS_ACTIVE, "role" => self.role).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS, "role" => self.role)
            .record(self.started.elapsed().as_secs_f64());
        info!(
            reason = %exit,
            dropped = conn.drop_count(),
            "session closed"
        );
    }
}

/// Run a dashboard session. Inbound frames are ignored.
#[instrument(skip_all, fields(client = %client, conn_id = field::Empty))]
pub async fn run_dashboard_session(socket: WebSocket, client: String, hub: Hub, config: PumpConfig) {
    let (conn, queue) = Connection::new(Identity::Dashboard(client), config.outbound_buffer);
    if let Err(e) = hub.register(Arc::clone(&conn)).await {
        warn!(error = %e, "dashboard registration refused");
        return;
    }
    let stats = SessionStats::open(&conn);
    let exit = drive(socket, &conn, queue, &IgnoreInbound, &config).await;
    hub.unregister(conn.id().clone()).await;
    stats.close(&conn, &exit);
}

/// Run an agent session: inbound frames go to the agent channel.
#[instrument(skip_all, fields(agent_id = %agent_id, conn_id = field::Empty))]
pub async fn run_agent_session(
    socket: WebSocket,
    agent_id: AgentId,
    channel: Arc<AgentChannel>,
    config: PumpConfig,
) {
    let (conn, queue) = Connection::new(Identity::Agent(agent_id), config.outbound_buffer);
    if let Err(e) = channel.register(Arc::clone(&conn)).await {
        warn!(error = %e, "agent registration refused");
        return;
    }
    let stats = SessionStats::open(&conn);
    let handler = AgentFrames::new(Arc::clone(&channel), agent_id);
    let exit = drive(socket, &conn, queue, &handler, &config).await;
    channel.unregister(agent_id, conn.id().clone()).await;
    stats.close(&conn, &exit);
}

/// Where a log viewer wants to read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogViewerRequest {
    /// Agent whose log is streamed.
    pub agent_id: AgentId,
    /// Which log.
    pub log_type: String,
    /// History lines requested.
    pub lines: u32,
}

/// Run a log viewer session against the log hub.
///
/// While the session lives the agent keeps streaming; the last viewer to
/// leave stops the stream.
#[instrument(
    skip_all,
    fields(agent_id = %request.agent_id, log_type = %request.log_type, conn_id = field::Empty)
)]
pub async fn run_log_viewer_session(
    socket: WebSocket,
    request: LogViewerRequest,
    hub: Hub,
    streams: Arc<LogStreams>,
    config: PumpConfig,
) {
    let identity = Identity::LogViewer {
        agent_id: request.agent_id,
        log_type: request.log_type.clone(),
    };
    let (conn, queue) = Connection::new(identity, config.outbound_buffer);
    if let Err(e) = hub.register(Arc::clone(&conn)).await {
        warn!(error = %e, "log viewer registration refused");
        return;
    }
    let stats = SessionStats::open(&conn);
    let (guard, pushed) = streams.attach(request.agent_id, &request.log_type, request.lines);
    if let Err(e) = pushed {
        warn!(error = %e, "log stream not started");
    }
    let exit = drive(socket, &conn, queue, &IgnoreInbound, &config).await;
    drop(guard);
    hub.unregister(conn.id().clone()).await;
    stats.close(&conn, &exit);
}
