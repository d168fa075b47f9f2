//! Axum HTTP + WebSocket surface.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /ws` | dashboard socket |
//! | `GET /ws/agent/{client_id}` | agent socket |
//! | `GET /ws/logs/{client_id}?log_type=&lines=` | log viewer socket |
//! | `GET /health` | JSON health snapshot |
//! | `GET /metrics` | Prometheus text |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use switchyard_core::AgentId;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::fabric::Fabric;
use crate::metrics;
use crate::websocket::session::{self, LogViewerRequest};

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    /// Composition root.
    pub fabric: Arc<Fabric>,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the router.
pub fn router(fabric: Arc<Fabric>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/ws", get(dashboard_ws))
        .route("/ws/agent/{client_id}", get(agent_ws))
        .route("/ws/logs/{client_id}", get(log_ws))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState { fabric, metrics })
        .layer(CorsLayer::permissive())
}

fn limited(ws: WebSocketUpgrade, fabric: &Fabric) -> WebSocketUpgrade {
    let max = fabric.settings().server.max_message_size;
    ws.max_message_size(max).max_frame_size(max)
}

fn refuse_during_shutdown(fabric: &Fabric) -> Option<Response> {
    fabric
        .is_shutting_down()
        .then(|| (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DashboardQuery {
    client: Option<String>,
}

/// GET /ws
async fn dashboard_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<DashboardQuery>,
    State(state): State<AppState>,
) -> Response {
    if let Some(refused) = refuse_during_shutdown(&state.fabric) {
        return refused;
    }
    let client = query.client.unwrap_or_else(|| "dashboard".to_owned());
    let hub = state.fabric.dashboards().clone();
    let config = state.fabric.pump_config().clone();
    limited(ws, &state.fabric)
        .on_upgrade(move |socket| session::run_dashboard_session(socket, client, hub, config))
}

/// GET /ws/agent/{client_id}
async fn agent_ws(
    ws: WebSocketUpgrade,
    Path(client_id): Path<u64>,
    State(state): State<AppState>,
) -> Response {
    if let Some(refused) = refuse_during_shutdown(&state.fabric) {
        return refused;
    }
    let channel = Arc::clone(state.fabric.agents());
    let config = state.fabric.pump_config().clone();
    limited(ws, &state.fabric).on_upgrade(move |socket| {
        session::run_agent_session(socket, AgentId::new(client_id), channel, config)
    })
}

#[derive(Debug, Default, Deserialize)]
struct LogQuery {
    log_type: Option<String>,
    lines: Option<u32>,
}

/// GET /ws/logs/{client_id}
async fn log_ws(
    ws: WebSocketUpgrade,
    Path(client_id): Path<u64>,
    Query(query): Query<LogQuery>,
    State(state): State<AppState>,
) -> Response {
    if let Some(refused) = refuse_during_shutdown(&state.fabric) {
        return refused;
    }
    let request = LogViewerRequest {
        agent_id: AgentId::new(client_id),
        log_type: query.log_type.unwrap_or_else(|| "frpc".to_owned()),
        lines: query
            .lines
            .unwrap_or(state.fabric.settings().agent.log_history_lines),
    };
    let hub = state.fabric.log_viewers().clone();
    let streams = Arc::clone(state.fabric.log_streams());
    let config = state.fabric.pump_config().clone();
    limited(ws, &state.fabric).on_upgrade(move |socket| {
        session::run_log_viewer_session(socket, request, hub, streams, config)
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.fabric.health();
    let status = if state.fabric.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(health))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// A running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the listener to stop. It stops once the fabric's shutdown
    /// token fires and in-flight HTTP requests complete.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task ended abnormally");
        }
    }
}

/// Bind `addr` and serve until the fabric shuts down.
pub async fn listen(
    fabric: Arc<Fabric>,
    metrics: Option<PrometheusHandle>,
    addr: &str,
) -> std::io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let token = fabric.shutdown_coordinator().token();
    let app = router(fabric, metrics);
    info!(addr = %local, "switchyard listening");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!(error = %e, "server stopped with error");
        }
    });
    Ok(ServerHandle { addr: local, task })
}
