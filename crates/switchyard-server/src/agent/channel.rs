//! Agent channel: pushes, command-and-wait, and inbound dispatch.
//!
//! Every outbound command is wrapped in an
//! [`Envelope`](switchyard_core::protocol::agent::Envelope) and enqueued
//! without blocking. Command-and-wait embeds a fresh [`RequestId`] and races
//! the reply against the caller's deadline and shutdown; the pending entry is
//! gone before it returns, whatever the outcome.
//!
//! Shutdown resolves every in-flight wait with `ShuttingDown` and refuses
//! new commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use switchyard_core::protocol::agent::{
    AgentCommand, AgentMessage, CommandReply, Decoded, Envelope, LogStreamAction, UpdateType,
    decode_inbound,
};
use switchyard_core::{AgentId, ConnectionId, FabricError, RequestId, Result, now_millis};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pending::PendingTable;
use super::registry::AgentRegistry;
use super::signal::{AgentSignal, AgentSignalKind};
use crate::bus::{EventBus, EventHandler};
use crate::metrics::{
    AGENT_COMMAND_FAILURES_TOTAL, AGENT_COMMANDS_TOTAL, AGENT_MESSAGES_TOTAL,
    AGENT_WAIT_DURATION_SECONDS,
};
use crate::websocket::connection::{Connection, Outbound};
use crate::websocket::pump::FrameHandler;

/// Control channel to every connected agent.
pub struct AgentChannel {
    registry: AgentRegistry,
    pending: Arc<PendingTable>,
    signals: Arc<EventBus<AgentSignal>>,
    cancel: CancellationToken,
}

impl AgentChannel {
    /// Start the agent registry loop and build the channel around it.
    pub fn spawn(
        command_buffer: usize,
        signals: Arc<EventBus<AgentSignal>>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (registry, handle) = AgentRegistry::spawn(command_buffer, Arc::clone(&signals), cancel.clone());
        let channel = Arc::new(Self {
            registry,
            pending: Arc::new(PendingTable::new()),
            signals,
            cancel,
        });
        (channel, handle)
    }

    /// The underlying registry.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Bus carrying connectivity changes and inbound messages.
    pub fn signals(&self) -> &Arc<EventBus<AgentSignal>> {
        &self.signals
    }

    /// Subscribe to one signal kind.
    pub fn subscribe(&self, kind: AgentSignalKind, handler: Arc<dyn EventHandler<AgentSignal>>) {
        self.signals.subscribe(kind, handler);
    }

    /// Register an agent connection.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<()> {
        self.registry.register(conn).await
    }

    /// Unregister a connection; ignored if it was already replaced.
    pub async fn unregister(&self, agent_id: AgentId, conn_id: ConnectionId) {
        self.registry.unregister(agent_id, conn_id).await;
    }

    /// Whether `agent_id` has a live connection.
    pub fn is_connected(&self, agent_id: AgentId) -> bool {
        self.registry.is_connected(agent_id)
    }

    /// Connected agents, sorted.
    pub fn connected_agents(&self) -> Vec<AgentId> {
        self.registry.connected_agents()
    }

    /// Open command-and-wait requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Open command-and-wait requests for one agent.
    pub fn pending_for(&self, agent_id: AgentId) -> usize {
        self.pending.count_for(agent_id)
    }

    /// Stop accepting commands, resolve in-flight waits with
    /// `ShuttingDown`, and close every agent connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let dropped = self.pending.cancel_all();
        info!(pending = dropped, "agent channel shutting down");
    }

    /// Whether [`Self::shutdown`] (or the shared token) has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Pushes ──────────────────────────────────────────────────────

    /// Enqueue any command for `agent_id`.
    pub fn push(&self, agent_id: AgentId, command: &AgentCommand) -> Result<()> {
        self.send(agent_id, command, None)
    }

    /// `config_update`
    pub fn push_config_update(&self, agent_id: AgentId, config: Value, version: i64) -> Result<()> {
        self.push(agent_id, &AgentCommand::ConfigUpdate { config, version })
    }

    /// `update`
    pub fn push_update(
        &self,
        agent_id: AgentId,
        update_type: UpdateType,
        version: impl Into<String>,
        download_url: impl Into<String>,
        mirror_id: Option<i64>,
    ) -> Result<()> {
        self.push(
            agent_id,
            &AgentCommand::Update {
                update_type,
                version: version.into(),
                download_url: download_url.into(),
                mirror_id,
            },
        )
    }

    /// `cert_sync`
    pub fn push_cert(
        &self,
        agent_id: AgentId,
        domain: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Result<()> {
        self.push(
            agent_id,
            &AgentCommand::CertSync {
                domain: domain.into(),
                cert_pem: cert_pem.into(),
                key_pem: key_pem.into(),
            },
        )
    }

    /// `cert_delete`
    pub fn delete_cert(&self, agent_id: AgentId, domain: impl Into<String>) -> Result<()> {
        self.push(
            agent_id,
            &AgentCommand::CertDelete {
                domain: domain.into(),
            },
        )
    }

    /// `log_stream`
    pub fn push_log_stream(
        &self,
        agent_id: AgentId,
        log_type: impl Into<String>,
        action: LogStreamAction,
        lines: u32,
    ) -> Result<()> {
        self.push(
            agent_id,
            &AgentCommand::LogStream {
                log_type: log_type.into(),
                action,
                lines,
            },
        )
    }

    /// `shutdown`
    pub fn push_shutdown(&self, agent_id: AgentId) -> Result<()> {
        self.push(agent_id, &AgentCommand::Shutdown)
    }

    /// `frpc_control`, without waiting for the result.
    pub fn push_frpc_control(&self, agent_id: AgentId, action: impl Into<String>) -> Result<()> {
        self.push(
            agent_id,
            &AgentCommand::FrpcControl {
                action: action.into(),
            },
        )
    }

    fn send(&self, agent_id: AgentId, command: &AgentCommand, request_id: Option<RequestId>) -> Result<()> {
        let message_type = command.message_type();
        let result = self.try_send(agent_id, command, request_id);
        match &result {
            Ok(()) => {
                counter!(AGENT_COMMANDS_TOTAL, "type" => message_type).increment(1);
                debug!(%agent_id, message_type, "command enqueued");
            }
            Err(e) => {
                counter!(AGENT_COMMAND_FAILURES_TOTAL, "type" => message_type, "code" => e.code().as_str())
                    .increment(1);
                debug!(%agent_id, message_type, error = %e, "command refused");
            }
        }
        result
    }

    fn try_send(&self, agent_id: AgentId, command: &AgentCommand, request_id: Option<RequestId>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(FabricError::ShuttingDown);
        }
        let conn = self
            .registry
            .get(agent_id)
            .ok_or(FabricError::NotConnected { agent_id })?;
        let text = Envelope::new(command, agent_id, request_id, now_millis())?.to_json()?;
        conn.try_send(Outbound::from(text))
            .map_err(|e| e.into_fabric(format_args!("agent {agent_id}")))
    }

    // ── Command-and-wait ────────────────────────────────────────────

    /// Send `frpc_control` and wait up to `timeout` for the matching
    /// `frpc_control_result`.
    pub async fn command_and_wait(
        &self,
        agent_id: AgentId,
        action: impl Into<String>,
        timeout: Duration,
    ) -> Result<CommandReply> {
        if self.cancel.is_cancelled() {
            return Err(FabricError::ShuttingDown);
        }
        let started = Instant::now();
        let (guard, reply_rx) = PendingTable::register(&self.pending, agent_id, RequestId::new());
        let command = AgentCommand::FrpcControl {
            action: action.into(),
        };
        self.send(agent_id, &command, Some(guard.request_id().clone()))?;

        let outcome = tokio::select! {
            biased;
            reply = reply_rx => reply.map_err(|_| FabricError::ShuttingDown),
            () = self.cancel.cancelled() => Err(FabricError::ShuttingDown),
            () = tokio::time::sleep(timeout) => Err(FabricError::Timeout { agent_id, timeout }),
        };
        drop(guard);

        histogram!(AGENT_WAIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match &outcome {
            Ok(reply) => debug!(%agent_id, action = %reply.action, success = reply.success, "command reply received"),
            Err(e) => warn!(%agent_id, error = %e, "command-and-wait failed"),
        }
        outcome
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Decode one text frame from `agent_id` and dispatch it.
    ///
    /// A malformed frame is a `Serialization` error, which ends the agent's
    /// read pump. Unknown message types are logged and skipped.
    pub fn handle_inbound(&self, agent_id: AgentId, text: &str) -> Result<()> {
        let frame = match decode_inbound(text)? {
            Decoded::Message(frame) => frame,
            Decoded::Unknown(message_type) => {
                warn!(%agent_id, message_type, "unknown agent message type ignored");
                return Ok(());
            }
        };
        let kind = frame.message.kind();
        counter!(AGENT_MESSAGES_TOTAL, "type" => kind.as_str()).increment(1);

        if let AgentMessage::FrpcControlResult(reply) = &frame.message {
            let taken = self
                .pending
                .resolve(agent_id, frame.request_id.as_ref(), reply.clone());
            debug!(%agent_id, taken, request_id = ?frame.request_id, "frpc_control_result received");
        }

        self.signals.publish(AgentSignal::Message {
            agent_id,
            message: frame.message,
            request_id: frame.request_id,
        });
        Ok(())
    }
}

/// Read-pump handler for one agent connection.
pub struct AgentFrames {
    channel: Arc<AgentChannel>,
    agent_id: AgentId,
}

impl AgentFrames {
    /// Handler feeding frames from `agent_id` into `channel`.
    pub fn new(channel: Arc<AgentChannel>, agent_id: AgentId) -> Self {
        Self { channel, agent_id }
    }
}

#[async_trait]
impl FrameHandler for AgentFrames {
    async fn on_text(&self, text: &str) -> Result<()> {
        self.channel.handle_inbound(self.agent_id, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::websocket::connection::Identity;
    use assert_matches::assert_matches;
    use serde_json::json;
    use switchyard_core::protocol::agent::{AgentMessageKind, StatusReport};
    use tokio::sync::mpsc;

    struct Fixture {
        channel: Arc<AgentChannel>,
        _handle: JoinHandle<()>,
    }

    fn fixture() -> Fixture {
        let signals = Arc::new(EventBus::new("agent"));
        let (channel, handle) = AgentChannel::spawn(16, signals, CancellationToken::new());
        Fixture {
            channel,
            _handle: handle,
        }
    }

    async fn connect(channel: &AgentChannel, id: u64, capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = Connection::new(Identity::Agent(AgentId::new(id)), capacity);
        channel.register(conn.clone()).await.unwrap();
        channel.registry().flush().await.unwrap();
        (conn, rx)
    }

    fn parse(frame: &Outbound) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    fn reply_frame(request_id: Option<&str>, message: &str) -> String {
        let mut v = json!({
            "type": "frpc_control_result",
            "data": {"action": "stop", "success": true, "message": message},
            "timestamp": 1,
        });
        if let Some(rid) = request_id {
            v["request_id"] = json!(rid);
        }
        v.to_string()
    }

    #[tokio::test]
    async fn push_to_disconnected_agent_fails_fast() {
        let f = fixture();
        let started = std::time::Instant::now();
        let err = f.channel.push_shutdown(AgentId::new(42)).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(10));
        assert_matches!(err, FabricError::NotConnected { agent_id } if agent_id == AgentId::new(42));
    }

    #[tokio::test]
    async fn pushes_produce_envelopes() {
        let f = fixture();
        let (_conn, mut rx) = connect(&f.channel, 4, 8).await;
        f.channel
            .push_cert(AgentId::new(4), "example.com", "CERT", "KEY")
            .unwrap();
        f.channel.delete_cert(AgentId::new(4), "old.example.com").unwrap();
        f.channel
            .push_config_update(AgentId::new(4), json!({"common": {}}), 12)
            .unwrap();

        let cert = parse(&rx.recv().await.unwrap());
        assert_eq!(cert["type"], "cert_sync");
        assert_eq!(cert["client_id"], 4);
        assert_eq!(cert["data"]["domain"], "example.com");
        assert_eq!(cert["data"]["key_pem"], "KEY");
        assert!(cert.get("request_id").is_none());

        let delete = parse(&rx.recv().await.unwrap());
        assert_eq!(delete["type"], "cert_delete");
        assert_eq!(delete["data"]["domain"], "old.example.com");

        let config = parse(&rx.recv().await.unwrap());
        assert_eq!(config["type"], "config_update");
        assert_eq!(config["data"]["version"], 12);
    }

    #[tokio::test]
    async fn full_agent_queue_reports_queue_full() {
        let f = fixture();
        let (_conn, _rx) = connect(&f.channel, 5, 1).await;
        f.channel.push_frpc_control(AgentId::new(5), "restart").unwrap();
        assert_matches!(
            f.channel.push_frpc_control(AgentId::new(5), "restart"),
            Err(FabricError::QueueFull { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn command_and_wait_receives_reply_before_deadline() {
        let f = fixture();
        let (_conn, mut rx) = connect(&f.channel, 7, 8).await;
        let channel = Arc::clone(&f.channel);
        let agent = tokio::spawn(async move {
            let cmd = parse(&rx.recv().await.unwrap());
            assert_eq!(cmd["type"], "frpc_control");
            assert_eq!(cmd["data"]["action"], "stop");
            let rid = cmd["request_id"].as_str().unwrap().to_owned();
            tokio::time::sleep(Duration::from_millis(200)).await;
            channel
                .handle_inbound(AgentId::new(7), &reply_frame(Some(&rid), "ok"))
                .unwrap();
        });

        let started = Instant::now();
        let reply = f
            .channel
            .command_and_wait(AgentId::new(7), "stop", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(reply.success);
        assert_eq!(reply.message, "ok");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(f.channel.pending_for(AgentId::new(7)), 0);
        agent.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn command_and_wait_times_out_and_cleans_up() {
        let f = fixture();
        let (_conn, _rx) = connect(&f.channel, 8, 8).await;
        let started = Instant::now();
        let err = f
            .channel
            .command_and_wait(AgentId::new(8), "stop", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_matches!(err, FabricError::Timeout { timeout, .. } if timeout == Duration::from_millis(500));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(f.channel.pending_for(AgentId::new(8)), 0);
    }

    #[tokio::test]
    async fn command_and_wait_to_missing_agent_leaves_nothing_pending() {
        let f = fixture();
        let err = f
            .channel
            .command_and_wait(AgentId::new(9), "stop", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_matches!(err, FabricError::NotConnected { .. });
        assert_eq!(f.channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waits_on_one_agent_get_their_own_replies() {
        let f = fixture();
        let (_conn, mut rx) = connect(&f.channel, 2, 8).await;

        let c1 = Arc::clone(&f.channel);
        let w1 = tokio::spawn(async move { c1.command_and_wait(AgentId::new(2), "stop", Duration::from_secs(5)).await });
        let first = parse(&rx.recv().await.unwrap());
        let c2 = Arc::clone(&f.channel);
        let w2 = tokio::spawn(async move { c2.command_and_wait(AgentId::new(2), "start", Duration::from_secs(5)).await });
        let second = parse(&rx.recv().await.unwrap());
        assert_eq!(f.channel.pending_for(AgentId::new(2)), 2);

        f.channel
            .handle_inbound(AgentId::new(2), &reply_frame(second["request_id"].as_str(), "for-second"))
            .unwrap();
        f.channel
            .handle_inbound(AgentId::new(2), &reply_frame(first["request_id"].as_str(), "for-first"))
            .unwrap();

        assert_eq!(w1.await.unwrap().unwrap().message, "for-first");
        assert_eq!(w2.await.unwrap().unwrap().message, "for-second");
        assert_eq!(f.channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_without_request_id_resolves_oldest_wait() {
        let f = fixture();
        let (_conn, mut rx) = connect(&f.channel, 3, 8).await;
        let c = Arc::clone(&f.channel);
        let waiter = tokio::spawn(async move { c.command_and_wait(AgentId::new(3), "stop", Duration::from_secs(5)).await });
        let _ = rx.recv().await.unwrap();
        f.channel
            .handle_inbound(AgentId::new(3), &reply_frame(None, "legacy"))
            .unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().message, "legacy");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_after_send_resolves_wait_early() {
        let f = fixture();
        let (_conn, mut rx) = connect(&f.channel, 7, 8).await;
        let c = Arc::clone(&f.channel);
        let started = Instant::now();
        let waiter = tokio::spawn(async move { c.command_and_wait(AgentId::new(7), "stop", Duration::from_secs(30)).await });

        let cmd = parse(&rx.recv().await.unwrap());
        f.channel.shutdown();

        assert_matches!(waiter.await.unwrap(), Err(FabricError::ShuttingDown));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(f.channel.pending_count(), 0);

        // A reply racing the shutdown finds no waiter and is harmless.
        f.channel
            .handle_inbound(AgentId::new(7), &reply_frame(cmd["request_id"].as_str(), "late"))
            .unwrap();
        assert_eq!(f.channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_before_send_refuses_commands() {
        let f = fixture();
        let (_conn, _rx) = connect(&f.channel, 7, 8).await;
        f.channel.shutdown();
        assert!(f.channel.is_shutting_down());
        assert_matches!(
            f.channel
                .command_and_wait(AgentId::new(7), "stop", Duration::from_secs(2))
                .await,
            Err(FabricError::ShuttingDown)
        );
        assert_matches!(f.channel.push_shutdown(AgentId::new(7)), Err(FabricError::ShuttingDown));
        assert_eq!(f.channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn inbound_messages_reach_subscribers() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.channel.subscribe(
            AgentSignalKind::Message(AgentMessageKind::StatusReport),
            handler_fn(move |signal: AgentSignal| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(signal);
                }
            }),
        );
        f.channel
            .handle_inbound(
                AgentId::new(6),
                r#"{"type":"status_report","data":{"frpc_running":true,"proxy_count":3}}"#,
            )
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            signal,
            AgentSignal::Message {
                agent_id: AgentId::new(6),
                message: AgentMessage::StatusReport(StatusReport {
                    frpc_running: true,
                    proxy_count: 3,
                    ..StatusReport::default()
                }),
                request_id: None,
            }
        );
    }

    #[tokio::test]
    async fn inbound_decode_rules() {
        let f = fixture();
        f.channel
            .handle_inbound(AgentId::new(1), r#"{"type":"telemetry","data":{}}"#)
            .unwrap();
        assert_matches!(
            f.channel.handle_inbound(AgentId::new(1), "{not json"),
            Err(FabricError::Serialization(_))
        );
    }

    #[tokio::test]
    async fn agent_frames_delegate_to_channel() {
        let f = fixture();
        let frames = AgentFrames::new(Arc::clone(&f.channel), AgentId::new(1));
        assert_matches!(frames.on_text("[]").await, Err(FabricError::Serialization(_)));
    }
}
