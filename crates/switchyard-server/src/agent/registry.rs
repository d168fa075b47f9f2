//! Agent registry: at most one live connection per agent.
//!
//! Same actor shape as the dashboard hub, keyed by [`AgentId`] instead of
//! connection ID. The loop is the only writer of the map and the only
//! source of connectivity signals, so each online/offline transition is
//! announced exactly once. Signals leave the loop through one forwarding
//! task that delivers them with `publish_sync`, so subscribers see every
//! agent's transitions in the order the loop applied them:
//!
//! - a new agent goes online
//! - a second connection for a live agent replaces the first silently
//! - the current connection unregistering takes the agent offline
//! - a replaced connection unregistering later changes nothing

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use switchyard_core::{AgentId, ConnectionId, FabricError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::signal::AgentSignal;
use crate::bus::EventBus;
use crate::metrics::AGENTS_CONNECTED;
use crate::websocket::connection::Connection;

enum Command {
    Register(Arc<Connection>),
    Unregister {
        agent_id: AgentId,
        conn_id: ConnectionId,
    },
    Flush(oneshot::Sender<()>),
}

type Agents = Arc<RwLock<HashMap<AgentId, Arc<Connection>>>>;

/// Handle to the agent registry loop. Cheap to clone.
#[derive(Clone)]
pub struct AgentRegistry {
    tx: mpsc::Sender<Command>,
    agents: Agents,
    cancel: CancellationToken,
}

impl AgentRegistry {
    /// Start the loop. Connectivity signals go to `signals`.
    pub fn spawn(
        command_buffer: usize,
        signals: Arc<EventBus<AgentSignal>>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(command_buffer.max(1));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let agents: Agents = Arc::default();
        let forwarder = tokio::spawn(forward_signals(signal_rx, signals));
        let registry_loop = run_loop(rx, agents.clone(), signal_tx, cancel.clone());
        let handle = tokio::spawn(async move {
            registry_loop.await;
            if let Err(e) = forwarder.await {
                warn!(error = %e, "connectivity forwarder ended abnormally");
            }
        });
        (Self { tx, agents, cancel }, handle)
    }

    /// Register an agent connection. The identity must be
    /// [`Identity::Agent`](crate::websocket::connection::Identity::Agent).
    pub async fn register(&self, conn: Arc<Connection>) -> Result<()> {
        if conn.identity().agent_id().is_none() {
            let _ = conn.close();
            return Err(FabricError::closed(format!(
                "{} is not an agent connection",
                conn.identity()
            )));
        }
        if self.cancel.is_cancelled() {
            let _ = conn.close();
            return Err(FabricError::ShuttingDown);
        }
        match self.tx.send(Command::Register(conn)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(cmd)) => {
                if let Command::Register(conn) = cmd {
                    let _ = conn.close();
                }
                Err(FabricError::ShuttingDown)
            }
        }
    }

    /// Unregister `conn_id` for `agent_id`. A no-op if that connection has
    /// already been replaced or removed.
    pub async fn unregister(&self, agent_id: AgentId, conn_id: ConnectionId) {
        let cmd = Command::Unregister { agent_id, conn_id };
        if self.tx.send(cmd).await.is_err() {
            debug!(%agent_id, "unregister after shutdown ignored");
        }
    }

    /// Resolve once every earlier command has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(tx))
            .await
            .map_err(|_| FabricError::ShuttingDown)?;
        rx.await.map_err(|_| FabricError::ShuttingDown)
    }

    /// Current connection of `agent_id`.
    pub fn get(&self, agent_id: AgentId) -> Option<Arc<Connection>> {
        self.agents.read().get(&agent_id).cloned()
    }

    /// Whether `agent_id` has a live connection.
    pub fn is_connected(&self, agent_id: AgentId) -> bool {
        self.agents.read().contains_key(&agent_id)
    }

    /// Connected agents, sorted.
    pub fn connected_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self.agents.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of connected agents.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether no agent is connected.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

/// Deliver connectivity signals one at a time, in loop order. Ends once the
/// registry loop drops its sender and the backlog is drained.
async fn forward_signals(mut rx: mpsc::UnboundedReceiver<AgentSignal>, signals: Arc<EventBus<AgentSignal>>) {
    while let Some(signal) = rx.recv().await {
        signals.publish_sync(&signal).await;
    }
}

fn announce(signals: &mpsc::UnboundedSender<AgentSignal>, agent_id: AgentId, online: bool) {
    if signals.send(AgentSignal::Connectivity { agent_id, online }).is_err() {
        debug!(%agent_id, online, "connectivity forwarder gone, signal dropped");
    }
}

async fn run_loop(
    mut rx: mpsc::Receiver<Command>,
    agents: Agents,
    signals: mpsc::UnboundedSender<AgentSignal>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => apply(&agents, &signals, cmd),
                None => break,
            },
        }
    }

    rx.close();
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Register(conn) => {
                let _ = conn.close();
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
            Command::Unregister { .. } => {}
        }
    }

    let drained: Vec<_> = agents.write().drain().collect();
    for (agent_id, conn) in &drained {
        let _ = conn.close();
        announce(&signals, *agent_id, false);
    }
    gauge!(AGENTS_CONNECTED).set(0.0);
    info!(closed = drained.len(), "agent registry stopped");
}

#[allow(clippy::cast_precision_loss)]
fn apply(agents: &Agents, signals: &mpsc::UnboundedSender<AgentSignal>, cmd: Command) {
    match cmd {
        Command::Register(conn) => {
            let Some(agent_id) = conn.identity().agent_id() else {
                return;
            };
            let conn_id = conn.id().clone();
            let previous = agents.write().insert(agent_id, conn);
            match previous {
                Some(old) => {
                    let _ = old.close();
                    warn!(%agent_id, old = %old.id(), new = %conn_id, "agent reconnected, replacing previous connection");
                }
                None => {
                    info!(%agent_id, %conn_id, "agent online");
                    announce(signals, agent_id, true);
                }
            }
        }
        Command::Unregister { agent_id, conn_id } => {
            let removed = {
                let mut map = agents.write();
                match map.get(&agent_id) {
                    Some(current) if *current.id() == conn_id => map.remove(&agent_id),
                    _ => None,
                }
            };
            match removed {
                Some(conn) => {
                    let _ = conn.close();
                    info!(%agent_id, %conn_id, "agent offline");
                    announce(signals, agent_id, false);
                }
                None => debug!(%agent_id, %conn_id, "stale unregister ignored"),
            }
        }
        Command::Flush(reply) => {
            let _ = reply.send(());
        }
    }
    gauge!(AGENTS_CONNECTED).set(agents.read().len() as f64);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::signal::AgentSignalKind;
    use crate::bus::handler_fn;
    use crate::websocket::connection::{Identity, Outbound};
    use assert_matches::assert_matches;

    struct Fixture {
        registry: AgentRegistry,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
        events: mpsc::UnboundedReceiver<(AgentId, bool)>,
    }

    fn fixture() -> Fixture {
        let signals = Arc::new(EventBus::new("agent"));
        let (tx, events) = mpsc::unbounded_channel();
        signals.subscribe(
            AgentSignalKind::Connectivity,
            handler_fn(move |signal: AgentSignal| {
                let tx = tx.clone();
                async move {
                    if let AgentSignal::Connectivity { agent_id, online } = signal {
                        let _ = tx.send((agent_id, online));
                    }
                }
            }),
        );
        let cancel = CancellationToken::new();
        let (registry, handle) = AgentRegistry::spawn(16, signals, cancel.clone());
        Fixture {
            registry,
            cancel,
            handle,
            events,
        }
    }

    fn agent(id: u64) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        Connection::new(Identity::Agent(AgentId::new(id)), 4)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<(AgentId, bool)>) -> (AgentId, bool) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn online_then_offline() {
        let mut f = fixture();
        let (conn, _rx) = agent(7);
        f.registry.register(conn.clone()).await.unwrap();
        f.registry.flush().await.unwrap();
        assert!(f.registry.is_connected(AgentId::new(7)));
        assert_eq!(next_event(&mut f.events).await, (AgentId::new(7), true));

        f.registry.unregister(AgentId::new(7), conn.id().clone()).await;
        f.registry.flush().await.unwrap();
        assert!(!f.registry.is_connected(AgentId::new(7)));
        assert!(conn.is_closed());
        assert_eq!(next_event(&mut f.events).await, (AgentId::new(7), false));
    }

    #[tokio::test]
    async fn replacement_is_silent_and_stale_unregister_is_inert() {
        let mut f = fixture();
        let (first, _rx1) = agent(3);
        let (second, _rx2) = agent(3);
        f.registry.register(first.clone()).await.unwrap();
        f.registry.register(second.clone()).await.unwrap();
        f.registry.unregister(AgentId::new(3), first.id().clone()).await;
        f.registry.flush().await.unwrap();
        settle().await;

        assert_eq!(next_event(&mut f.events).await, (AgentId::new(3), true));
        assert!(f.events.try_recv().is_err());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(f.registry.get(AgentId::new(3)).unwrap().id(), second.id());
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn non_agent_identity_rejected() {
        let f = fixture();
        let (conn, _rx) = Connection::new(Identity::Dashboard("d".into()), 1);
        assert_matches!(
            f.registry.register(conn.clone()).await,
            Err(FabricError::ConnectionClosed { .. })
        );
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn shutdown_takes_every_agent_offline() {
        let mut f = fixture();
        let (a, _ra) = agent(1);
        let (b, _rb) = agent(2);
        f.registry.register(a.clone()).await.unwrap();
        f.registry.register(b.clone()).await.unwrap();
        f.registry.flush().await.unwrap();
        let _ = next_event(&mut f.events).await;
        let _ = next_event(&mut f.events).await;

        f.cancel.cancel();
        f.handle.await.unwrap();

        let mut offline = vec![next_event(&mut f.events).await, next_event(&mut f.events).await];
        offline.sort_unstable();
        assert_eq!(offline, vec![(AgentId::new(1), false), (AgentId::new(2), false)]);
        assert!(a.is_closed() && b.is_closed());
        assert!(f.registry.is_empty());

        let (late, _rl) = agent(9);
        assert_matches!(f.registry.register(late).await, Err(FabricError::ShuttingDown));
    }

    #[tokio::test]
    async fn connected_agents_sorted() {
        let f = fixture();
        let mut queues = Vec::new();
        for id in [5, 1, 3] {
            let (conn, rx) = agent(id);
            queues.push(rx);
            f.registry.register(conn).await.unwrap();
        }
        f.registry.flush().await.unwrap();
        assert_eq!(
            f.registry.connected_agents(),
            vec![AgentId::new(1), AgentId::new(3), AgentId::new(5)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rapid_reconnects_are_announced_in_order() {
        let mut f = fixture();
        let mut queues = Vec::new();
        for _ in 0..200 {
            let (conn, rx) = agent(4);
            queues.push(rx);
            f.registry.register(conn.clone()).await.unwrap();
            f.registry.unregister(AgentId::new(4), conn.id().clone()).await;
        }
        f.registry.flush().await.unwrap();

        for round in 0..200 {
            assert_eq!(next_event(&mut f.events).await, (AgentId::new(4), true), "round {round}");
            assert_eq!(next_event(&mut f.events).await, (AgentId::new(4), false), "round {round}");
        }
        assert!(!f.registry.is_connected(AgentId::new(4)));
    }
}
