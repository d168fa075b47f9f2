//! Connection registry: a single-owner actor over a set of live connections.
//!
//! Register, unregister and broadcast all travel on one ordered command
//! channel, so a broadcast observes every registration submitted before it.
//! The member map sits behind a `parking_lot::RwLock` that only the loop
//! writes; other tasks read it for counts and membership tests.
//!
//! A member whose queue is full or closed at broadcast time is shed: its
//! queue is closed and it is removed. Broadcast never blocks on a slow peer.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use switchyard_core::protocol::dashboard::DashboardFrame;
use switchyard_core::{AgentId, ConnectionId, FabricError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Connection, EnqueueError, Identity, Outbound};
use crate::metrics::{HUB_MEMBERS, HUB_SHED_TOTAL};

/// Which members a broadcast targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every member.
    All,
    /// Members whose identity is scoped to this agent.
    Agent(AgentId),
    /// Log viewers tailing one log of one agent.
    LogStream {
        /// Agent whose log is shown.
        agent_id: AgentId,
        /// Which log.
        log_type: String,
    },
}

impl Target {
    fn matches(&self, conn: &Connection) -> bool {
        match (self, conn.identity()) {
            (Self::All, _) => true,
            (Self::Agent(agent_id), identity) => identity.agent_id() == Some(*agent_id),
            (
                Self::LogStream { agent_id, log_type },
                Identity::LogViewer {
                    agent_id: viewer_agent,
                    log_type: viewer_log,
                },
            ) => agent_id == viewer_agent && log_type == viewer_log,
            (Self::LogStream { .. }, _) => false,
        }
    }
}

enum Command {
    Register(Arc<Connection>),
    Unregister(ConnectionId),
    Broadcast { payload: Outbound, target: Target },
    Flush(oneshot::Sender<()>),
}

type Members = Arc<RwLock<HashMap<ConnectionId, Arc<Connection>>>>;

/// Handle to a running registry loop. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    name: &'static str,
    tx: mpsc::Sender<Command>,
    members: Members,
    cancel: CancellationToken,
}

impl Hub {
    /// Start a registry loop named `name` (used in logs and metric labels).
    ///
    /// The loop exits when `cancel` fires, after closing every member queue.
    pub fn spawn(
        name: &'static str,
        command_buffer: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(command_buffer.max(1));
        let members: Members = Arc::default();
        let handle = tokio::spawn(run_loop(name, rx, members.clone(), cancel.clone()));
        let hub = Self {
            name,
            tx,
            members,
            cancel,
        };
        (hub, handle)
    }

    /// Registry name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add a connection. Fails with `ShuttingDown` once cancelled, in which
    /// case the connection's queue is closed.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<()> {
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

    /// Remove a connection and close its queue. Unknown IDs are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.tx.send(Command::Unregister(id)).await.is_err() {
            debug!(hub = self.name, "unregister after shutdown ignored");
        }
    }

    /// Deliver `payload` to every current member.
    pub async fn broadcast(&self, payload: Outbound) -> Result<()> {
        self.submit(payload, Target::All).await
    }

    /// Deliver `payload` to members scoped to `agent_id`.
    pub async fn broadcast_to(&self, agent_id: AgentId, payload: Outbound) -> Result<()> {
        self.submit(payload, Target::Agent(agent_id)).await
    }

    /// Serialize `frame` once and broadcast it to `target`.
    pub async fn broadcast_frame(&self, frame: &DashboardFrame, target: Target) -> Result<()> {
        self.submit(Outbound::from(frame.to_json()), target).await
    }

    async fn submit(&self, payload: Outbound, target: Target) -> Result<()> {
        self.tx
            .send(Command::Broadcast { payload, target })
            .await
            .map_err(|_| FabricError::ShuttingDown)
    }

    /// Resolve once every command submitted before this call has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(tx))
            .await
            .map_err(|_| FabricError::ShuttingDown)?;
        rx.await.map_err(|_| FabricError::ShuttingDown)
    }

    /// Current member count.
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether the registry has no members.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Whether `id` is a current member.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.read().contains_key(id)
    }

    /// Members scoped to `agent_id`.
    pub fn count_for(&self, agent_id: AgentId) -> usize {
        self.members
            .read()
            .values()
            .filter(|c| c.identity().agent_id() == Some(agent_id))
            .count()
    }

    /// IDs of current members, in no particular order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.members.read().keys().cloned().collect()
    }
}

async fn run_loop(
    name: &'static str,
    mut rx: mpsc::Receiver<Command>,
    members: Members,
    cancel: CancellationToken,
) {
    debug!(hub = name, "registry loop started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => apply(name, &members, cmd),
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
            Command::Unregister(_) | Command::Broadcast { .. } => {}
        }
    }

    let drained: Vec<_> = members.write().drain().map(|(_, c)| c).collect();
    for conn in &drained {
        let _ = conn.close();
    }
    gauge!(HUB_MEMBERS, "hub" => name).set(0.0);
    info!(hub = name, closed = drained.len(), "registry loop stopped");
}

#[allow(clippy::cast_precision_loss)]
fn apply(name: &'static str, members: &Members, cmd: Command) {
    match cmd {
        Command::Register(conn) => {
            let id = conn.id().clone();
            debug!(hub = name, conn_id = %id, identity = %conn.identity(), "register");
            let previous = members.write().insert(id, conn);
            if let Some(previous) = previous {
                let _ = previous.close();
            }
        }
        Command::Unregister(id) => {
            let removed = members.write().remove(&id);
            match removed {
                Some(conn) => {
                    let _ = conn.close();
                    debug!(hub = name, conn_id = %id, "unregister");
                }
                None => debug!(hub = name, conn_id = %id, "unregister of unknown connection ignored"),
            }
        }
        Command::Broadcast { payload, target } => broadcast(name, members, &payload, &target),
        Command::Flush(reply) => {
            let _ = reply.send(());
        }
    }
    gauge!(HUB_MEMBERS, "hub" => name).set(members.read().len() as f64);
}

fn broadcast(name: &'static str, members: &Members, payload: &Outbound, target: &Target) {
    let mut shed = Vec::new();
    {
        let map = members.read();
        for (id, conn) in map.iter() {
            if !target.matches(conn) {
                continue;
            }
            if let Err(err) = conn.try_send(payload.clone()) {
                shed.push((id.clone(), err));
            }
        }
    }
    if shed.is_empty() {
        return;
    }

    let mut map = members.write();
    for (id, err) in shed {
        if let Some(conn) = map.remove(&id) {
            let _ = conn.close();
            counter!(HUB_SHED_TOTAL, "hub" => name).increment(1);
            match err {
                EnqueueError::Full => warn!(
                    hub = name,
                    conn_id = %id,
                    identity = %conn.identity(),
                    dropped = conn.drop_count(),
                    "outbound queue full, shedding slow connection"
                ),
                EnqueueError::Closed => {
                    debug!(hub = name, conn_id = %id, "outbound queue closed, removing connection");
                }
            }
        }
    }
}
