//! Live WebSocket connection state.
//!
//! The outbound queue's only `Sender` lives inside the [`Connection`]. The
//! owning registry calls [`Connection::close`], which drops that sender so
//! the write pump sees the queue end. Producers can only `try_send`; they
//! never close.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use switchyard_core::{AgentId, ConnectionId, FabricError};
use tokio::sync::mpsc;

/// A serialized text frame, shared between every recipient of a broadcast.
pub type Outbound = Arc<str>;

/// Who is on the other end of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Not yet identified.
    Anonymous,
    /// A remote agent.
    Agent(AgentId),
    /// A browser dashboard, keyed by its session label.
    Dashboard(String),
    /// A browser tailing one agent's log.
    LogViewer {
        /// Agent whose log is shown.
        agent_id: AgentId,
        /// Which log.
        log_type: String,
    },
}

impl Identity {
    /// Agent this identity is scoped to, if any.
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            Self::Agent(id) | Self::LogViewer { agent_id: id, .. } => Some(*id),
            Self::Anonymous | Self::Dashboard(_) => None,
        }
    }

    /// Short label used in logs and metrics.
    pub fn role(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Agent(_) => "agent",
            Self::Dashboard(_) => "dashboard",
            Self::LogViewer { .. } => "log_viewer",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("anonymous"),
            Self::Agent(id) => write!(f, "agent:{id}"),
            Self::Dashboard(session) => write!(f, "dashboard:{session}"),
            Self::LogViewer { agent_id, log_type } => write!(f, "logs:{agent_id}:{log_type}"),
        }
    }
}

/// Why an enqueue was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity.
    Full,
    /// Queue closed by the registry, or the write pump is gone.
    Closed,
}

impl EnqueueError {
    /// Convert to the fabric taxonomy, naming `target` in the message.
    pub fn into_fabric(self, target: impl fmt::Display) -> FabricError {
        match self {
            Self::Full => FabricError::QueueFull {
                target: target.to_string(),
            },
            Self::Closed => FabricError::closed(format!("outbound queue of {target} is closed")),
        }
    }
}

/// A connected WebSocket peer.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    tx: RwLock<Option<mpsc::Sender<Outbound>>>,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

impl Connection {
    /// Create a connection and the receiving half of its outbound queue.
    ///
    /// `capacity` is clamped to at least one slot.
    pub fn new(identity: Identity, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            identity,
            tx: RwLock::new(Some(tx)),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
        });
        (conn, rx)
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Peer identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Non-blocking enqueue of one text frame.
    pub fn try_send(&self, frame: Outbound) -> Result<(), EnqueueError> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(EnqueueError::Closed);
        };
        tx.try_send(frame).map_err(|e| {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            }
        })
    }

    /// Close the outbound queue. Returns `true` only for the call that
    /// actually closed it.
    pub(crate) fn close(&self) -> bool {
        self.tx.write().take().is_some()
    }

    /// Whether the outbound queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or since connecting).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames refused by [`Self::try_send`].
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn dashboard(capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        Connection::new(Identity::Dashboard("s1".into()), capacity)
    }

    #[tokio::test]
    async fn send_reaches_receiver() {
        let (conn, mut rx) = dashboard(4);
        conn.try_send(Arc::from("hello")).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_refuses_and_counts() {
        let (conn, _rx) = dashboard(1);
        conn.try_send(Arc::from("one")).unwrap();
        assert_eq!(conn.try_send(Arc::from("two")), Err(EnqueueError::Full));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_is_reported_once_and_ends_queue() {
        let (conn, mut rx) = dashboard(4);
        conn.try_send(Arc::from("last")).unwrap();
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert_eq!(&*rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn send_after_close_is_refused() {
        let (conn, _rx) = dashboard(4);
        let _ = conn.close();
        assert_eq!(conn.try_send(Arc::from("x")), Err(EnqueueError::Closed));
    }

    #[test]
    fn send_with_dropped_receiver_is_closed() {
        let (conn, rx) = dashboard(4);
        drop(rx);
        assert_eq!(conn.try_send(Arc::from("x")), Err(EnqueueError::Closed));
    }

    #[test]
    fn enqueue_error_maps_to_fabric_error() {
        assert_matches!(
            EnqueueError::Full.into_fabric("agent 7"),
            FabricError::QueueFull { target } if target == "agent 7"
        );
        assert_matches!(
            EnqueueError::Closed.into_fabric("agent 7"),
            FabricError::ConnectionClosed { .. }
        );
    }

    #[test]
    fn identity_scoping() {
        let agent = AgentId::new(3);
        assert_eq!(Identity::Agent(agent).agent_id(), Some(agent));
        let viewer = Identity::LogViewer {
            agent_id: agent,
            log_type: "frpc".into(),
        };
        assert_eq!(viewer.agent_id(), Some(agent));
        assert_eq!(viewer.to_string(), "logs:3:frpc");
        assert_eq!(Identity::Dashboard("a".into()).agent_id(), None);
        assert_eq!(Identity::Anonymous.role(), "anonymous");
    }

    #[test]
    fn mark_alive_resets_idle() {
        let (conn, _rx) = dashboard(1);
        conn.mark_alive();
        assert!(conn.idle_for() < Duration::from_secs(1));
        assert!(conn.age() < Duration::from_secs(1));
    }
}
