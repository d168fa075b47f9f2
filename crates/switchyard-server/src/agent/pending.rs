//! Outstanding command-and-wait requests.
//!
//! Entries are keyed by `(AgentId, RequestId)`, so several waits on one agent
//! do not share a reply slot. Each slot is a `oneshot` sender and receives
//! at most one value. The [`PendingGuard`] returned by
//! [`PendingTable::register`] removes the entry when dropped, so an entry
//! never outlives its waiter.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_core::protocol::agent::CommandReply;
use switchyard_core::{AgentId, RequestId};
use tokio::sync::oneshot;

type Key = (AgentId, RequestId);

struct Slot {
    seq: u64,
    tx: oneshot::Sender<CommandReply>,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    slots: HashMap<Key, Slot>,
}

/// Table of reply slots.
#[derive(Default)]
pub struct PendingTable {
    state: Mutex<State>,
}

/// Removes its entry from the table on drop.
#[must_use = "dropping the guard removes the pending entry"]
pub struct PendingGuard {
    table: Arc<PendingTable>,
    key: Key,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let _ = self.table.state.lock().slots.remove(&self.key);
    }
}

impl PendingGuard {
    /// Request ID of the guarded entry.
    pub fn request_id(&self) -> &RequestId {
        &self.key.1
    }
}

impl PendingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a reply slot for `(agent_id, request_id)`.
    pub fn register(
        table: &Arc<Self>,
        agent_id: AgentId,
        request_id: RequestId,
    ) -> (PendingGuard, oneshot::Receiver<CommandReply>) {
        let (tx, rx) = oneshot::channel();
        let key = (agent_id, request_id);
        {
            let mut state = table.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let _ = state.slots.insert(key.clone(), Slot { seq, tx });
        }
        let guard = PendingGuard {
            table: Arc::clone(table),
            key,
        };
        (guard, rx)
    }

    /// Deliver `reply` to a waiter of `agent_id`.
    ///
    /// With a `request_id` only the exact entry matches. Without one, the
    /// oldest entry of that agent is chosen. Returns whether a waiter took
    /// the reply.
    pub fn resolve(&self, agent_id: AgentId, request_id: Option<&RequestId>, reply: CommandReply) -> bool {
        let slot = {
            let mut state = self.state.lock();
            let key = match request_id {
                Some(rid) => Some((agent_id, rid.clone())),
                None => state
                    .slots
                    .iter()
                    .filter(|((agent, _), _)| *agent == agent_id)
                    .min_by_key(|(_, slot)| slot.seq)
                    .map(|(key, _)| key.clone()),
            };
            key.and_then(|k| state.slots.remove(&k))
        };
        slot.is_some_and(|slot| slot.tx.send(reply).is_ok())
    }

    /// Drop every slot. Waiters observe a closed channel.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.slots.len();
        state.slots.clear();
        n
    }

    /// Open entries.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Whether no entries are open.
    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Open entries for `agent_id`.
    pub fn count_for(&self, agent_id: AgentId) -> usize {
        self.state
            .lock()
            .slots
            .keys()
            .filter(|(agent, _)| *agent == agent_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(message: &str) -> CommandReply {
        CommandReply {
            action: "stop".into(),
            success: true,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn exact_match_resolves_its_own_waiter() {
        let table = Arc::new(PendingTable::new());
        let agent = AgentId::new(7);
        let (_g1, rx1) = PendingTable::register(&table, agent, RequestId::from("r1"));
        let (_g2, rx2) = PendingTable::register(&table, agent, RequestId::from("r2"));

        assert!(table.resolve(agent, Some(&RequestId::from("r2")), reply("second")));
        assert!(table.resolve(agent, Some(&RequestId::from("r1")), reply("first")));

        assert_eq!(rx1.await.unwrap().message, "first");
        assert_eq!(rx2.await.unwrap().message, "second");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn missing_request_id_resolves_oldest() {
        let table = Arc::new(PendingTable::new());
        let agent = AgentId::new(1);
        let (_g1, rx1) = PendingTable::register(&table, agent, RequestId::from("b-later-sorted-first"));
        let (_g2, _rx2) = PendingTable::register(&table, agent, RequestId::from("a"));

        assert!(table.resolve(agent, None, reply("legacy")));
        assert_eq!(rx1.await.unwrap().message, "legacy");
        assert_eq!(table.count_for(agent), 1);
    }

    #[test]
    fn unknown_or_other_agent_is_not_resolved() {
        let table = Arc::new(PendingTable::new());
        let (_g, _rx) = PendingTable::register(&table, AgentId::new(1), RequestId::from("r"));
        assert!(!table.resolve(AgentId::new(2), Some(&RequestId::from("r")), reply("x")));
        assert!(!table.resolve(AgentId::new(2), None, reply("x")));
        assert!(!table.resolve(AgentId::new(1), Some(&RequestId::from("other")), reply("x")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn slot_accepts_one_value() {
        let table = Arc::new(PendingTable::new());
        let agent = AgentId::new(1);
        let (_g, _rx) = PendingTable::register(&table, agent, RequestId::from("r"));
        assert!(table.resolve(agent, Some(&RequestId::from("r")), reply("one")));
        assert!(!table.resolve(agent, Some(&RequestId::from("r")), reply("two")));
    }

    #[test]
    fn guard_drop_removes_entry() {
        let table = Arc::new(PendingTable::new());
        let agent = AgentId::new(3);
        let (guard, rx) = PendingTable::register(&table, agent, RequestId::from("r"));
        assert_eq!(guard.request_id().as_str(), "r");
        assert_eq!(table.count_for(agent), 1);
        drop(guard);
        drop(rx);
        assert_eq!(table.count_for(agent), 0);
    }

    #[tokio::test]
    async fn cancel_all_closes_waiters() {
        let table = Arc::new(PendingTable::new());
        let (_g, rx) = PendingTable::register(&table, AgentId::new(1), RequestId::from("r"));
        assert_eq!(table.cancel_all(), 1);
        assert!(rx.await.is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn resolve_with_dropped_receiver_reports_false() {
        let table = Arc::new(PendingTable::new());
        let agent = AgentId::new(1);
        let (_g, rx) = PendingTable::register(&table, agent, RequestId::from("r"));
        drop(rx);
        assert!(!table.resolve(agent, None, reply("late")));
        assert!(table.is_empty());
    }
}
