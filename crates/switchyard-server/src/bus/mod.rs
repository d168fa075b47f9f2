//! In-process publish/subscribe keyed by event kind.
//!
//! One [`EventBus`] instance carries domain [`Event`]s, another carries
//! [`AgentSignal`](crate::agent::signal::AgentSignal)s. Both are built once
//! in the composition root and shared by `Arc`.
//!
//! - `subscribe` appends; handlers of a kind run in registration order
//! - `publish` spawns one task per handler and returns immediately
//! - `publish_sync` awaits each handler in order
//!
//! A panicking handler is caught, logged and counted as one lost delivery.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use parking_lot::RwLock;
use switchyard_core::{Event, EventKind};
use tracing::{error, trace, warn};

use crate::metrics::BUS_HANDLER_PANICS_TOTAL;

/// Something that can be routed by kind.
pub trait Routable: Clone + Send + Sync + 'static {
    /// Subscription key.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Key this value is delivered under.
    fn route(&self) -> Self::Kind;
}

impl Routable for Event {
    type Kind = EventKind;

    fn route(&self) -> EventKind {
        self.kind()
    }
}

/// A subscriber.
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// Handle one delivery.
    async fn handle(&self, event: &E);
}

struct FnHandler<E, F> {
    f: F,
    _event: PhantomData<fn(E)>,
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for FnHandler<E, F>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: &E) {
        (self.f)(event.clone()).await;
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<E, F, Fut>(f: F) -> Arc<dyn EventHandler<E>>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _event: PhantomData,
    })
}

type Handlers<E> = Vec<Arc<dyn EventHandler<E>>>;

/// Publish/subscribe hub for one event type.
pub struct EventBus<E: Routable> {
    name: &'static str,
    handlers: RwLock<HashMap<E::Kind, Handlers<E>>>,
}

impl<E: Routable> EventBus<E> {
    /// Empty bus; `name` labels logs and metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Append `handler` to the subscribers of `kind`.
    pub fn subscribe(&self, kind: E::Kind, handler: Arc<dyn EventHandler<E>>) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Subscribers of `kind`.
    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    fn handlers_for(&self, kind: E::Kind) -> Handlers<E> {
        self.handlers.read().get(&kind).cloned().unwrap_or_default()
    }

    /// Deliver `event` to each subscriber on its own task. Returns at once.
    ///
    /// Outside a Tokio runtime the event is dropped with a warning.
    pub fn publish(&self, event: E) {
        let kind = event.route();
        let handlers = self.handlers_for(kind);
        if handlers.is_empty() {
            trace!(bus = self.name, ?kind, "no subscribers");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(bus = self.name, ?kind, "publish outside runtime, event dropped");
            return;
        };
        let event = Arc::new(event);
        for handler in handlers {
            let event = Arc::clone(&event);
            let name = self.name;
            drop(runtime.spawn(async move {
                deliver(name, kind, handler.as_ref(), &*event).await;
            }));
        }
    }

    /// Deliver `event` to each subscriber in registration order, awaiting
    /// each one before the next.
    pub async fn publish_sync(&self, event: &E) {
        let kind = event.route();
        for handler in self.handlers_for(kind) {
            deliver(self.name, kind, handler.as_ref(), event).await;
        }
    }
}

async fn deliver<E, K: Debug>(bus: &'static str, kind: K, handler: &dyn EventHandler<E>, event: &E) {
    if let Err(panic) = AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        counter!(BUS_HANDLER_PANICS_TOTAL, "bus" => bus).increment(1);
        error!(bus, ?kind, panic = %panic_message(panic.as_ref()), "event handler panicked");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use parking_lot::Mutex;
    use switchyard_core::AgentId;
    use tokio::sync::mpsc;

    fn alert(n: u64) -> Event {
        Event::Alert {
            rule_id: n,
            severity: "warning".into(),
            message: format!("alert {n}"),
        }
    }

    struct Exploding(&'static str);

    #[async_trait]
    impl EventHandler<Event> for Exploding {
        async fn handle(&self, _event: &Event) {
            panic!("{}", self.0);
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn EventHandler<Event>> {
        let log = Arc::clone(log);
        handler_fn(move |_ev: Event| {
            let log = Arc::clone(&log);
            async move { log.lock().push(tag) }
        })
    }

    #[tokio::test]
    async fn publish_sync_runs_in_order() {
        let bus = EventBus::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::Alert, recorder(&log, "a"));
        bus.subscribe(EventKind::Alert, recorder(&log, "b"));
        bus.subscribe(EventKind::Alert, recorder(&log, "c"));
        bus.publish_sync(&alert(1)).await;
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn publish_sync_survives_panicking_handler() {
        let (logs, _guard) = switchyard_logging::capture_logs();
        let bus = EventBus::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::Alert, recorder(&log, "first"));
        bus.subscribe(EventKind::Alert, Arc::new(Exploding("handler exploded")));
        bus.subscribe(EventKind::Alert, recorder(&log, "third"));

        bus.publish_sync(&alert(2)).await;

        assert_eq!(*log.lock(), vec!["first", "third"]);
        assert!(logs.has_event(tracing::Level::ERROR, "event handler panicked"));
        let panicked = logs
            .events()
            .into_iter()
            .find(|e| e.message.contains("panicked"))
            .unwrap();
        assert_eq!(panicked.field("panic"), Some("handler exploded"));
    }

    #[tokio::test]
    async fn publish_delivers_to_every_subscriber() {
        let bus = Arc::new(EventBus::new("test"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        for tag in ["x", "y"] {
            let tx = tx.clone();
            bus.subscribe(
                EventKind::ClientStatusChanged,
                handler_fn(move |ev: Event| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((tag, ev.agent_id()));
                    }
                }),
            );
        }
        bus.publish(Event::ClientStatusChanged {
            client_id: AgentId::new(5),
            online: true,
        });

        let mut got = Vec::new();
        for _ in 0..2 {
            got.push(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        got.sort_unstable();
        assert_eq!(got, vec![("x", Some(AgentId::new(5))), ("y", Some(AgentId::new(5)))]);
    }

    #[tokio::test]
    async fn publish_isolates_panics() {
        let bus = EventBus::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::Alert, Arc::new(Exploding("boom")));
        let counter = Arc::clone(&hits);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        bus.subscribe(
            EventKind::Alert,
            handler_fn(move |_ev: Event| {
                let counter = Arc::clone(&counter);
                let done_tx = done_tx.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    let _ = done_tx.send(());
                }
            }),
        );
        bus.publish(alert(3));
        tokio::time::timeout(Duration::from_secs(1), done_rx.recv()).await.unwrap().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_kinds_are_not_delivered() {
        let bus = EventBus::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::SshLog, recorder(&log, "ssh"));
        bus.publish_sync(&alert(4)).await;
        assert!(log.lock().is_empty());
        assert_eq!(bus.handler_count(EventKind::SshLog), 1);
        assert_eq!(bus.handler_count(EventKind::Alert), 0);
    }

    #[test]
    fn publish_without_runtime_does_not_panic() {
        let bus = EventBus::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::Alert, recorder(&log, "never"));
        bus.publish(alert(5));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn panic_message_extracts_text() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn std::any::Any + Send> = Box::new("static");
        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "static");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
