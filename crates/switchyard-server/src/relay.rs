//! Agent relay: [`AgentSignal`]s republished as domain [`Event`]s.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::Event;
use switchyard_core::events::ClientReport;
use switchyard_core::protocol::agent::AgentMessage;
use tracing::trace;

use crate::agent::{AgentSignal, AgentSignalKind};
use crate::bus::{EventBus, EventHandler};

/// Domain event for one agent signal.
pub fn signal_to_event(signal: &AgentSignal) -> Event {
    match signal {
        AgentSignal::Connectivity { agent_id, online } => Event::ClientStatusChanged {
            client_id: *agent_id,
            online: *online,
        },
        AgentSignal::Message { agent_id, message, .. } => {
            let client_id = *agent_id;
            match message.clone() {
                AgentMessage::StatusReport(r) => Event::ClientReport {
                    client_id,
                    report: ClientReport::Status(r),
                },
                AgentMessage::VersionReport(r) => Event::ClientReport {
                    client_id,
                    report: ClientReport::Version(r),
                },
                AgentMessage::ConfigSyncResult(r) => Event::ClientReport {
                    client_id,
                    report: ClientReport::ConfigSync(r),
                },
                AgentMessage::UpdateProgress(progress) => Event::ClientUpdateProgress { client_id, progress },
                AgentMessage::UpdateResult(result) => Event::ClientUpdateResult { client_id, result },
                AgentMessage::FrpcControlResult(reply) => Event::FrpcControlResult {
                    client_id,
                    action: reply.action,
                    success: reply.success,
                    message: reply.message,
                },
                AgentMessage::LogData(data) => Event::LogLine {
                    client_id,
                    log_type: data.log_type,
                    content: data.content,
                },
            }
        }
    }
}

/// Subscriber on the agent bus feeding the domain bus.
pub struct AgentRelay {
    events: Arc<EventBus<Event>>,
}

impl AgentRelay {
    /// Subscribe a relay to every signal kind on `signals`.
    pub fn install(signals: &EventBus<AgentSignal>, events: Arc<EventBus<Event>>) -> Arc<Self> {
        let relay = Arc::new(Self { events });
        for kind in AgentSignalKind::all() {
            signals.subscribe(kind, Arc::clone(&relay) as Arc<dyn EventHandler<AgentSignal>>);
        }
        relay
    }
}

#[async_trait]
impl EventHandler<AgentSignal> for AgentRelay {
    async fn handle(&self, signal: &AgentSignal) {
        let event = signal_to_event(signal);
        trace!(agent_id = %signal.agent_id(), kind = event.kind().as_str(), "relaying agent signal");
        self.events.publish_sync(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use switchyard_core::protocol::agent::{CommandReply, LogData};
    use switchyard_core::{AgentId, EventKind, RequestId};
    use tokio::sync::mpsc;

    fn message(message: AgentMessage) -> AgentSignal {
        AgentSignal::Message {
            agent_id: AgentId::new(4),
            message,
            request_id: None,
        }
    }

    #[test]
    fn connectivity_becomes_status_change() {
        let ev = signal_to_event(&AgentSignal::Connectivity {
            agent_id: AgentId::new(4),
            online: true,
        });
        assert_eq!(
            ev,
            Event::ClientStatusChanged {
                client_id: AgentId::new(4),
                online: true
            }
        );
    }

    #[test]
    fn command_reply_becomes_frpc_control_result() {
        let signal = AgentSignal::Message {
            agent_id: AgentId::new(7),
            message: AgentMessage::FrpcControlResult(CommandReply {
                action: "stop".into(),
                success: true,
                message: "ok".into(),
            }),
            request_id: Some(RequestId::from("r1")),
        };
        assert_eq!(
            signal_to_event(&signal),
            Event::FrpcControlResult {
                client_id: AgentId::new(7),
                action: "stop".into(),
                success: true,
                message: "ok".into(),
            }
        );
    }

    #[test]
    fn reports_share_one_event_kind() {
        for msg in [
            AgentMessage::StatusReport(Default::default()),
            AgentMessage::VersionReport(Default::default()),
            AgentMessage::ConfigSyncResult(Default::default()),
        ] {
            assert_eq!(signal_to_event(&message(msg)).kind(), EventKind::ClientReport);
        }
    }

    #[test]
    fn log_data_becomes_log_line() {
        let ev = signal_to_event(&message(AgentMessage::LogData(LogData {
            log_type: "frpc".into(),
            content: "started".into(),
        })));
        assert_eq!(ev.kind(), EventKind::LogLine);
        assert_eq!(ev.agent_id(), Some(AgentId::new(4)));
    }

    #[tokio::test]
    async fn installed_relay_publishes_domain_events() {
        let signals = EventBus::new("agent");
        let events = Arc::new(EventBus::new("events"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        events.subscribe(
            EventKind::ClientStatusChanged,
            handler_fn(move |ev: Event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(ev);
                }
            }),
        );
        let _relay = AgentRelay::install(&signals, Arc::clone(&events));

        signals
            .publish_sync(&AgentSignal::Connectivity {
                agent_id: AgentId::new(1),
                online: false,
            })
            .await;
        assert_eq!(
            rx.recv().await,
            Some(Event::ClientStatusChanged {
                client_id: AgentId::new(1),
                online: false
            })
        );
    }
}
