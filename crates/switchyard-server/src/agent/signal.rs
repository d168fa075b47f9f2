//! Signals published by the agent channel.

use switchyard_core::AgentId;
use switchyard_core::RequestId;
use switchyard_core::protocol::agent::{AgentMessage, AgentMessageKind};

use crate::bus::Routable;

/// Something an agent did: connected, disconnected, or sent a message.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentSignal {
    /// Connectivity changed. Emitted once per transition.
    Connectivity {
        /// Agent.
        agent_id: AgentId,
        /// New state.
        online: bool,
    },
    /// A decoded inbound message.
    Message {
        /// Sender.
        agent_id: AgentId,
        /// Payload.
        message: AgentMessage,
        /// Correlation key, if the agent echoed one.
        request_id: Option<RequestId>,
    },
}

/// Subscription key for [`AgentSignal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentSignalKind {
    /// [`AgentSignal::Connectivity`]
    Connectivity,
    /// [`AgentSignal::Message`] of the given kind.
    Message(AgentMessageKind),
}

impl AgentSignal {
    /// Agent the signal concerns.
    pub fn agent_id(&self) -> AgentId {
        match self {
            Self::Connectivity { agent_id, .. } | Self::Message { agent_id, .. } => *agent_id,
        }
    }
}

impl Routable for AgentSignal {
    type Kind = AgentSignalKind;

    fn route(&self) -> AgentSignalKind {
        match self {
            Self::Connectivity { .. } => AgentSignalKind::Connectivity,
            Self::Message { message, .. } => AgentSignalKind::Message(message.kind()),
        }
    }
}

impl AgentSignalKind {
    /// Every subscription key.
    pub fn all() -> impl Iterator<Item = Self> {
        std::iter::once(Self::Connectivity).chain(AgentMessageKind::ALL.into_iter().map(Self::Message))
    }
}
