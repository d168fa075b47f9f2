//! Error taxonomy for the control-plane fabric.
//!
//! Every operation that touches a connection returns [`FabricError`]. The
//! fabric never retries on its own: [`FabricError::is_retryable`] exists so
//! calling domain services can decide.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::AgentId;

/// Errors produced by registries, pumps and the agent channel.
#[derive(Debug, Error)]
pub enum FabricError {
    /// No live connection for the target agent.
    #[error("agent {agent_id} is not connected")]
    NotConnected {
        /// Target agent.
        agent_id: AgentId,
    },

    /// The outbound buffer of the connection is saturated.
    #[error("outbound queue full for {target}")]
    QueueFull {
        /// Human-readable target (agent ID or connection ID).
        target: String,
    },

    /// No reply arrived within the caller's deadline.
    #[error("no reply from agent {agent_id} within {timeout:?}")]
    Timeout {
        /// Target agent.
        agent_id: AgentId,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Payload encode/decode failure.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure or a queue already closed by its registry.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// What closed it.
        reason: String,
    },

    /// The owning registry has been cancelled.
    #[error("control plane is shutting down")]
    ShuttingDown,
}

/// Stable machine-readable codes for [`FabricError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// See [`FabricError::NotConnected`].
    NotConnected,
    /// See [`FabricError::QueueFull`].
    QueueFull,
    /// See [`FabricError::Timeout`].
    Timeout,
    /// See [`FabricError::Serialization`].
    Serialization,
    /// See [`FabricError::ConnectionClosed`].
    ConnectionClosed,
    /// See [`FabricError::ShuttingDown`].
    ShuttingDown,
}

impl ErrorCode {
    /// Wire string for the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::QueueFull => "QUEUE_FULL",
            Self::Timeout => "TIMEOUT",
            Self::Serialization => "SERIALIZATION",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

impl FabricError {
    /// Shorthand for [`FabricError::ConnectionClosed`].
    #[must_use]
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotConnected { .. } => ErrorCode::NotConnected,
            Self::QueueFull { .. } => ErrorCode::QueueFull,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::ConnectionClosed { .. } => ErrorCode::ConnectionClosed,
            Self::ShuttingDown => ErrorCode::ShuttingDown,
        }
    }

    /// Whether a caller may reasonably retry the same operation later.
    ///
    /// Backpressure and missed deadlines are transient; everything else needs
    /// the agent to reconnect or the process to restart first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::Timeout { .. })
    }
}

/// Result alias for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;
