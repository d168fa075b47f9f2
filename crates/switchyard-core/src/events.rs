//! Domain events published on the in-process bus.
//!
//! Domain services (SSH provisioning, certificate issuance, traffic
//! collection, alerting) and the agent relay publish [`Event`]s; the
//! event-to-wire bridge turns them into dashboard frames. Events carry no
//! transport details and are immutable once built.

use serde::Serialize;

use crate::ids::AgentId;
use crate::protocol::agent::{
    ConfigSyncResult, StatusReport, UpdateProgress, UpdateResult, VersionReport,
};

/// Status line for one managed server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    /// Server row ID.
    pub server_id: u64,
    /// Display name.
    pub server_name: String,
    /// `online`, `offline`, `installing`, …
    pub status: String,
}

/// Periodic agent report forwarded to dashboards.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientReport {
    /// From `status_report`.
    Status(StatusReport),
    /// From `version_report`.
    Version(VersionReport),
    /// From `config_sync_result`.
    ConfigSync(ConfigSyncResult),
}

/// Closed set of domain events.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A line of output from an SSH provisioning operation.
    SshLog {
        /// Target server.
        server_id: u64,
        /// Operation name (`install`, `uninstall`, …).
        operation: String,
        /// Log text.
        log: String,
        /// `info`, `error`, …
        log_type: String,
        /// Percentage, 0–100.
        progress: u8,
    },
    /// Snapshot of server statuses.
    ServerStatus {
        /// Every server whose status changed.
        servers: Vec<ServerStatus>,
    },
    /// Certificate issuance progress.
    CertProgress {
        /// Issuance task.
        task_id: String,
        /// Domain being issued.
        domain: String,
        /// Current step.
        step: String,
        /// Detail.
        message: String,
        /// Error text when the step failed.
        error: Option<String>,
    },
    /// Agent reported update progress.
    ClientUpdateProgress {
        /// Reporting agent.
        client_id: AgentId,
        /// Payload as reported.
        progress: UpdateProgress,
    },
    /// Agent reported update outcome.
    ClientUpdateResult {
        /// Reporting agent.
        client_id: AgentId,
        /// Payload as reported.
        result: UpdateResult,
    },
    /// Agent replied to an `frpc_control` command.
    FrpcControlResult {
        /// Reporting agent.
        client_id: AgentId,
        /// Action that was executed.
        action: String,
        /// Outcome.
        success: bool,
        /// Detail.
        message: String,
    },
    /// One chunk of a streamed agent log.
    LogLine {
        /// Source agent.
        client_id: AgentId,
        /// Which log.
        log_type: String,
        /// Raw text.
        content: String,
    },
    /// Traffic sample for one proxy.
    TrafficPoint {
        /// Agent serving the proxy.
        client_id: AgentId,
        /// Proxy name.
        proxy_name: String,
        /// Bytes received since the last sample.
        bytes_in: u64,
        /// Bytes sent since the last sample.
        bytes_out: u64,
    },
    /// Agent connected or disconnected.
    ClientStatusChanged {
        /// Agent.
        client_id: AgentId,
        /// New connectivity.
        online: bool,
    },
    /// Agent status, version or config-sync report.
    ClientReport {
        /// Reporting agent.
        client_id: AgentId,
        /// Report body.
        report: ClientReport,
    },
    /// An alert rule fired.
    Alert {
        /// Rule that fired.
        rule_id: u64,
        /// `info`, `warning`, `critical`.
        severity: String,
        /// Rendered alert text.
        message: String,
    },
}

/// Discriminant of [`Event`], used as the bus subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::SshLog`]
    SshLog,
    /// [`Event::ServerStatus`]
    ServerStatus,
    /// [`Event::CertProgress`]
    CertProgress,
    /// [`Event::ClientUpdateProgress`]
    ClientUpdateProgress,
    /// [`Event::ClientUpdateResult`]
    ClientUpdateResult,
    /// [`Event::FrpcControlResult`]
    FrpcControlResult,
    /// [`Event::LogLine`]
    LogLine,
    /// [`Event::TrafficPoint`]
    TrafficPoint,
    /// [`Event::ClientStatusChanged`]
    ClientStatusChanged,
    /// [`Event::ClientReport`]
    ClientReport,
    /// [`Event::Alert`]
    Alert,
}

impl EventKind {
    /// Every kind.
    pub const ALL: [Self; 11] = [
        Self::SshLog,
        Self::ServerStatus,
        Self::CertProgress,
        Self::ClientUpdateProgress,
        Self::ClientUpdateResult,
        Self::FrpcControlResult,
        Self::LogLine,
        Self::TrafficPoint,
        Self::ClientStatusChanged,
        Self::ClientReport,
        Self::Alert,
    ];

    /// Stable name for logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SshLog => "ssh_log",
            Self::ServerStatus => "server_status",
            Self::CertProgress => "cert_progress",
            Self::ClientUpdateProgress => "client_update_progress",
            Self::ClientUpdateResult => "client_update_result",
            Self::FrpcControlResult => "frpc_control_result",
            Self::LogLine => "log_line",
            Self::TrafficPoint => "traffic_point",
            Self::ClientStatusChanged => "client_status_changed",
            Self::ClientReport => "client_report",
            Self::Alert => "alert",
        }
    }
}

impl Event {
    /// Discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SshLog { .. } => EventKind::SshLog,
            Self::ServerStatus { .. } => EventKind::ServerStatus,
            Self::CertProgress { .. } => EventKind::CertProgress,
            Self::ClientUpdateProgress { .. } => EventKind::ClientUpdateProgress,
            Self::ClientUpdateResult { .. } => EventKind::ClientUpdateResult,
            Self::FrpcControlResult { .. } => EventKind::FrpcControlResult,
            Self::LogLine { .. } => EventKind::LogLine,
            Self::TrafficPoint { .. } => EventKind::TrafficPoint,
            Self::ClientStatusChanged { .. } => EventKind::ClientStatusChanged,
            Self::ClientReport { .. } => EventKind::ClientReport,
            Self::Alert { .. } => EventKind::Alert,
        }
    }

    /// Agent the event concerns, if any.
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            Self::ClientUpdateProgress { client_id, .. }
            | Self::ClientUpdateResult { client_id, .. }
            | Self::FrpcControlResult { client_id, .. }
            | Self::LogLine { client_id, .. }
            | Self::TrafficPoint { client_id, .. }
            | Self::ClientStatusChanged { client_id, .. }
            | Self::ClientReport { client_id, .. } => Some(*client_id),
            Self::SshLog { .. }
            | Self::ServerStatus { .. }
            | Self::CertProgress { .. }
            | Self::Alert { .. } => None,
        }
    }
}
