//! Agent wire protocol.
//!
//! Outbound, every command travels inside an [`Envelope`]:
//!
//! ```text
//! {"type": "frpc_control", "client_id": 7, "request_id": "…", "data": {"action": "stop"}, "timestamp": 1760000000000}
//! ```
//!
//! Inbound frames use the same outer shape and are decoded once, at ingress,
//! into the closed [`AgentMessage`] union so that dispatch is an exhaustive
//! `match` rather than string lookups.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, RequestId};

// ─────────────────────────────────────────────────────────────────────────────
// Shared enums
// ─────────────────────────────────────────────────────────────────────────────

/// What an `update` instruction replaces on the agent host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    /// The managed frp client binary.
    Frpc,
    /// The agent daemon itself.
    Agent,
    /// Value this build does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Start or stop a log stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStreamAction {
    /// Begin tailing and forwarding `log_data` frames.
    Start,
    /// Stop forwarding.
    Stop,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound commands
// ─────────────────────────────────────────────────────────────────────────────

/// Commands the control plane sends to an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Replace the frpc configuration.
    ConfigUpdate {
        /// Opaque configuration blob.
        config: Value,
        /// Monotonic configuration version.
        version: i64,
    },
    /// Download and install a new binary.
    Update {
        /// Which binary to replace.
        update_type: UpdateType,
        /// Target version.
        version: String,
        /// Where to download it from.
        download_url: String,
        /// Download mirror selector.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        mirror_id: Option<i64>,
    },
    /// Install a TLS certificate bundle.
    CertSync {
        /// Domain the bundle is for.
        domain: String,
        /// PEM-encoded certificate chain.
        cert_pem: String,
        /// PEM-encoded private key.
        key_pem: String,
    },
    /// Remove a TLS certificate bundle.
    CertDelete {
        /// Domain to remove.
        domain: String,
    },
    /// Start or stop forwarding a log file.
    LogStream {
        /// Which log (`frpc`, `agent`, …).
        log_type: String,
        /// Start or stop.
        action: LogStreamAction,
        /// Lines of history to send first.
        lines: u32,
    },
    /// Control the managed frpc process (`start`, `stop`, `restart`, …).
    FrpcControl {
        /// Requested action.
        action: String,
    },
    /// Ask the agent to exit.
    Shutdown,
}

impl AgentCommand {
    /// Wire `type` string.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ConfigUpdate { .. } => "config_update",
            Self::Update { .. } => "update",
            Self::CertSync { .. } => "cert_sync",
            Self::CertDelete { .. } => "cert_delete",
            Self::LogStream { .. } => "log_stream",
            Self::FrpcControl { .. } => "frpc_control",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outer JSON object carried by every agent-directed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type (`config_update`, `frpc_control`, …).
    #[serde(rename = "type")]
    pub message_type: String,
    /// Target agent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<AgentId>,
    /// Correlation key for command-and-wait; echoed back in the reply.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<RequestId>,
    /// Command payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap a command for `agent_id`.
    pub fn new(
        command: &AgentCommand,
        agent_id: AgentId,
        request_id: Option<RequestId>,
        timestamp: i64,
    ) -> Result<Self, serde_json::Error> {
        let mut tagged = serde_json::to_value(command)?;
        let data = tagged.get_mut("data").map(Value::take);
        Ok(Self {
            message_type: command.message_type().to_owned(),
            client_id: Some(agent_id),
            request_id,
            data,
            timestamp,
        })
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Recover the typed command (agent-side decoding).
    pub fn command(&self) -> Result<AgentCommand, serde_json::Error> {
        let mut tagged = serde_json::json!({ "type": self.message_type });
        if let Some(data) = &self.data {
            tagged["data"] = data.clone();
        }
        serde_json::from_value(tagged)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound messages
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic health report from an agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    /// Whether the managed frpc process is running.
    pub frpc_running: bool,
    /// Number of proxies frpc currently serves.
    pub proxy_count: u32,
    /// Agent uptime.
    pub uptime_secs: u64,
    /// Host CPU usage, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    /// Agent resident memory, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
}

/// Progress of an `update` instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateProgress {
    /// Binary being replaced.
    pub update_type: UpdateType,
    /// Current stage (`downloading`, `verifying`, `installing`, …).
    pub stage: String,
    /// Percentage, 0–100.
    pub progress: u8,
    /// Free-form detail.
    pub message: String,
}

/// Final outcome of an `update` instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateResult {
    /// Binary that was replaced.
    pub update_type: UpdateType,
    /// Whether the update succeeded.
    pub success: bool,
    /// Version now installed.
    pub version: String,
    /// Free-form detail.
    pub message: String,
}

/// Versions running on the agent host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionReport {
    /// Agent daemon version.
    pub agent_version: String,
    /// Managed frpc version.
    pub frpc_version: String,
    /// Host OS.
    pub os: String,
    /// Host architecture.
    pub arch: String,
}

/// One chunk of a streamed log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogData {
    /// Which log the chunk belongs to.
    pub log_type: String,
    /// Raw text.
    pub content: String,
}

/// Reply to an `frpc_control` command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandReply {
    /// Action the reply is for.
    pub action: String,
    /// Whether the action succeeded.
    pub success: bool,
    /// Free-form detail.
    pub message: String,
}

/// Outcome of applying a `config_update`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSyncResult {
    /// Version the agent applied (or failed to apply).
    pub version: i64,
    /// Whether the configuration is live.
    pub success: bool,
    /// Free-form detail.
    pub message: String,
}

/// Closed set of messages an agent may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentMessage {
    /// `status_report`
    StatusReport(StatusReport),
    /// `update_progress`
    UpdateProgress(UpdateProgress),
    /// `update_result`
    UpdateResult(UpdateResult),
    /// `version_report`
    VersionReport(VersionReport),
    /// `log_data`
    LogData(LogData),
    /// `frpc_control_result`
    FrpcControlResult(CommandReply),
    /// `config_sync_result`
    ConfigSyncResult(ConfigSyncResult),
}

/// Discriminant of [`AgentMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentMessageKind {
    /// `status_report`
    StatusReport,
    /// `update_progress`
    UpdateProgress,
    /// `update_result`
    UpdateResult,
    /// `version_report`
    VersionReport,
    /// `log_data`
    LogData,
    /// `frpc_control_result`
    FrpcControlResult,
    /// `config_sync_result`
    ConfigSyncResult,
}

impl AgentMessageKind {
    /// All kinds, in wire-table order.
    pub const ALL: [Self; 7] = [
        Self::StatusReport,
        Self::UpdateProgress,
        Self::UpdateResult,
        Self::VersionReport,
        Self::LogData,
        Self::FrpcControlResult,
        Self::ConfigSyncResult,
    ];

    /// Wire `type` string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusReport => "status_report",
            Self::UpdateProgress => "update_progress",
            Self::UpdateResult => "update_result",
            Self::VersionReport => "version_report",
            Self::LogData => "log_data",
            Self::FrpcControlResult => "frpc_control_result",
            Self::ConfigSyncResult => "config_sync_result",
        }
    }

    /// Look up a kind by its wire `type` string.
    pub fn from_wire(message_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == message_type)
    }
}

impl AgentMessage {
    /// Discriminant.
    pub fn kind(&self) -> AgentMessageKind {
        match self {
            Self::StatusReport(_) => AgentMessageKind::StatusReport,
            Self::UpdateProgress(_) => AgentMessageKind::UpdateProgress,
            Self::UpdateResult(_) => AgentMessageKind::UpdateResult,
            Self::VersionReport(_) => AgentMessageKind::VersionReport,
            Self::LogData(_) => AgentMessageKind::LogData,
            Self::FrpcControlResult(_) => AgentMessageKind::FrpcControlResult,
            Self::ConfigSyncResult(_) => AgentMessageKind::ConfigSyncResult,
        }
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// Typed payload.
    pub message: AgentMessage,
    /// Correlation key echoed from the command, if any.
    pub request_id: Option<RequestId>,
}

/// Outcome of decoding one text frame from an agent.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// A recognised message.
    Message(InboundFrame),
    /// Well-formed frame with a `type` this build does not handle.
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    request_id: Option<RequestId>,
    #[serde(default)]
    data: Option<Value>,
}

/// Decode one text frame from an agent.
///
/// Malformed JSON, or a known `type` whose `data` does not match its payload
/// shape, is an error. An unrecognised `type` is reported as
/// [`Decoded::Unknown`] so newer agents do not get disconnected.
pub fn decode_inbound(text: &str) -> Result<Decoded, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;
    if AgentMessageKind::from_wire(&raw.message_type).is_none() {
        return Ok(Decoded::Unknown(raw.message_type));
    }
    let data = match raw.data {
        Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
        Some(v) => v,
    };
    let message: AgentMessage =
        serde_json::from_value(serde_json::json!({ "type": raw.message_type, "data": data }))?;
    Ok(Decoded::Message(InboundFrame {
        message,
        request_id: raw.request_id,
    }))
}
