//! Agent side of the fabric.
//!
//! - [`registry`]: single-owner map of agent connections
//! - [`pending`]: command-and-wait correlation table
//! - [`channel`]: pushes, command-and-wait and inbound dispatch
//! - [`signal`]: what the channel publishes
//! - [`log_streams`]: log viewer reference counting

pub mod channel;
pub mod log_streams;
pub mod pending;
pub mod registry;
pub mod signal;

pub use channel::{AgentChannel, AgentFrames};
pub use log_streams::{LogStreams, LogViewerGuard};
pub use pending::{PendingGuard, PendingTable};
pub use registry::AgentRegistry;
pub use signal::{AgentSignal, AgentSignalKind};
