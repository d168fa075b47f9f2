//! # switchyard-core
//!
//! Foundation types shared by every Switchyard crate.
//!
//! - **Branded IDs**: [`AgentId`] (numeric, assigned by the panel), and
//!   string newtypes [`ConnectionId`] / [`RequestId`] (UUID v7)
//! - **Errors**: [`FabricError`] taxonomy with stable machine codes
//! - **Events**: [`Event`] closed set of domain events published on the bus
//! - **Protocol**: agent-directed [`protocol::agent::Envelope`]s, the inbound
//!   [`protocol::agent::AgentMessage`] union, and dashboard frames

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod protocol;

pub use errors::{FabricError, Result};
pub use events::{Event, EventKind};
pub use ids::{AgentId, ConnectionId, RequestId};

/// Current time as Unix milliseconds, the timestamp unit used on the wire.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
