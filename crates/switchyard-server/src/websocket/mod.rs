//! WebSocket connections, registries, pumps and session lifecycle.

pub mod connection;
pub mod hub;
pub mod pump;
pub mod session;

pub use connection::{Connection, EnqueueError, Identity, Outbound};
pub use hub::{Hub, Target};
pub use pump::{FrameHandler, IgnoreInbound, PumpConfig, PumpExit};
