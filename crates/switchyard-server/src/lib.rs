//! # switchyard-server
//!
//! Real-time control-plane fabric between the management server, its
//! remote agents and browser dashboards.
//!
//! - [`websocket`]: connections, single-owner registries ([`Hub`]), socket
//!   pumps with keepalive, and session lifecycle
//! - [`agent`]: agent registry, pushes, command-and-wait correlation and
//!   inbound dispatch
//! - [`bus`]: typed publish/subscribe with panic isolation
//! - [`relay`] / [`bridge`]: agent signals → domain events → dashboard frames
//! - [`fabric`]: composition root; [`server`]: Axum routes and listener
//! - [`shutdown`], [`health`], [`metrics`]

#![deny(unsafe_code)]

pub mod agent;
pub mod bridge;
pub mod bus;
pub mod fabric;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use agent::{AgentChannel, AgentSignal, AgentSignalKind};
pub use bus::{EventBus, EventHandler, Routable, handler_fn};
pub use fabric::Fabric;
pub use server::{ServerHandle, listen, router};
pub use shutdown::ShutdownCoordinator;
pub use websocket::{Connection, Hub, Identity, Target};
