//! Wire formats.
//!
//! | Module | Direction |
//! |--------|-----------|
//! | [`agent`] | server ⇄ agent: command envelopes out, typed messages in |
//! | [`dashboard`] | server → dashboard: broadcast frames |

pub mod agent;
pub mod dashboard;
