//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once cancellation started.
    pub status: &'static str,
    /// Seconds since the fabric started.
    pub uptime_secs: u64,
    /// Connected agents.
    pub agents: usize,
    /// Registered dashboards.
    pub dashboards: usize,
    /// Registered log viewers.
    pub log_viewers: usize,
    /// Open command-and-wait requests.
    pub pending_commands: usize,
}

/// Live counters sampled for a health response.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounts {
    /// Connected agents.
    pub agents: usize,
    /// Registered dashboards.
    pub dashboards: usize,
    /// Registered log viewers.
    pub log_viewers: usize,
    /// Open command-and-wait requests.
    pub pending_commands: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, counts: HealthCounts, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        agents: counts.agents,
        dashboards: counts.dashboards,
        log_viewers: counts.log_viewers,
        pending_commands: counts.pending_commands,
    }
}
