//! `Fabric`: the composition root.
//!
//! Owns the two buses, both hubs, the agent channel and the shutdown token,
//! and wires the relay (agent signals → domain events) and the bridge
//! (domain events → frames). Nothing here is global; callers hold an
//! `Arc<Fabric>`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchyard_core::Event;
use switchyard_settings::SwitchyardSettings;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::{AgentChannel, AgentSignal, LogStreams};
use crate::bridge::EventBridge;
use crate::bus::EventBus;
use crate::health::{self, HealthCounts, HealthResponse};
use crate::relay::AgentRelay;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::Hub;
use crate::websocket::pump::PumpConfig;

/// Every long-lived component of the control plane.
pub struct Fabric {
    settings: SwitchyardSettings,
    pump: PumpConfig,
    shutdown: ShutdownCoordinator,
    events: Arc<EventBus<Event>>,
    agents: Arc<AgentChannel>,
    dashboards: Hub,
    log_viewers: Hub,
    log_streams: Arc<LogStreams>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: Instant,
}

impl Fabric {
    /// Build and start every component. Must be called inside a Tokio
    /// runtime.
    pub fn start(settings: SwitchyardSettings) -> Arc<Self> {
        let shutdown = ShutdownCoordinator::new();
        let command_buffer = settings.transport.command_buffer;

        let events = Arc::new(EventBus::new("events"));
        let signals = Arc::new(EventBus::<AgentSignal>::new("agent"));
        let (agents, agent_loop) = AgentChannel::spawn(command_buffer, Arc::clone(&signals), shutdown.token());
        let (dashboards, dashboard_loop) = Hub::spawn("dashboard", command_buffer, shutdown.token());
        let (log_viewers, log_loop) = Hub::spawn("log", command_buffer, shutdown.token());

        let _relay = AgentRelay::install(&signals, Arc::clone(&events));
        let _bridge = EventBridge::install(&events, dashboards.clone(), log_viewers.clone());
        let log_streams = Arc::new(LogStreams::new(Arc::clone(&agents)));

        info!(
            command_buffer,
            outbound_buffer = settings.transport.outbound_buffer,
            "fabric started"
        );
        Arc::new(Self {
            pump: PumpConfig::from(&settings.transport),
            settings,
            shutdown,
            events,
            agents,
            dashboards,
            log_viewers,
            log_streams,
            tasks: Mutex::new(vec![agent_loop, dashboard_loop, log_loop]),
            started: Instant::now(),
        })
    }

    /// Settings the fabric was started with.
    pub fn settings(&self) -> &SwitchyardSettings {
        &self.settings
    }

    /// Pump timings for new sessions.
    pub fn pump_config(&self) -> &PumpConfig {
        &self.pump
    }

    /// Default deadline for command-and-wait.
    pub fn command_timeout(&self) -> Duration {
        self.settings.agent.command_timeout()
    }

    /// Domain event bus. Domain services publish here.
    pub fn events(&self) -> &Arc<EventBus<Event>> {
        &self.events
    }

    /// Publish a domain event without waiting for delivery.
    pub fn publish(&self, event: Event) {
        self.events.publish(event);
    }

    /// Agent control channel.
    pub fn agents(&self) -> &Arc<AgentChannel> {
        &self.agents
    }

    /// Dashboard registry.
    pub fn dashboards(&self) -> &Hub {
        &self.dashboards
    }

    /// Log viewer registry.
    pub fn log_viewers(&self) -> &Hub {
        &self.log_viewers
    }

    /// Log viewer reference counts.
    pub fn log_streams(&self) -> &Arc<LogStreams> {
        &self.log_streams
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthResponse {
        let counts = HealthCounts {
            agents: self.agents.registry().len(),
            dashboards: self.dashboards.len(),
            log_viewers: self.log_viewers.len(),
            pending_commands: self.agents.pending_count(),
        };
        health::health_check(self.started, counts, self.is_shutting_down())
    }

    /// Stop everything: resolve in-flight waits, close every connection,
    /// and wait up to `timeout` for the registry loops. Returns whether the
    /// loops finished in time. Later calls return `true` at once.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        self.agents.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        self.shutdown.graceful_shutdown(tasks, timeout).await
    }
}
