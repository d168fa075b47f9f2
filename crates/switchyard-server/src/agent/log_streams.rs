//! Reference counting of log viewers per `(agent, log_type)`.
//!
//! Each attaching viewer pushes `log_stream start` so the agent replays its
//! history lines; only the last viewer detaching pushes `stop`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_core::protocol::agent::LogStreamAction;
use switchyard_core::{AgentId, Result};
use tracing::{debug, warn};

use super::channel::AgentChannel;

type StreamKey = (AgentId, String);

/// Viewer counts for every streamed log.
pub struct LogStreams {
    channel: Arc<AgentChannel>,
    viewers: Mutex<HashMap<StreamKey, usize>>,
}

/// Keeps one viewer attached; dropping it detaches.
#[must_use = "dropping the guard detaches the viewer"]
pub struct LogViewerGuard {
    streams: Arc<LogStreams>,
    key: StreamKey,
}

impl Drop for LogViewerGuard {
    fn drop(&mut self) {
        self.streams.detach(&self.key);
    }
}

impl LogStreams {
    /// No viewers yet.
    pub fn new(channel: Arc<AgentChannel>) -> Self {
        Self {
            channel,
            viewers: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a viewer and ask the agent to stream `log_type` with `lines`
    /// lines of history.
    ///
    /// The viewer stays attached even if the push fails (the agent may be
    /// offline); the error is returned so the caller can tell the viewer.
    pub fn attach(
        self: &Arc<Self>,
        agent_id: AgentId,
        log_type: &str,
        lines: u32,
    ) -> (LogViewerGuard, Result<()>) {
        let key = (agent_id, log_type.to_owned());
        let count = {
            let mut viewers = self.viewers.lock();
            let count = viewers.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        debug!(%agent_id, log_type, viewers = count, "log viewer attached");
        let pushed = self
            .channel
            .push_log_stream(agent_id, log_type, LogStreamAction::Start, lines);
        let guard = LogViewerGuard {
            streams: Arc::clone(self),
            key,
        };
        (guard, pushed)
    }

    fn detach(&self, key: &StreamKey) {
        let last = {
            let mut viewers = self.viewers.lock();
            match viewers.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    let _ = viewers.remove(key);
                    true
                }
                None => false,
            }
        };
        let (agent_id, log_type) = key;
        if !last {
            debug!(%agent_id, log_type, "log viewer detached");
            return;
        }
        if let Err(e) = self
            .channel
            .push_log_stream(*agent_id, log_type.as_str(), LogStreamAction::Stop, 0)
        {
            warn!(%agent_id, log_type, error = %e, "could not stop log stream");
        }
    }

    /// Viewers attached to `(agent_id, log_type)`.
    pub fn viewers(&self, agent_id: AgentId, log_type: &str) -> usize {
        self.viewers
            .lock()
            .get(&(agent_id, log_type.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Streams with at least one viewer.
    pub fn active_streams(&self) -> usize {
        self.viewers.lock().len()
    }
}
