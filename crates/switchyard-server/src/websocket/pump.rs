//! Read and write pumps shared by every registry.
//!
//! Each connection runs one write pump (outbound queue and keepalive pings
//! onto the socket) and one read pump (socket frames into a
//! [`FrameHandler`]). Whichever ends first ends the other; the session then
//! unregisters the connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use switchyard_core::{FabricError, Result};
use switchyard_settings::TransportSettings;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tracing::{debug, warn};

use super::connection::{Connection, Outbound};
use crate::metrics::PUMP_EXITS_TOTAL;

/// Timing and buffering for one connection's pumps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PumpConfig {
    /// Interval between keepalive pings.
    pub ping_period: Duration,
    /// Read deadline, reset by every received frame.
    pub pong_wait: Duration,
    /// Deadline for a single socket write.
    pub write_wait: Duration,
    /// Outbound queue capacity.
    pub outbound_buffer: usize,
}

impl From<&TransportSettings> for PumpConfig {
    fn from(t: &TransportSettings) -> Self {
        Self {
            ping_period: t.ping_period(),
            pong_wait: t.pong_wait(),
            write_wait: t.write_wait(),
            outbound_buffer: t.outbound_buffer,
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::from(&TransportSettings::default())
    }
}

/// Why a pump stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PumpExit {
    /// A socket write returned an error.
    WriteFailed(String),
    /// A socket write did not finish within `write_wait`.
    WriteTimeout,
    /// The registry closed the outbound queue.
    QueueClosed,
    /// Nothing was received within `pong_wait`.
    ReadTimeout,
    /// The peer sent a Close frame or the stream ended.
    PeerClosed,
    /// The transport reported an error while reading.
    ConnectionClosed(String),
    /// An inbound frame could not be decoded.
    Decode(String),
}

impl PumpExit {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteFailed(_) => "write_failed",
            Self::WriteTimeout => "write_timeout",
            Self::QueueClosed => "queue_closed",
            Self::ReadTimeout => "read_timeout",
            Self::PeerClosed => "peer_closed",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::Decode(_) => "decode",
        }
    }
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::ConnectionClosed(e) => write!(f, "connection closed: {e}"),
            Self::Decode(e) => write!(f, "undecodable frame: {e}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Receives inbound text frames from a read pump.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle one text frame. A `Serialization` error ends the read pump;
    /// any other error is logged and reading continues.
    async fn on_text(&self, text: &str) -> Result<()>;
}

/// Handler for peers that are not expected to send anything meaningful.
pub struct IgnoreInbound;

#[async_trait]
impl FrameHandler for IgnoreInbound {
    async fn on_text(&self, text: &str) -> Result<()> {
        debug!(len = text.len(), "ignoring inbound frame");
        Ok(())
    }
}

async fn write_bounded<S>(sink: &mut S, msg: Message, wait: Duration) -> std::result::Result<(), PumpExit>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match timeout(wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PumpExit::WriteFailed(e.to_string())),
        Err(_) => Err(PumpExit::WriteTimeout),
    }
}

/// Drain the outbound queue onto `sink`, pinging every `ping_period`.
///
/// Every write is bounded by `write_wait`. When the registry closes the
/// queue a Close frame is attempted before returning.
pub async fn write_pump<S>(mut sink: S, mut queue: mpsc::Receiver<Outbound>, config: PumpConfig) -> PumpExit
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let step = tokio::select! {
            frame = queue.recv() => match frame {
                Some(text) => write_bounded(&mut sink, Message::Text(text.as_ref().into()), config.write_wait).await,
                None => {
                    let _ = write_bounded(&mut sink, Message::Close(None), config.write_wait).await;
                    return PumpExit::QueueClosed;
                }
            },
            _ = ticker.tick() => write_bounded(&mut sink, Message::Ping(Vec::new().into()), config.write_wait).await,
        };
        if let Err(exit) = step {
            return exit;
        }
    }
}

/// Read frames from `stream` until it ends, errors, or goes quiet for
/// `pong_wait`. Every frame marks `conn` alive; text goes to `handler`.
pub async fn read_pump<S, E, H>(mut stream: S, conn: &Connection, pong_wait: Duration, handler: &H) -> PumpExit
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: fmt::Display,
    H: FrameHandler + ?Sized,
{
    loop {
        let msg = match timeout(pong_wait, stream.next()).await {
            Err(_) => return PumpExit::ReadTimeout,
            Ok(None) => return PumpExit::PeerClosed,
            Ok(Some(Err(e))) => return PumpExit::ConnectionClosed(e.to_string()),
            Ok(Some(Ok(msg))) => msg,
        };
        conn.mark_alive();

        let outcome = match msg {
            Message::Text(text) => handler.on_text(text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handler.on_text(text).await,
                Err(_) => {
                    debug!(conn_id = %conn.id(), len = data.len(), "non-UTF8 binary frame ignored");
                    Ok(())
                }
            },
            Message::Close(_) => return PumpExit::PeerClosed,
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };

        match outcome {
            Ok(()) => {}
            Err(FabricError::Serialization(e)) => return PumpExit::Decode(e.to_string()),
            Err(e) => warn!(conn_id = %conn.id(), error = %e, "inbound handler failed"),
        }
    }
}

/// Run both pumps for `socket` until either ends.
///
/// When the read side ends first the outbound queue is closed, so the
/// writer flushes what is queued and sends a Close frame. It gets
/// `write_wait` to do so before it is aborted.
pub async fn drive<T, E, H>(
    socket: T,
    conn: &Arc<Connection>,
    queue: mpsc::Receiver<Outbound>,
    handler: &H,
    config: &PumpConfig,
) -> PumpExit
where
    T: Sink<Message, Error = E> + Stream<Item = std::result::Result<Message, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
    H: FrameHandler + ?Sized,
{
    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, queue, config.clone()));

    let exit = tokio::select! {
        exit = read_pump(stream, conn, config.pong_wait, handler) => {
            let _ = conn.close();
            if timeout(config.write_wait, &mut writer).await.is_err() {
                debug!(conn_id = %conn.id(), "writer did not close in time, aborting");
                writer.abort();
            }
            exit
        }
        joined = &mut writer => {
            joined.unwrap_or_else(|e| PumpExit::ConnectionClosed(e.to_string()))
        }
    };
    counter!(PUMP_EXITS_TOTAL, "reason" => exit.as_str()).increment(1);
    exit
}
