//! Transport adapter.
//!
//! Owns the WebSocket connection on a dedicated OS thread and translates
//! every frame into a [`DispatchTask`] for the dispatcher. It never runs
//! plugin code and never touches the display.
//!
//! # Architecture
//!
//! ```text
//! transport thread (current-thread tokio runtime)
//!   loop {
//!     ws::connect ──► Connected
//!     select! {
//!       reader.recv()  ──► Data / Ping / Pong / Continuation
//!       (fragmented messages arrive reassembled as one final Data)
//!       outgoing.recv() ──► writer.send()
//!     }
//!     ──► Disconnected
//!     "Lost connection, reconnecting in N seconds"   (waits for display)
//!     sleep(reconnect delay)
//!   }
//! ```
//!
//! [`Transport::send`] is called from the dispatcher's context while the
//! thread is blocked reading. It only pushes onto an unbounded channel that
//! the thread drains, so it never waits on the read loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;

use crate::constants::CLOSE_CODE_ABNORMAL;
use crate::events::{DispatchTask, Marshal};
use crate::message::{FrameKind, Message};
use crate::ws::{self, ConnectOptions, WsMessage, WsReader, WsWriter};

/// Frame queued for the connection thread.
type Outgoing = (FrameKind, Vec<u8>);

/// Connection owned by the dispatcher.
///
/// `start` launches the connection loop without blocking; `send` writes
/// one frame. Only the dispatcher's send path calls `send`.
pub trait Transport {
    /// Launch the connection loop. Events are posted through `marshal`.
    fn start(&mut self, marshal: Marshal) -> Result<()>;

    /// Write one frame to the current connection.
    fn send(&self, frame: FrameKind, payload: Vec<u8>) -> Result<()>;
}

/// Sender for the live connection, `None` while disconnected.
type OutgoingSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>>;

/// [`Transport`] backed by tokio-tungstenite with fixed-delay reconnects.
#[derive(Debug)]
pub struct WebSocketTransport {
    options: ConnectOptions,
    reconnect_delay: Duration,
    outgoing: OutgoingSlot,
    thread: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create an idle transport; nothing connects until [`Transport::start`].
    #[must_use]
    pub fn new(options: ConnectOptions, reconnect_delay: Duration) -> Self {
        Self {
            options,
            reconnect_delay,
            outgoing: Arc::new(Mutex::new(None)),
            thread: None,
        }
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.outgoing).is_some()
    }
}

impl Transport for WebSocketTransport {
    fn start(&mut self, marshal: Marshal) -> Result<()> {
        if self.thread.is_some() {
            bail!("Transport already started");
        }
        let options = self.options.clone();
        let delay = self.reconnect_delay;
        let slot = Arc::clone(&self.outgoing);
        let handle = std::thread::Builder::new()
            .name("ws-transport".to_string())
            .spawn(move || run_transport_thread(&options, delay, &slot, &marshal))
            .context("Failed to spawn WebSocket thread")?;
        self.thread = Some(handle);
        Ok(())
    }

    fn send(&self, frame: FrameKind, payload: Vec<u8>) -> Result<()> {
        let guard = lock(&self.outgoing);
        let tx = guard.as_ref().ok_or_else(|| anyhow!("Not connected"))?;
        tx.send((frame, payload))
            .map_err(|_| anyhow!("Connection closed before the frame could be queued"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Background thread
// =============================================================================

/// Run the reconnecting connection loop on a dedicated tokio runtime.
///
/// Exits only when the dispatcher drops its queue.
fn run_transport_thread(
    options: &ConnectOptions,
    delay: Duration,
    slot: &OutgoingSlot,
    marshal: &Marshal,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            marshal.post(DispatchTask::Error(format!(
                "Failed to create tokio runtime: {e}"
            )));
            return;
        }
    };

    rt.block_on(async {
        loop {
            if marshal.is_closed() {
                break;
            }
            log::debug!("[transport] Connecting to {}", options.url);

            match ws::connect(options).await {
                Ok((writer, reader)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    *lock(slot) = Some(tx);
                    log::debug!("[transport] Connected to {}", options.url);
                    marshal.post(DispatchTask::Connected);

                    let (code, reason) = pump(writer, reader, rx, marshal).await;

                    *lock(slot) = None;
                    log::debug!("[transport] Closed: {code} {reason}");
                    marshal.post(DispatchTask::Disconnected { code, reason });
                }
                Err(e) => {
                    log::debug!("[transport] Connect failed: {e:#}");
                    marshal.post(DispatchTask::Error(format!("{e:#}")));
                }
            }

            if marshal.is_closed() {
                break;
            }
            marshal
                .log_and_wait(Message::info(format!(
                    "Lost connection, reconnecting in {} seconds",
                    delay.as_secs()
                )))
                .await;
            tokio::time::sleep(delay).await;
        }
    });
    log::debug!("[transport] Connection thread exiting");
}

/// Move frames both ways until the connection ends.
///
/// Returns the close code and reason to report.
async fn pump(
    mut writer: WsWriter,
    mut reader: WsReader,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    marshal: &Marshal,
) -> (u16, String) {
    loop {
        tokio::select! {
            frame = reader.recv() => {
                let task = match frame {
                    Some(Ok(WsMessage::Text(text))) => DispatchTask::Data {
                        payload: text.into_bytes(),
                        frame: FrameKind::Text,
                        fin: true,
                    },
                    Some(Ok(WsMessage::Binary(data))) => DispatchTask::Data {
                        payload: data,
                        frame: FrameKind::Binary,
                        fin: true,
                    },
                    Some(Ok(WsMessage::Ping(data))) => DispatchTask::Ping(data),
                    Some(Ok(WsMessage::Pong(data))) => DispatchTask::Pong(data),
                    Some(Ok(WsMessage::Continuation { payload, fin })) => {
                        DispatchTask::Continuation { payload, fin }
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        // Flushes the close reply tungstenite queued.
                        let _ = writer.close().await;
                        return (code, reason);
                    }
                    Some(Err(e)) => {
                        marshal.post(DispatchTask::Error(format!("{e:#}")));
                        return (CLOSE_CODE_ABNORMAL, e.to_string());
                    }
                    None => return (CLOSE_CODE_ABNORMAL, String::new()),
                };
                if !marshal.post(task) {
                    let _ = writer.close().await;
                    return (CLOSE_CODE_ABNORMAL, "dispatcher gone".to_string());
                }
            }
            queued = outgoing.recv() => {
                // The slot owns the sender, so the channel only closes after pump returns.
                let Some((frame, payload)) = queued else {
                    return (CLOSE_CODE_ABNORMAL, String::new());
                };
                if let Err(e) = writer.send(frame, payload).await {
                    marshal.post(DispatchTask::Error(format!("{e:#}")));
                    return (CLOSE_CODE_ABNORMAL, e.to_string());
                }
            }
        }
    }
}
