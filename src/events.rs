//! Task queue feeding the dispatcher.
//!
//! Every background producer (the transport thread, the heartbeat threads,
//! the interactive surface, the history logger) talks to the dispatcher by
//! posting a [`DispatchTask`] through a cloned [`Marshal`]. The dispatcher
//! owns the single receiver and drains it strictly in order, which is what
//! makes the receive and send paths deterministic.
//!
//! # Waiting for completion
//!
//! Most posts are fire-and-forget. A producer that must not continue until
//! its task has been handled (the transport announcing a reconnect) attaches
//! a one-shot completion signal with [`Marshal::log_and_wait`].

use tokio::sync::{mpsc, oneshot};

use crate::message::{FrameKind, Message};

/// Work item for the dispatcher.
#[derive(Debug)]
pub enum DispatchTask {
    /// The transport finished a handshake.
    Connected,

    /// An established connection was lost.
    Disconnected {
        /// Close status code (1005 when the peer sent none, 1006 when the
        /// connection dropped without a close frame).
        code: u16,
        /// Close reason, empty when none was given.
        reason: String,
    },

    /// The transport hit an error (connect failure, I/O error).
    Error(String),

    /// Text or binary data frame.
    Data {
        /// Raw frame payload.
        payload: Vec<u8>,
        /// Either [`FrameKind::Text`] or [`FrameKind::Binary`].
        frame: FrameKind,
        /// Final fragment flag.
        fin: bool,
    },

    /// Native ping frame.
    Ping(Vec<u8>),

    /// Native pong frame.
    Pong(Vec<u8>),

    /// Continuation frame of a fragmented message.
    Continuation {
        /// Raw frame payload.
        payload: Vec<u8>,
        /// Final fragment flag.
        fin: bool,
    },

    /// Send a message through the canonical send path.
    Send(Message),

    /// Append a log row to the history.
    Log {
        /// Log-direction message to display.
        message: Message,
        /// Signalled once the row has been handed to the display.
        done: Option<oneshot::Sender<()>>,
    },

    /// Stop draining the queue.
    Shutdown,
}

/// Producer handle for the dispatcher queue.
///
/// Cheap to clone; every producer gets its own copy.
#[derive(Debug, Clone)]
pub struct Marshal {
    tx: mpsc::UnboundedSender<DispatchTask>,
}

impl Marshal {
    /// Create a marshal and the receiver the dispatcher will drain.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Schedule a task without waiting for it.
    ///
    /// Returns `false` when the dispatcher has gone away.
    pub fn post(&self, task: DispatchTask) -> bool {
        self.tx.send(task).is_ok()
    }

    /// Schedule a message for the canonical send path.
    pub fn send(&self, message: Message) -> bool {
        self.post(DispatchTask::Send(message))
    }

    /// Schedule a plain text message for sending.
    pub fn send_str(&self, text: impl Into<String>) -> bool {
        self.send(Message::outgoing(text))
    }

    /// Schedule a log row without waiting for it.
    pub fn log(&self, message: Message) -> bool {
        self.post(DispatchTask::Log {
            message,
            done: None,
        })
    }

    /// Schedule a log row and wait until the dispatcher has displayed it.
    ///
    /// Returns immediately when the dispatcher is gone.
    pub async fn log_and_wait(&self, message: Message) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.post(DispatchTask::Log {
            message,
            done: Some(done_tx),
        }) {
            // A dropped sender means the dispatcher shut down; nothing to wait for.
            let _ = done_rx.await;
        }
    }

    /// Ask the dispatcher to stop.
    pub fn shutdown(&self) -> bool {
        self.post(DispatchTask::Shutdown)
    }

    /// Whether the dispatcher has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
