//! Connection dispatcher.
//!
//! The single serialized context of the process. It drains the
//! [`DispatchTask`] queue one task at a time, runs every plugin hook, decides
//! what is visible and is the only code that writes to the [`Transport`].
//!
//! # Receive path
//!
//! ```text
//! Data ─► tag fake heartbeat ─► on_data_received ─► on_message_received
//!      ─► display (unless hidden) ─► after_message_received ─► auto 0x1 pong
//! Ping ─► on_ping_received ─► display ─► after_ping_received ─► native pong
//! Pong ─► on_pong_received ─► display ─► after_pong_received
//! Continuation ─► on_continuation_received ─► display ─► after_continuation_received
//! ```
//!
//! # Send path
//!
//! ```text
//! on_message_sent ─► Suppress? mark skipped : transport.send
//!                 ─► hiding rules ─► display ─► after_message_sent
//! ```
//!
//! Sends queued by a hook run once the hook returns. Sends requested while
//! a send is in progress are queued behind it, so the path never recurses.

use std::collections::VecDeque;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use log::LevelFilter;
use tokio::sync::mpsc;

use crate::config::{Config, ConfigError};
use crate::constants::SEED_PAUSE;
use crate::display::DisplaySurface;
use crate::events::{DispatchTask, Marshal};
use crate::heartbeat::{HeartbeatDriver, StopFlag};
use crate::logging::{direction_level, verbosity_filter, FILE_ONLY_TARGET};
use crate::message::{FrameKind, Message};
use crate::plugin::{HookContext, Plugin, PluginSeed, SendVerdict};
use crate::transport::Transport;

/// Orchestrates the connection, heartbeats, plugin and display.
pub struct Dispatcher<T: Transport, D: DisplaySurface> {
    transport: T,
    display: D,
    plugin: Box<dyn Plugin>,
    stop: StopFlag,

    native_interval: Option<u64>,
    fake_interval: u64,
    fake_ping: Option<String>,
    fake_pong: Option<String>,
    hide_ping_pong: bool,
    hide_fake: bool,

    initial_messages: Vec<String>,
    plugin_messages: Vec<String>,

    strict: bool,
    log_level: LevelFilter,

    sending: bool,
    pending: VecDeque<Message>,
    failure: Option<anyhow::Error>,
    heartbeats: Vec<JoinHandle<()>>,
}

impl<T: Transport, D: DisplaySurface> std::fmt::Debug for Dispatcher<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("plugin", &self.plugin.name())
            .field("connected", &!self.stop.is_set())
            .field("native_interval", &self.native_interval)
            .field("fake_interval", &self.fake_interval)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport, D: DisplaySurface> Dispatcher<T, D> {
    /// Build a dispatcher from the session configuration and an initialised
    /// plugin. Reads the initial messages file.
    pub fn new(
        config: &Config,
        seed: PluginSeed,
        plugin: Box<dyn Plugin>,
        transport: T,
        display: D,
    ) -> Result<Self, ConfigError> {
        let initial_messages = config.load_initial_messages()?;
        Ok(Self {
            transport,
            display,
            plugin,
            stop: StopFlag::new(),
            native_interval: config.native_heartbeat_secs(),
            fake_interval: config.fake_ping_interval,
            fake_ping: config.fake_ping_payload.clone().or(seed.ping_payload),
            fake_pong: config.fake_pong_payload.clone().or(seed.pong_payload),
            hide_ping_pong: config.hide_ping_pong,
            hide_fake: config.hide_fake_ping_pong,
            initial_messages,
            plugin_messages: seed.messages,
            strict: config.strict_plugins,
            log_level: verbosity_filter(config.verbosity),
            sending: false,
            pending: VecDeque::new(),
            failure: None,
            heartbeats: Vec::new(),
        })
    }

    /// The display surface.
    pub fn display(&self) -> &D {
        &self.display
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Shared flag read by the heartbeat drivers; set while disconnected.
    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Launch the transport and the enabled heartbeat drivers. Returns
    /// without waiting for a connection.
    pub fn start(&mut self, marshal: &Marshal) -> Result<()> {
        self.transport.start(marshal.clone())?;

        if let Some(driver) = self
            .native_interval
            .and_then(|secs| HeartbeatDriver::native(secs, self.stop.clone()))
        {
            self.heartbeats.push(driver.spawn(marshal.clone())?);
        }

        if let Some(driver) = HeartbeatDriver::application(
            self.fake_interval,
            self.fake_ping.as_deref(),
            self.fake_pong.as_deref(),
            self.stop.clone(),
        ) {
            self.heartbeats.push(driver.spawn(marshal.clone())?);
        }

        log::debug!(
            "[dispatcher] Started with {} heartbeat driver(s)",
            self.heartbeats.len()
        );
        Ok(())
    }

    /// Drain the queue until shutdown.
    ///
    /// Returns the first hook error when strict plugin mode is on.
    pub async fn run(&mut self, mut queue: mpsc::UnboundedReceiver<DispatchTask>) -> Result<()> {
        while let Some(task) = queue.recv().await {
            if matches!(task, DispatchTask::Shutdown) {
                log::debug!("[dispatcher] Shutdown requested");
                break;
            }
            self.handle(task).await;
            if let Some(failure) = self.failure.take() {
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Process one task.
    pub async fn handle(&mut self, task: DispatchTask) {
        match task {
            DispatchTask::Connected => self.on_connected().await,
            DispatchTask::Disconnected { code, reason } => self.on_disconnected(code, &reason),
            DispatchTask::Error(error) => self.on_error(&error),
            DispatchTask::Data {
                payload,
                frame,
                fin,
            } => self.on_data(&payload, frame, fin),
            DispatchTask::Ping(payload) => self.on_ping(&payload),
            DispatchTask::Pong(payload) => self.on_pong(&payload),
            DispatchTask::Continuation { payload, fin } => self.on_continuation(&payload, fin),
            DispatchTask::Send(message) => self.send(message),
            DispatchTask::Log { message, done } => {
                self.log_row(message);
                if let Some(done) = done {
                    // The waiter may have given up; nothing to report.
                    let _ = done.send(());
                }
            }
            DispatchTask::Shutdown => {}
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    async fn on_connected(&mut self) {
        self.log_row(Message::info("Websocket connected"));
        self.stop.clear();

        let initial = self.initial_messages.clone();
        self.send_seeded(&initial).await;

        self.run_hook("on_connect", |plugin, ctx| plugin.on_connect(ctx));

        let seeded = self.plugin_messages.clone();
        self.send_seeded(&seeded).await;

        self.run_hook("after_connect", |plugin, ctx| plugin.after_connect(ctx));
        self.display.enable_input();
    }

    /// Send seeded lines in order; a blank line pauses instead of sending.
    async fn send_seeded(&mut self, lines: &[String]) {
        for line in lines {
            if line.trim().is_empty() {
                tokio::time::sleep(SEED_PAUSE).await;
            } else {
                self.send(Message::outgoing(line.clone()));
            }
        }
    }

    fn on_disconnected(&mut self, code: u16, reason: &str) {
        self.log_row(Message::error(format!(
            "Websocket disconnected with status code {code} and reason {reason}"
        )));
        self.stop.set();
        self.display.disable_input();
        self.run_hook("on_disconnect", |plugin, ctx| plugin.on_disconnect(ctx));
    }

    fn on_error(&mut self, error: &str) {
        self.log_row(Message::error(format!("Websocket error: {error}")));
        self.run_hook("on_error", |plugin, ctx| plugin.on_error(ctx, error));
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    fn on_data(&mut self, payload: &[u8], frame: FrameKind, fin: bool) {
        let mut message = Message::incoming_frame(payload, frame, fin);
        if frame == FrameKind::Text && self.is_fake_heartbeat(message.payload()) {
            message.set_fake_heartbeat(true);
            if self.hide_fake {
                message.set_hidden(true);
            }
        }

        self.run_hook("on_data_received", |plugin, ctx| {
            plugin.on_data_received(ctx, &mut message)
        });
        self.run_hook("on_message_received", |plugin, ctx| {
            plugin.on_message_received(ctx, &mut message)
        });
        self.show(&message);
        self.run_hook("after_message_received", |plugin, ctx| {
            plugin.after_message_received(ctx, &message)
        });

        let is_fake_ping = frame == FrameKind::Text
            && self.fake_pong.is_some()
            && self.fake_ping.as_deref().is_some_and(|ping| ping.as_bytes() == payload);
        if let (true, Some(pong)) = (is_fake_ping, self.fake_pong.clone()) {
            let mut reply = Message::outgoing(pong);
            reply.set_fake_heartbeat(true);
            self.send(reply);
        }
    }

    fn on_ping(&mut self, payload: &[u8]) {
        let mut message = Message::incoming_frame(payload, FrameKind::Ping, true);
        self.run_hook("on_ping_received", |plugin, ctx| {
            plugin.on_ping_received(ctx, &mut message)
        });
        if !self.hide_ping_pong {
            self.show(&message);
        }
        self.run_hook("after_ping_received", |plugin, ctx| {
            plugin.after_ping_received(ctx, &message)
        });

        // Echo the frame as received, not as the plugin rewrote it.
        let echo = Message::incoming_frame(payload, FrameKind::Ping, true);
        self.send(Message::pong_out(echo.payload()));
    }

    fn on_pong(&mut self, payload: &[u8]) {
        let mut message = Message::incoming_frame(payload, FrameKind::Pong, true);
        self.run_hook("on_pong_received", |plugin, ctx| {
            plugin.on_pong_received(ctx, &mut message)
        });
        if !self.hide_ping_pong {
            self.show(&message);
        }
        self.run_hook("after_pong_received", |plugin, ctx| {
            plugin.after_pong_received(ctx, &message)
        });
    }

    fn on_continuation(&mut self, payload: &[u8], fin: bool) {
        let mut message = Message::incoming_frame(payload, FrameKind::Continuation, fin);
        self.run_hook("on_continuation_received", |plugin, ctx| {
            plugin.on_continuation_received(ctx, &mut message)
        });
        self.show(&message);
        self.run_hook("after_continuation_received", |plugin, ctx| {
            plugin.after_continuation_received(ctx, &message)
        });
    }

    fn is_fake_heartbeat(&self, payload: &str) -> bool {
        self.fake_ping.as_deref() == Some(payload) || self.fake_pong.as_deref() == Some(payload)
    }

    // =========================================================================
    // Send path
    // =========================================================================

    /// Send a message through the canonical send path.
    pub fn send(&mut self, message: Message) {
        self.pending.push_back(message);
        if self.sending {
            return;
        }
        self.sending = true;
        while let Some(next) = self.pending.pop_front() {
            self.send_one(next);
        }
        self.sending = false;
    }

    fn send_one(&mut self, mut message: Message) {
        let verdict = self.run_hook("on_message_sent", |plugin, ctx| {
            plugin.on_message_sent(ctx, &mut message)
        });

        match verdict {
            SendVerdict::Suppress => message.mark_skipped(),
            SendVerdict::Deliver => {
                if let Err(e) = self.transport.send(message.frame(), message.wire_bytes()) {
                    self.log_row(Message::error(format!(
                        "Failed to send message: {e:#}: {}",
                        message.short_view()
                    )));
                    return;
                }
            }
        }

        if (self.hide_ping_pong && (message.is_ping() || message.is_pong()))
            || (self.hide_fake && message.is_fake_heartbeat())
        {
            message.set_hidden(true);
        }
        self.show(&message);
        self.run_hook("after_message_sent", |plugin, ctx| {
            plugin.after_message_sent(ctx, &message)
        });
    }

    // =========================================================================
    // Hooks and display
    // =========================================================================

    /// Run one plugin hook, report its failure and flush the sends it queued.
    fn run_hook<R: Default>(
        &mut self,
        name: &str,
        hook: impl FnOnce(&mut dyn Plugin, &mut HookContext) -> Result<R>,
    ) -> R {
        let mut ctx = HookContext::new();
        let result = match hook(self.plugin.as_mut(), &mut ctx) {
            Ok(value) => value,
            Err(e) => {
                let text = format!("Plugin hook {name} failed: {e:#}");
                self.log_row(Message::error(text.clone()));
                if self.strict && self.failure.is_none() {
                    self.failure = Some(anyhow!(text));
                }
                R::default()
            }
        };

        if !ctx.is_empty() {
            if name.starts_with("on_") {
                self.log_row(Message::warning(format!(
                    "Plugin hook {name} sent messages; sending belongs in after_* hooks"
                )));
            }
            for message in ctx.drain() {
                self.send(message);
            }
        }
        result
    }

    fn show(&mut self, message: &Message) {
        if !message.is_hidden() {
            self.display.add_message(message.clone());
        }
    }

    /// Display a log row when the verbosity allows it and mirror it to the
    /// log file.
    fn log_row(&mut self, message: Message) {
        let Some(level) = direction_level(message.direction()) else {
            self.show(&message);
            return;
        };
        log::log!(target: FILE_ONLY_TARGET, level, "{}", message.payload());
        if level <= self.log_level {
            self.show(&message);
        }
    }
}
