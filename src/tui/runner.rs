//! Interface thread and its event loop.
//!
//! # Architecture
//!
//! ```text
//! dispatcher ── ChannelSurface ──UiUpdate──► TuiRunner (tui thread)
//!                                              │ key press
//! dispatcher ◄────────── Marshal ◄─────────────┘ Send / Shutdown
//! ```
//!
//! The runner exits on quit keys or once the dispatcher drops its
//! [`ChannelSurface`].

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::Terminal;

use crate::constants::TUI_POLL_INTERVAL;
use crate::display::DisplaySurface;
use crate::events::Marshal;
use crate::logging::FILE_ONLY_TARGET;
use crate::message::Message;

use super::app::{App, AppAction, UiUpdate};
use super::guard::TerminalGuard;
use super::render::render;

/// [`DisplaySurface`] that forwards to the interface thread.
#[derive(Debug, Clone)]
pub struct ChannelSurface {
    tx: Sender<UiUpdate>,
}

impl ChannelSurface {
    /// Surface and the receiver the runner drains.
    #[must_use]
    pub fn channel() -> (Self, Receiver<UiUpdate>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn post(&self, update: UiUpdate) {
        if self.tx.send(update).is_err() {
            log::debug!(target: FILE_ONLY_TARGET, "[tui] Interface closed, dropping update");
        }
    }
}

impl DisplaySurface for ChannelSurface {
    fn add_message(&mut self, message: Message) {
        self.post(UiUpdate::Message(message));
    }

    fn enable_input(&mut self) {
        self.post(UiUpdate::InputEnabled(true));
    }

    fn disable_input(&mut self) {
        self.post(UiUpdate::InputEnabled(false));
    }
}

/// Owns the terminal and the interface state.
pub struct TuiRunner<B: Backend> {
    terminal: Terminal<B>,
    app: App,
    updates: Receiver<UiUpdate>,
    marshal: Marshal,
}

impl<B: Backend> std::fmt::Debug for TuiRunner<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuiRunner")
            .field("app", &self.app)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> TuiRunner<B>
where
    B::Error: std::error::Error + Send + Sync + 'static,
{
    /// Runner drawing on `terminal`.
    pub fn new(
        terminal: Terminal<B>,
        updates: Receiver<UiUpdate>,
        marshal: Marshal,
        max_rows: usize,
    ) -> Self {
        Self {
            terminal,
            app: App::new(max_rows),
            updates,
            marshal,
        }
    }

    /// Interface state.
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Run until a quit key or until the dispatcher goes away.
    pub fn run(&mut self) -> Result<()> {
        log::debug!(target: FILE_ONLY_TARGET, "[tui] Event loop starting");
        loop {
            if !self.drain_updates() {
                log::debug!(target: FILE_ONLY_TARGET, "[tui] Dispatcher closed the interface");
                break;
            }
            self.render()?;

            if event::poll(TUI_POLL_INTERVAL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match self.app.handle_key(key) {
                        AppAction::None => {}
                        AppAction::Send(text) => {
                            self.marshal.send_str(text);
                        }
                        AppAction::Quit => {
                            self.marshal.shutdown();
                            break;
                        }
                    }
                }
            }
        }
        log::debug!(target: FILE_ONLY_TARGET, "[tui] Event loop exiting");
        Ok(())
    }

    /// Apply pending updates. Returns `false` once the sender is gone.
    pub fn drain_updates(&mut self) -> bool {
        loop {
            match self.updates.try_recv() {
                Ok(update) => self.app.apply(update),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn render(&mut self) -> Result<()> {
        let app = &mut self.app;
        self.terminal.draw(|f| render(f, app))?;
        Ok(())
    }
}

/// Start the interface on its own thread.
///
/// Returns the surface for the dispatcher and the thread handle. The
/// terminal is set up and restored on the interface thread.
pub fn spawn_tui(marshal: Marshal, max_rows: usize) -> Result<(ChannelSurface, JoinHandle<Result<()>>)> {
    let (surface, updates) = ChannelSurface::channel();
    let handle = thread::Builder::new()
        .name("tui-runner".to_string())
        .spawn(move || {
            let result = run_terminal(updates, marshal.clone(), max_rows);
            if result.is_err() {
                marshal.shutdown();
            }
            result
        })
        .context("Failed to spawn TUI thread")?;
    Ok((surface, handle))
}

fn run_terminal(updates: Receiver<UiUpdate>, marshal: Marshal, max_rows: usize) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    let terminal = Terminal::new(CrosstermBackend::new(std::io::stdout()))
        .context("Failed to create terminal")?;
    TuiRunner::new(terminal, updates, marshal, max_rows).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn test_channel_surface_forwards_updates() {
        let (mut surface, rx) = ChannelSurface::channel();
        surface.enable_input();
        surface.add_message(Message::incoming("hi"));

        assert!(matches!(rx.try_recv(), Ok(UiUpdate::InputEnabled(true))));
        assert!(matches!(rx.try_recv(), Ok(UiUpdate::Message(m)) if m.payload() == "hi"));
    }

    #[test]
    fn test_drain_updates_reports_closed_dispatcher() {
        let (mut surface, rx) = ChannelSurface::channel();
        let (marshal, _queue) = Marshal::channel();
        let terminal = Terminal::new(TestBackend::new(40, 12)).unwrap();
        let mut runner = TuiRunner::new(terminal, rx, marshal, 10);

        surface.add_message(Message::incoming("one"));
        assert!(runner.drain_updates());
        assert_eq!(runner.app().history().len(), 1);

        drop(surface);
        assert!(!runner.drain_updates());
    }

    #[test]
    fn test_surface_survives_closed_interface() {
        let (mut surface, rx) = ChannelSurface::channel();
        drop(rx);
        surface.add_message(Message::incoming("lost"));
    }
}
