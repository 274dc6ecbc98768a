//! Terminal state guard.
//!
//! Puts the terminal into raw mode on the alternate screen and restores it
//! when dropped, including during a panic unwind.

use anyhow::{Context, Result};
use crossterm::{
    cursor, execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};

/// Restores the terminal on drop.
///
/// ```ignore
/// fn run_tui() -> Result<()> {
///     let _guard = TerminalGuard::enter()?;
///     // draw until quit; the terminal is restored on every exit path
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    /// Enable raw mode and switch to the alternate screen.
    pub fn enter() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        // From here on a failure must still undo raw mode.
        let guard = Self { _private: () };
        execute!(std::io::stdout(), EnterAlternateScreen)
            .context("Failed to enter alternate screen")?;
        Ok(guard)
    }
}

/// Best-effort terminal restore, shared with the panic hook.
pub fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(std::io::stdout(), LeaveAlternateScreen, cursor::Show);
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}
