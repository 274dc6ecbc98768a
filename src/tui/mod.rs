//! Interactive terminal interface.
//!
//! Runs on its own thread. Rows and input gating arrive from the dispatcher
//! as [`UiUpdate`]s through a [`ChannelSurface`]; typed lines and quit go
//! back through the [`Marshal`](crate::events::Marshal).
//!
//! # Modules
//!
//! - [`app`] - Interface state and key handling
//! - [`guard`] - Terminal state guard
//! - [`render`] - Frame rendering
//! - [`runner`] - Event loop, thread spawn and the channel-backed surface

pub mod app;
pub mod guard;
pub mod render;
pub mod runner;

#[doc(inline)]
pub use app::{App, AppAction, UiUpdate};
#[doc(inline)]
pub use guard::{restore_terminal, TerminalGuard};
#[doc(inline)]
pub use runner::{spawn_tui, ChannelSurface, TuiRunner};
