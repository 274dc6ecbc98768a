//! wsrepl - interactive WebSocket REPL.
//!
//! Watches traffic in both directions, sends typed messages, and runs Lua
//! plugins that observe and rewrite traffic before it is shown or sent.
//!
//! # Architecture
//!
//! ```text
//! transport thread ─┐
//! heartbeat threads ─┼─ Marshal ─► Dispatcher (main thread) ─► plugin hooks
//! tui / stdin ───────┘                 │                      ─► display surface
//!                                      └─► Transport::send
//! ```
//!
//! Every producer posts [`DispatchTask`]s; the [`Dispatcher`] handles them
//! one at a time in order and is the only writer to the connection.
//!
//! # Modules
//!
//! - [`message`] - Message model and views
//! - [`events`] - Dispatcher tasks and the [`Marshal`] handle
//! - [`dispatcher`] - Receive and send paths
//! - [`transport`] - Reconnecting connection thread
//! - [`ws`] - WebSocket client (proxy, TLS, frames)
//! - [`heartbeat`] - Native and application-level heartbeats
//! - [`plugin`] - Plugin hooks and Lua plugins
//! - [`display`] - Display surfaces and history
//! - [`tui`] - Terminal interface
//! - [`config`] / [`headers`] - Session configuration
//! - [`logging`] - File logging and history log rows

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod display;
pub mod events;
pub mod headers;
pub mod heartbeat;
pub mod logging;
pub mod message;
pub mod plugin;
pub mod transport;
pub mod tui;
pub mod ws;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use dispatcher::Dispatcher;
pub use display::{ConsoleSurface, DisplaySurface, History};
pub use events::{DispatchTask, Marshal};
pub use headers::build_headers;
pub use heartbeat::{HeartbeatDriver, StopFlag};
pub use message::{Direction, FrameKind, Message};
pub use plugin::{load_plugin, HookContext, LuaPlugin, NoopPlugin, Plugin, PluginSeed, SendVerdict};
pub use transport::{Transport, WebSocketTransport};
pub use ws::ConnectOptions;
