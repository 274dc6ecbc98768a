//! Plugin hook contract.
//!
//! A plugin observes and rewrites traffic at fixed points of the event
//! lifecycle. Every hook has a no-op default, so a plugin implements only
//! the ones it cares about.
//!
//! # Hook pairs
//!
//! Each event has an `on_*` pre-hook and an `after_*` post-hook:
//!
//! | event | pre | post |
//! |---|---|---|
//! | connect | `on_connect` | `after_connect` |
//! | text/binary frame | `on_data_received`, `on_message_received` | `after_message_received` |
//! | continuation frame | `on_continuation_received` | `after_continuation_received` |
//! | native ping | `on_ping_received` | `after_ping_received` |
//! | native pong | `on_pong_received` | `after_pong_received` |
//! | send | `on_message_sent` | `after_message_sent` |
//!
//! Pre-hooks run before the message is displayed and may change its views
//! or hide it. Post-hooks run after display and are where replies belong.
//! Only `on_message_sent` can stop a message, by returning
//! [`SendVerdict::Suppress`].
//!
//! # Sending from hooks
//!
//! Hooks get a [`HookContext`]; messages queued on it go through the normal
//! send path as soon as the hook returns. Pre-hooks are expected not to
//! send. This is not enforced: their sends are still delivered, with a
//! warning in the log.

pub mod lua;

use std::path::Path;

use anyhow::Result;

use crate::config::ConfigError;
use crate::message::Message;

pub use lua::LuaPlugin;

/// Values a plugin may provide during [`Plugin::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSeed {
    /// Messages sent after `on_connect` on every connect. Blank entries
    /// pause for one second instead of sending.
    pub messages: Vec<String>,
    /// Application-level ping payload, used when none is configured.
    pub ping_payload: Option<String>,
    /// Application-level pong payload, used when none is configured.
    pub pong_payload: Option<String>,
    /// URL to connect to when `--plugin-provided-url` is set.
    pub url: Option<String>,
}

/// Result of [`Plugin::on_message_sent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendVerdict {
    /// Write the message to the connection.
    #[default]
    Deliver,
    /// Do not write it; it is shown as a skipped message instead.
    Suppress,
}

/// Outbox handed to every hook.
#[derive(Debug, Default)]
pub struct HookContext {
    outbox: Vec<Message>,
}

impl HookContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the send path.
    pub fn send(&mut self, message: Message) {
        self.outbox.push(message);
    }

    /// Queue a text message for the send path.
    pub fn send_str(&mut self, text: impl Into<String>) {
        self.send(Message::outgoing(text));
    }

    /// Whether nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbox.is_empty()
    }

    /// Take the queued messages in order.
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }
}

/// Extension point invoked by the dispatcher.
///
/// All hooks run on the dispatcher's context, one at a time, in event
/// order. Errors are reported by the dispatcher and do not stop the
/// pipeline.
#[allow(unused_variables, reason = "default hooks ignore their arguments")]
pub trait Plugin {
    /// Display name used in logs.
    fn name(&self) -> &str {
        "default"
    }

    /// Called once at load, before the connection starts.
    fn init(&mut self, seed: &mut PluginSeed) -> Result<()> {
        Ok(())
    }

    /// Connection established, before the plugin's seeded messages.
    fn on_connect(&mut self, ctx: &mut HookContext) -> Result<()> {
        Ok(())
    }

    /// Connection established, after the plugin's seeded messages.
    fn after_connect(&mut self, ctx: &mut HookContext) -> Result<()> {
        Ok(())
    }

    /// Connection lost.
    fn on_disconnect(&mut self, ctx: &mut HookContext) -> Result<()> {
        Ok(())
    }

    /// Transport error.
    fn on_error(&mut self, ctx: &mut HookContext, error: &str) -> Result<()> {
        Ok(())
    }

    /// Text or binary frame received, before display.
    fn on_message_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        Ok(())
    }

    /// Text or binary frame received, after display.
    fn after_message_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        Ok(())
    }

    /// Raw data frame received; runs before [`Plugin::on_message_received`].
    fn on_data_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        Ok(())
    }

    /// Reserved; the dispatcher does not call it.
    fn after_data_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        Ok(())
    }

    /// Continuation frame received, before display.
    fn on_continuation_received(
        &mut self,
        ctx: &mut HookContext,
        message: &mut Message,
    ) -> Result<()> {
        Ok(())
    }

    /// Continuation frame received, after display.
    fn after_continuation_received(
        &mut self,
        ctx: &mut HookContext,
        message: &Message,
    ) -> Result<()> {
        Ok(())
    }

    /// Native ping received, before display.
    fn on_ping_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        Ok(())
    }

    /// Native ping received, after display and before the automatic pong.
    fn after_ping_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        Ok(())
    }

    /// Native pong received, before display.
    fn on_pong_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        Ok(())
    }

    /// Native pong received, after display.
    fn after_pong_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        Ok(())
    }

    /// About to send. Return [`SendVerdict::Suppress`] to drop the message.
    fn on_message_sent(
        &mut self,
        ctx: &mut HookContext,
        message: &mut Message,
    ) -> Result<SendVerdict> {
        Ok(SendVerdict::Deliver)
    }

    /// Sent (or suppressed) and displayed.
    fn after_message_sent(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        Ok(())
    }
}

/// Plugin used when no plugin file is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlugin;

impl Plugin for NoopPlugin {}

/// Load the plugin at `path`, or the no-op plugin when there is none.
pub fn load_plugin(path: Option<&Path>) -> Result<Box<dyn Plugin>, ConfigError> {
    match path {
        None => Ok(Box::new(NoopPlugin)),
        Some(path) => Ok(Box::new(LuaPlugin::load(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_noop_plugin_defaults() {
        let mut plugin = NoopPlugin;
        let mut ctx = HookContext::new();
        let mut seed = PluginSeed::default();
        let mut message = Message::outgoing("x");

        plugin.init(&mut seed).unwrap();
        assert_eq!(seed, PluginSeed::default());
        assert_eq!(
            plugin.on_message_sent(&mut ctx, &mut message).unwrap(),
            SendVerdict::Deliver
        );
        plugin.on_message_received(&mut ctx, &mut message).unwrap();
        assert_eq!(message, Message::outgoing("x"));
        assert!(ctx.is_empty());
        assert_eq!(plugin.name(), "default");
    }

    #[test]
    fn test_hook_context_preserves_order() {
        let mut ctx = HookContext::new();
        ctx.send_str("a");
        ctx.send(Message::ping_out(""));
        ctx.send_str("b");

        let drained = ctx.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].payload(), "a");
        assert!(drained[1].is_ping());
        assert_eq!(drained[2].payload(), "b");
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_load_plugin_without_path_is_noop() {
        let plugin = load_plugin(None).unwrap();
        assert_eq!(plugin.name(), "default");
    }

    #[test]
    fn test_load_plugin_missing_file() {
        let path = PathBuf::from("/nonexistent/plugin.lua");
        match load_plugin(Some(&path)) {
            Err(ConfigError::PluginNotFound(p)) => assert_eq!(p, path),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing plugin must fail"),
        }
    }
}
