//! Lua-scripted plugins.
//!
//! A plugin file is a Lua chunk that returns exactly one table. Hooks are
//! functions on that table, called as methods:
//!
//! ```lua
//! local plugin = {}
//!
//! function plugin:init()
//!     self.messages = { '{"type":"hello"}', "", '{"type":"subscribe"}' }
//!     self.ping_0x1_payload = "PING"
//!     self.pong_0x1_payload = "PONG"
//! end
//!
//! function plugin:on_message_received(msg)
//!     local data = json.decode(msg.msg)
//!     if data and data.type == "noise" then
//!         msg.is_hidden = true
//!     end
//! end
//!
//! function plugin:on_message_sent(msg)
//!     if msg.msg == "forbidden" then
//!         return false
//!     end
//! end
//!
//! return plugin
//! ```
//!
//! After `init` the table fields `messages`, `ping_0x1_payload`,
//! `pong_0x1_payload` and `url` are read as the plugin's seed.
//!
//! Missing hooks fall back to the no-op default. A hook that raises an
//! error is reported to the dispatcher as an `Err`.

mod message;
pub mod primitives;

use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Table, Value};

use crate::config::ConfigError;
use crate::message::Message;
use crate::plugin::{HookContext, Plugin, PluginSeed, SendVerdict};

pub use message::LuaMessage;
use primitives::Outbox;

/// Plugin backed by a Lua table.
pub struct LuaPlugin {
    lua: Lua,
    table: Table,
    outbox: Outbox,
    name: String,
}

impl std::fmt::Debug for LuaPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaPlugin")
            .field("name", &self.name)
            .field("queued", &self.outbox.borrow().len())
            .finish_non_exhaustive()
    }
}

impl LuaPlugin {
    /// Load a plugin file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::PluginNotFound(path.to_path_buf()));
        }
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::PluginInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let name = path
            .file_stem()
            .map_or_else(|| "plugin".to_string(), |s| s.to_string_lossy().into_owned());

        Self::from_source(&source, &name).map_err(|e| match e {
            LoadError::Count(found) => ConfigError::PluginCount {
                path: path.to_path_buf(),
                found,
            },
            LoadError::Lua(reason) => ConfigError::PluginInvalid {
                path: path.to_path_buf(),
                reason,
            },
        })
    }

    /// Evaluate plugin source. `name` is used for chunk names and logs.
    fn from_source(source: &str, name: &str) -> Result<Self, LoadError> {
        let lua = Lua::new();
        let outbox = Outbox::default();
        primitives::register_all(&lua, Rc::clone(&outbox))
            .map_err(|e| LoadError::Lua(e.to_string()))?;

        let values: MultiValue = lua
            .load(source)
            .set_name(format!("@{name}.lua"))
            .eval()
            .map_err(|e| LoadError::Lua(e.to_string()))?;

        let mut tables = values.into_iter().filter_map(|value| match value {
            Value::Table(table) => Some(table),
            _ => None,
        });
        let table = match (tables.next(), tables.count()) {
            (Some(table), 0) => table,
            (None, _) => return Err(LoadError::Count(0)),
            (Some(_), rest) => return Err(LoadError::Count(rest + 1)),
        };

        log::debug!("[plugin] Loaded Lua plugin {name}");
        Ok(Self {
            lua,
            table,
            outbox,
            name: name.to_string(),
        })
    }

    /// Look up a hook on the plugin table.
    fn hook(&self, hook: &str) -> Result<Option<Function>> {
        self.table
            .get::<Option<Function>>(hook)
            .map_err(|e| anyhow!("Plugin field '{hook}' is not a function: {e}"))
    }

    /// Call `hook` as a method, moving queued sends into `ctx`.
    ///
    /// Returns `None` when the plugin does not define the hook.
    fn call<A: IntoLuaMulti>(
        &self,
        ctx: &mut HookContext,
        hook: &str,
        args: A,
    ) -> Result<Option<Value>> {
        let Some(func) = self.hook(hook)? else {
            return Ok(None);
        };
        let mut args = args
            .into_lua_multi(&self.lua)
            .map_err(|e| anyhow!("Failed to convert arguments for '{hook}': {e}"))?;
        args.push_front(Value::Table(self.table.clone()));
        let result = func
            .call::<Value>(args)
            .map_err(|e| anyhow!("Lua hook '{hook}' failed: {e}"));
        for queued in self.outbox.borrow_mut().drain(..) {
            ctx.send(queued);
        }
        result.map(Some)
    }

    /// Call a hook that may change the message, copying changes back.
    fn call_mut(&self, ctx: &mut HookContext, hook: &str, message: &mut Message) -> Result<Option<Value>> {
        if self.hook(hook)?.is_none() {
            return Ok(None);
        }
        let ud = self
            .lua
            .create_userdata(LuaMessage(message.clone()))
            .map_err(|e| anyhow!("Failed to wrap message for '{hook}': {e}"))?;
        let result = self.call(ctx, hook, ud.clone());
        let updated = ud
            .borrow::<LuaMessage>()
            .map_err(|e| anyhow!("Message lost during '{hook}': {e}"))?;
        *message = updated.0.clone();
        result
    }

    /// Call a hook that only observes the message.
    fn call_ref(&self, ctx: &mut HookContext, hook: &str, message: &Message) -> Result<()> {
        if self.hook(hook)?.is_none() {
            return Ok(());
        }
        let ud = self
            .lua
            .create_userdata(LuaMessage(message.clone()))
            .map_err(|e| anyhow!("Failed to wrap message for '{hook}': {e}"))?;
        self.call(ctx, hook, ud).map(|_| ())
    }

    fn read_seed(&self, seed: &mut PluginSeed) -> Result<()> {
        let messages: Option<Vec<String>> = self
            .table
            .get("messages")
            .map_err(|e| anyhow!("Plugin field 'messages' must be a list of strings: {e}"))?;
        if let Some(messages) = messages {
            seed.messages = messages;
        }
        for (field, slot) in [
            ("ping_0x1_payload", &mut seed.ping_payload),
            ("pong_0x1_payload", &mut seed.pong_payload),
            ("url", &mut seed.url),
        ] {
            let value: Option<String> = self
                .table
                .get(field)
                .map_err(|e| anyhow!("Plugin field '{field}' must be a string: {e}"))?;
            if value.is_some() {
                *slot = value;
            }
        }
        Ok(())
    }
}

/// Why plugin source failed to load.
#[derive(Debug)]
enum LoadError {
    /// Number of tables returned, when not exactly one.
    Count(usize),
    /// Lua failed to compile or run the chunk.
    Lua(String),
}

impl Plugin for LuaPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, seed: &mut PluginSeed) -> Result<()> {
        let mut ctx = HookContext::new();
        self.call(&mut ctx, "init", ())?;
        if !ctx.is_empty() {
            log::warn!("[plugin] {}: messages sent from init are ignored; use self.messages", self.name);
        }
        self.read_seed(seed)
    }

    fn on_connect(&mut self, ctx: &mut HookContext) -> Result<()> {
        self.call(ctx, "on_connect", ()).map(|_| ())
    }

    fn after_connect(&mut self, ctx: &mut HookContext) -> Result<()> {
        self.call(ctx, "after_connect", ()).map(|_| ())
    }

    fn on_disconnect(&mut self, ctx: &mut HookContext) -> Result<()> {
        self.call(ctx, "on_disconnect", ()).map(|_| ())
    }

    fn on_error(&mut self, ctx: &mut HookContext, error: &str) -> Result<()> {
        self.call(ctx, "on_error", error.to_string()).map(|_| ())
    }

    fn on_message_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        self.call_mut(ctx, "on_message_received", message).map(|_| ())
    }

    fn after_message_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        self.call_ref(ctx, "after_message_received", message)
    }

    fn on_data_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        self.call_mut(ctx, "on_data_received", message).map(|_| ())
    }

    fn after_data_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        self.call_ref(ctx, "after_data_received", message)
    }

    fn on_continuation_received(
        &mut self,
        ctx: &mut HookContext,
        message: &mut Message,
    ) -> Result<()> {
        self.call_mut(ctx, "on_continuation_received", message).map(|_| ())
    }

    fn after_continuation_received(
        &mut self,
        ctx: &mut HookContext,
        message: &Message,
    ) -> Result<()> {
        self.call_ref(ctx, "after_continuation_received", message)
    }

    fn on_ping_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        self.call_mut(ctx, "on_ping_received", message).map(|_| ())
    }

    fn after_ping_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        self.call_ref(ctx, "after_ping_received", message)
    }

    fn on_pong_received(&mut self, ctx: &mut HookContext, message: &mut Message) -> Result<()> {
        self.call_mut(ctx, "on_pong_received", message).map(|_| ())
    }

    fn after_pong_received(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        self.call_ref(ctx, "after_pong_received", message)
    }

    fn on_message_sent(
        &mut self,
        ctx: &mut HookContext,
        message: &mut Message,
    ) -> Result<SendVerdict> {
        Ok(match self.call_mut(ctx, "on_message_sent", message)? {
            Some(Value::Boolean(false)) => SendVerdict::Suppress,
            _ => SendVerdict::Deliver,
        })
    }

    fn after_message_sent(&mut self, ctx: &mut HookContext, message: &Message) -> Result<()> {
        self.call_ref(ctx, "after_message_sent", message)
    }
}
