//! Message userdata exposed to Lua hooks.
//!
//! # Usage in Lua
//!
//! ```lua
//! function plugin:on_message_received(msg)
//!     if msg.msg:find("token") then
//!         msg.short = "[redacted]"
//!     end
//!     if msg.is_ping then
//!         msg.is_hidden = true
//!     end
//! end
//! ```
//!
//! Fields: `msg`, `short`, `long`, `is_hidden`, `direction` (read-only),
//! `opcode`, `fin`, `is_binary`, `is_ping`, `is_pong`, `is_continuation`,
//! `is_fake_heartbeat`, `is_traffic` (read-only). `tostring(msg)` gives the
//! short view.

use mlua::{MetaMethod, UserData, UserDataFields, UserDataMethods};

use crate::message::{FrameKind, Message};

/// A [`Message`] owned by the Lua state for the duration of one hook call.
///
/// The dispatcher copies the message in before the call and reads it back
/// afterwards.
#[derive(Debug, Clone)]
pub struct LuaMessage(pub Message);

impl UserData for LuaMessage {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("msg", |_, this| Ok(this.0.payload().to_string()));
        fields.add_field_method_set("msg", |_, this, value: String| {
            this.0.set_payload(value);
            Ok(())
        });

        fields.add_field_method_get("short", |_, this| Ok(this.0.short_view()));
        fields.add_field_method_set("short", |_, this, value: String| {
            this.0.set_short_view(value);
            Ok(())
        });

        fields.add_field_method_get("long", |_, this| Ok(this.0.long_view()));
        fields.add_field_method_set("long", |_, this, value: String| {
            this.0.set_long_view(value);
            Ok(())
        });

        fields.add_field_method_get("is_hidden", |_, this| Ok(this.0.is_hidden()));
        fields.add_field_method_set("is_hidden", |_, this, value: bool| {
            this.0.set_hidden(value);
            Ok(())
        });

        fields.add_field_method_get("direction", |_, this| Ok(this.0.direction().as_str()));

        fields.add_field_method_get("opcode", |_, this| Ok(this.0.opcode()));
        fields.add_field_method_set("opcode", |_, this, value: u8| {
            let frame = FrameKind::from_opcode(value).ok_or_else(|| {
                mlua::Error::external(format!("Unsupported opcode: {value:#x}"))
            })?;
            this.0.set_frame(frame);
            Ok(())
        });

        fields.add_field_method_get("fin", |_, this| Ok(this.0.fin()));
        fields.add_field_method_set("fin", |_, this, value: bool| {
            this.0.set_fin(value);
            Ok(())
        });

        fields.add_field_method_get("is_binary", |_, this| Ok(this.0.is_binary()));
        fields.add_field_method_set("is_binary", |_, this, value: bool| {
            this.0.set_binary(value);
            Ok(())
        });

        fields.add_field_method_get("is_ping", |_, this| Ok(this.0.is_ping()));
        fields.add_field_method_set("is_ping", |_, this, value: bool| {
            this.0.set_ping(value);
            Ok(())
        });

        fields.add_field_method_get("is_pong", |_, this| Ok(this.0.is_pong()));
        fields.add_field_method_set("is_pong", |_, this, value: bool| {
            this.0.set_pong(value);
            Ok(())
        });

        fields.add_field_method_get("is_continuation", |_, this| Ok(this.0.is_continuation()));
        fields.add_field_method_set("is_continuation", |_, this, value: bool| {
            this.0.set_continuation(value);
            Ok(())
        });

        fields.add_field_method_get("is_fake_heartbeat", |_, this| {
            Ok(this.0.is_fake_heartbeat())
        });
        fields.add_field_method_set("is_fake_heartbeat", |_, this, value: bool| {
            this.0.set_fake_heartbeat(value);
            Ok(())
        });

        fields.add_field_method_get("is_traffic", |_, this| Ok(this.0.is_traffic()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.short_view()));
    }
}
