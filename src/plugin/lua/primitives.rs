//! Globals available to Lua plugins.
//!
//! # Usage in Lua
//!
//! ```lua
//! -- Queue a message for the send path (default opcode 0x1)
//! wsrepl.send('{"type":"subscribe"}')
//! wsrepl.send("raw bytes", 2)
//!
//! -- Binary payload helpers
//! local tagged = wsrepl.encode_binary("\x00\x01")   -- "b64:AAE="
//! local bytes = wsrepl.decode_binary(msg.msg)      -- nil if not tagged
//!
//! -- Logging; rows appear in the history
//! log.info("subscribed")
//!
//! -- JSON
//! local data, err = json.decode(msg.msg)
//! local text, err = json.encode({ type = "ack" })
//! ```
//!
//! `json.*` functions return `value, nil` on success and `nil, error` on
//! failure.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use mlua::{Lua, LuaSerdeExt, Value};

use crate::message::{decode_binary, encode_binary, Direction, FrameKind, Message, BINARY_TAG};

/// Messages queued by `wsrepl.send` during a hook call.
pub type Outbox = Rc<RefCell<Vec<Message>>>;

/// Register `wsrepl`, `log` and `json`.
pub fn register_all(lua: &Lua, outbox: Outbox) -> Result<()> {
    register_wsrepl(lua, outbox)?;
    register_log(lua)?;
    register_json(lua)?;
    Ok(())
}

/// Register the `wsrepl` table.
pub fn register_wsrepl(lua: &Lua, outbox: Outbox) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create wsrepl table: {e}"))?;

    let send_fn = lua
        .create_function(move |_, (payload, opcode): (mlua::String, Option<u8>)| {
            let opcode = opcode.unwrap_or(0x1);
            let frame = FrameKind::from_opcode(opcode).ok_or_else(|| {
                mlua::Error::external(format!("wsrepl.send: unsupported opcode {opcode:#x}"))
            })?;
            let bytes = payload.as_bytes().to_vec();
            let message = match frame {
                FrameKind::Binary if !bytes.starts_with(BINARY_TAG.as_bytes()) => {
                    Message::outgoing_binary(&bytes)
                }
                _ => Message::new(
                    String::from_utf8_lossy(&bytes).into_owned(),
                    Direction::Outgoing,
                    frame,
                ),
            };
            outbox.borrow_mut().push(message);
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create wsrepl.send function: {e}"))?;
    table
        .set("send", send_fn)
        .map_err(|e| anyhow!("Failed to set wsrepl.send: {e}"))?;

    let encode_fn = lua
        .create_function(|_, data: mlua::String| Ok(encode_binary(&data.as_bytes())))
        .map_err(|e| anyhow!("Failed to create wsrepl.encode_binary function: {e}"))?;
    table
        .set("encode_binary", encode_fn)
        .map_err(|e| anyhow!("Failed to set wsrepl.encode_binary: {e}"))?;

    let decode_fn = lua
        .create_function(|lua, data: String| match decode_binary(&data) {
            Some(bytes) => lua.create_string(bytes).map(Value::String),
            None => Ok(Value::Nil),
        })
        .map_err(|e| anyhow!("Failed to create wsrepl.decode_binary function: {e}"))?;
    table
        .set("decode_binary", decode_fn)
        .map_err(|e| anyhow!("Failed to set wsrepl.decode_binary: {e}"))?;

    table
        .set("version", env!("CARGO_PKG_VERSION"))
        .map_err(|e| anyhow!("Failed to set wsrepl.version: {e}"))?;

    lua.globals()
        .set("wsrepl", table)
        .map_err(|e| anyhow!("Failed to register wsrepl table globally: {e}"))?;
    Ok(())
}

/// Register the `log` table. Records use the `lua` target.
pub fn register_log(lua: &Lua) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    for (name, level) in [
        ("debug", log::Level::Debug),
        ("info", log::Level::Info),
        ("warn", log::Level::Warn),
        ("error", log::Level::Error),
    ] {
        let func = lua
            .create_function(move |_, text: String| {
                log::log!(target: crate::logging::LUA_TARGET, level, "{text}");
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;
    Ok(())
}

/// Register the `json` table.
pub fn register_json(lua: &Lua) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create json table: {e}"))?;

    let encode_fn = lua
        .create_function(|lua, value: Value| {
            Ok(into_pair(
                lua_to_json(lua, value).and_then(|v| {
                    serde_json::to_string(&v).map_err(|e| format!("Failed to encode JSON: {e}"))
                }),
            ))
        })
        .map_err(|e| anyhow!("Failed to create json.encode function: {e}"))?;
    table
        .set("encode", encode_fn)
        .map_err(|e| anyhow!("Failed to set json.encode: {e}"))?;

    let pretty_fn = lua
        .create_function(|lua, value: Value| {
            Ok(into_pair(lua_to_json(lua, value).and_then(|v| {
                serde_json::to_string_pretty(&v).map_err(|e| format!("Failed to encode JSON: {e}"))
            })))
        })
        .map_err(|e| anyhow!("Failed to create json.encode_pretty function: {e}"))?;
    table
        .set("encode_pretty", pretty_fn)
        .map_err(|e| anyhow!("Failed to set json.encode_pretty: {e}"))?;

    let decode_fn = lua
        .create_function(|lua, text: String| {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(parsed) => Ok((Some(json_to_lua(lua, &parsed)?), None::<String>)),
                Err(e) => Ok((None::<Value>, Some(format!("Failed to decode JSON: {e}")))),
            }
        })
        .map_err(|e| anyhow!("Failed to create json.decode function: {e}"))?;
    table
        .set("decode", decode_fn)
        .map_err(|e| anyhow!("Failed to set json.decode: {e}"))?;

    lua.globals()
        .set("json", table)
        .map_err(|e| anyhow!("Failed to register json table globally: {e}"))?;
    Ok(())
}

fn lua_to_json(lua: &Lua, value: Value) -> std::result::Result<serde_json::Value, String> {
    lua.from_value(value)
        .map_err(|e| format!("Failed to convert Lua value: {e}"))
}

fn into_pair(result: std::result::Result<String, String>) -> (Option<String>, Option<String>) {
    match result {
        Ok(text) => (Some(text), None),
        Err(e) => (None, Some(e)),
    }
}

/// Convert JSON to Lua, mapping `null` to `nil` rather than mlua's
/// truthy null sentinel.
fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Nil, Value::Number),
        },
        serde_json::Value::String(s) => Value::String(lua.create_string(s)?),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map.iter().filter(|(_, v)| !v.is_null()) {
                table.set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Lua, Outbox) {
        let lua = Lua::new();
        let outbox = Outbox::default();
        register_all(&lua, Rc::clone(&outbox)).expect("register primitives");
        (lua, outbox)
    }

    #[test]
    fn test_send_queues_text_by_default() {
        let (lua, outbox) = setup();
        lua.load(r#"wsrepl.send("hello")"#).exec().unwrap();

        let queued = outbox.borrow();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload(), "hello");
        assert_eq!(queued[0].frame(), FrameKind::Text);
        assert!(queued[0].is_traffic());
    }

    #[test]
    fn test_send_binary_tags_raw_bytes() {
        let (lua, outbox) = setup();
        lua.load(r#"wsrepl.send("\0\1", 2)"#).exec().unwrap();
        lua.load(r#"wsrepl.send("b64:AAE=", 2)"#).exec().unwrap();

        let queued = outbox.borrow();
        assert_eq!(queued[0].payload(), "b64:AAE=");
        assert_eq!(queued[1].payload(), "b64:AAE=");
        assert_eq!(queued[0].wire_bytes(), vec![0, 1]);
    }

    #[test]
    fn test_send_rejects_unknown_opcode() {
        let (lua, outbox) = setup();
        assert!(lua.load(r#"wsrepl.send("x", 7)"#).exec().is_err());
        assert!(outbox.borrow().is_empty());
    }

    #[test]
    fn test_binary_helpers() {
        let (lua, _) = setup();
        let (tagged, decoded, missing): (String, String, Option<String>) = lua
            .load(
                r#"
                local t = wsrepl.encode_binary("hi")
                return t, wsrepl.decode_binary(t), wsrepl.decode_binary("plain")
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(tagged, "b64:aGk=");
        assert_eq!(decoded, "hi");
        assert!(missing.is_none());
    }

    #[test]
    fn test_log_functions_callable() {
        let (lua, _) = setup();
        lua.load(r#"log.debug("d"); log.info("i"); log.warn("w"); log.error("e")"#)
            .exec()
            .unwrap();
    }

    #[test]
    fn test_json_roundtrip_through_lua() {
        let (lua, _) = setup();
        let (name, missing, encoded): (String, Option<String>, String) = lua
            .load(
                r#"
                local data = json.decode('{"name":"bot","gone":null}')
                local text = json.encode({ ok = true })
                return data.name, data.gone, text
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(name, "bot");
        assert!(missing.is_none());
        assert_eq!(encoded, r#"{"ok":true}"#);
    }

    #[test]
    fn test_json_decode_error_pair() {
        let (lua, _) = setup();
        let (value, err): (Option<String>, Option<String>) =
            lua.load(r#"return json.decode("{oops")"#).eval().unwrap();
        assert!(value.is_none());
        assert!(err.unwrap().starts_with("Failed to decode JSON"));
    }
}
