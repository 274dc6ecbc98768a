//! Message model shared by the dispatcher, plugins and display surfaces.
//!
//! A [`Message`] describes one protocol event (a frame sent or received) or
//! one synthetic log line. Traffic and log rows travel through the same
//! history stream and are told apart by their [`Direction`].
//!
//! # Payload encoding
//!
//! Payloads are always stored as strings. Binary payloads use a tagged
//! base64 form (`b64:<data>`) so plugins can read and rewrite them as plain
//! text. Decoding never fails loudly: anything that cannot be decoded is
//! shown in its tagged form and sent as raw UTF-8.
//!
//! # Views
//!
//! - `short_view()` is the single-line form shown in the history list.
//! - `long_view()` is the detail form; JSON payloads are pretty-printed.
//!
//! Plugins may override either view. Overrides are plain strings; an empty
//! override counts as "not set".

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

/// Prefix marking a base64-encoded binary payload.
pub const BINARY_TAG: &str = "b64:";

/// Where a history row came from.
///
/// Traffic rows are `Incoming`/`Outgoing`; the rest are log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from the server.
    Incoming,
    /// Sent to the server.
    Outgoing,
    /// Debug log row.
    Debug,
    /// Informational log row.
    Info,
    /// Warning log row.
    Warning,
    /// Error log row.
    Error,
}

impl Direction {
    /// Single-character sign shown in front of each history row.
    #[must_use]
    pub const fn sign(self) -> char {
        match self {
            Self::Incoming => '<',
            Self::Outgoing => '>',
            Self::Debug => '.',
            Self::Info => '?',
            Self::Warning => '#',
            Self::Error => '!',
        }
    }

    /// Lowercase name, as exposed to Lua plugins.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Whether this direction describes real traffic (not a log row).
    #[must_use]
    pub const fn is_traffic(self) -> bool {
        matches!(self, Self::Incoming | Self::Outgoing)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket frame type (RFC 6455 opcode space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Continuation of a fragmented message (0x0).
    Continuation,
    /// UTF-8 text frame (0x1).
    #[default]
    Text,
    /// Binary frame (0x2).
    Binary,
    /// Close frame (0x8).
    Close,
    /// Ping control frame (0x9).
    Ping,
    /// Pong control frame (0xA).
    Pong,
}

impl FrameKind {
    /// Numeric opcode.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Frame kind for a numeric opcode, `None` for reserved opcodes.
    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

/// One protocol event or log line.
///
/// Created once per received frame or send request. The direction is fixed
/// at construction; everything a plugin may touch has a setter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: String,
    direction: Direction,
    frame: FrameKind,
    fin: bool,
    is_hidden: bool,
    is_fake_heartbeat: bool,
    short_override: Option<String>,
    long_override: Option<String>,
}

impl Message {
    /// Create a message with an explicit direction and frame kind.
    pub fn new(payload: impl Into<String>, direction: Direction, frame: FrameKind) -> Self {
        Self {
            payload: payload.into(),
            direction,
            frame,
            fin: true,
            is_hidden: false,
            is_fake_heartbeat: false,
            short_override: None,
            long_override: None,
        }
    }

    /// Received text frame.
    pub fn incoming(payload: impl Into<String>) -> Self {
        Self::new(payload, Direction::Incoming, FrameKind::Text)
    }

    /// Text frame to be sent.
    pub fn outgoing(payload: impl Into<String>) -> Self {
        Self::new(payload, Direction::Outgoing, FrameKind::Text)
    }

    /// Received frame built from raw bytes.
    ///
    /// Binary frames are tagged. Text frames are decoded as UTF-8. Control
    /// and continuation frames are decoded too, but fall back to the tagged
    /// form when the bytes are not valid text or already look tagged, so
    /// [`Message::wire_bytes`] gives back exactly what was received.
    #[must_use]
    pub fn incoming_frame(bytes: &[u8], frame: FrameKind, fin: bool) -> Self {
        let payload = match frame {
            FrameKind::Binary => encode_binary(bytes),
            FrameKind::Text => text_or_tagged(bytes),
            _ => match std::str::from_utf8(bytes) {
                Ok(text) if !text.starts_with(BINARY_TAG) => text.to_string(),
                _ => encode_binary(bytes),
            },
        };
        let mut message = Self::new(payload, Direction::Incoming, frame);
        message.fin = fin;
        message
    }

    /// Binary frame to be sent.
    #[must_use]
    pub fn outgoing_binary(bytes: &[u8]) -> Self {
        Self::new(encode_binary(bytes), Direction::Outgoing, FrameKind::Binary)
    }

    /// Native ping to be sent.
    pub fn ping_out(payload: impl Into<String>) -> Self {
        Self::new(payload, Direction::Outgoing, FrameKind::Ping)
    }

    /// Received native ping.
    pub fn ping_in(payload: impl Into<String>) -> Self {
        Self::new(payload, Direction::Incoming, FrameKind::Ping)
    }

    /// Native pong to be sent.
    pub fn pong_out(payload: impl Into<String>) -> Self {
        Self::new(payload, Direction::Outgoing, FrameKind::Pong)
    }

    /// Received native pong.
    pub fn pong_in(payload: impl Into<String>) -> Self {
        Self::new(payload, Direction::Incoming, FrameKind::Pong)
    }

    /// Debug log row.
    pub fn debug(text: impl Into<String>) -> Self {
        Self::new(text, Direction::Debug, FrameKind::Text)
    }

    /// Informational log row.
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, Direction::Info, FrameKind::Text)
    }

    /// Warning log row.
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(text, Direction::Warning, FrameKind::Text)
    }

    /// Error log row.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Direction::Error, FrameKind::Text)
    }

    /// Log row for a `log` crate level.
    pub fn log(level: log::Level, text: impl Into<String>) -> Self {
        match level {
            log::Level::Error => Self::error(text),
            log::Level::Warn => Self::warning(text),
            log::Level::Info => Self::info(text),
            log::Level::Debug | log::Level::Trace => Self::debug(text),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Raw payload (binary frames carry the `b64:` tag).
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Replace the payload. Views that were not overridden follow it.
    pub fn set_payload(&mut self, payload: impl Into<String>) {
        self.payload = payload.into();
    }

    /// Direction, fixed at construction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Frame kind.
    #[must_use]
    pub const fn frame(&self) -> FrameKind {
        self.frame
    }

    /// Change the frame kind.
    pub fn set_frame(&mut self, frame: FrameKind) {
        self.frame = frame;
    }

    /// Numeric opcode of the frame kind.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        self.frame.opcode()
    }

    /// Opcode formatted for the history (`0x1`), `-` for log rows.
    #[must_use]
    pub fn opcode_hex(&self) -> String {
        if self.is_traffic() {
            format!("0x{:X}", self.frame.opcode())
        } else {
            "-".to_string()
        }
    }

    /// Whether this is the final fragment of a message.
    #[must_use]
    pub const fn fin(&self) -> bool {
        self.fin
    }

    /// Set the final-fragment flag.
    pub fn set_fin(&mut self, fin: bool) {
        self.fin = fin;
    }

    /// Whether the row is suppressed from the visible history.
    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        self.is_hidden
    }

    /// Hide or show the row.
    pub fn set_hidden(&mut self, hidden: bool) {
        self.is_hidden = hidden;
    }

    /// Whether this text frame is an application-level heartbeat.
    #[must_use]
    pub const fn is_fake_heartbeat(&self) -> bool {
        self.is_fake_heartbeat
    }

    /// Tag or untag the message as an application-level heartbeat.
    pub fn set_fake_heartbeat(&mut self, value: bool) {
        self.is_fake_heartbeat = value;
    }

    /// Whether this message is traffic rather than a log row.
    #[must_use]
    pub const fn is_traffic(&self) -> bool {
        self.direction.is_traffic()
    }

    // ------------------------------------------------------------------
    // Frame predicates. Setters rewrite the frame kind; clearing one falls
    // back to a text frame.
    // ------------------------------------------------------------------

    /// Binary frame?
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.frame == FrameKind::Binary
    }

    /// Mark as binary (or back to text).
    pub fn set_binary(&mut self, value: bool) {
        self.set_predicate(FrameKind::Binary, value);
    }

    /// Native ping frame?
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.frame == FrameKind::Ping
    }

    /// Mark as native ping (or back to text).
    pub fn set_ping(&mut self, value: bool) {
        self.set_predicate(FrameKind::Ping, value);
    }

    /// Native pong frame?
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.frame == FrameKind::Pong
    }

    /// Mark as native pong (or back to text).
    pub fn set_pong(&mut self, value: bool) {
        self.set_predicate(FrameKind::Pong, value);
    }

    /// Continuation frame?
    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.frame == FrameKind::Continuation
    }

    /// Mark as continuation (or back to text).
    pub fn set_continuation(&mut self, value: bool) {
        self.set_predicate(FrameKind::Continuation, value);
    }

    fn set_predicate(&mut self, kind: FrameKind, value: bool) {
        if value {
            self.frame = kind;
        } else if self.frame == kind {
            self.frame = FrameKind::Text;
        }
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// History form of the message.
    ///
    /// The override when set, else the payload. Tagged payloads of non-text
    /// frames are shown decoded when they hold valid UTF-8 and in tagged
    /// form otherwise.
    #[must_use]
    pub fn short_view(&self) -> String {
        if let Some(short) = non_empty(self.short_override.as_deref()) {
            return short.to_string();
        }
        if self.frame == FrameKind::Text {
            return self.payload.clone();
        }
        match decode_binary(&self.payload).map(String::from_utf8) {
            Some(Ok(text)) => text,
            _ => self.payload.clone(),
        }
    }

    /// Override the history form.
    pub fn set_short_view(&mut self, short: impl Into<String>) {
        self.short_override = Some(short.into());
    }

    /// Detail form of the message.
    ///
    /// The long override (or the short view) pretty-printed as JSON when it
    /// parses, else unchanged.
    #[must_use]
    pub fn long_view(&self) -> String {
        let source = match non_empty(self.long_override.as_deref()) {
            Some(long) => long.to_string(),
            None => self.short_view(),
        };
        pretty_json(&source).unwrap_or(source)
    }

    /// Override the detail form.
    pub fn set_long_view(&mut self, long: impl Into<String>) {
        self.long_override = Some(long.into());
    }

    /// Current short override, if any.
    #[must_use]
    pub fn short_override(&self) -> Option<&str> {
        self.short_override.as_deref()
    }

    /// Current long override, if any.
    #[must_use]
    pub fn long_override(&self) -> Option<&str> {
        self.long_override.as_deref()
    }

    /// Bytes to put on the wire.
    ///
    /// Non-text frames decode their `b64:` tag (received control frames
    /// with non-UTF-8 payloads carry one too). Untagged or undecodable
    /// payloads go out as their raw UTF-8 bytes.
    #[must_use]
    pub fn wire_bytes(&self) -> Vec<u8> {
        if self.frame != FrameKind::Text {
            if let Some(bytes) = decode_binary(&self.payload) {
                return bytes;
            }
            if self.frame == FrameKind::Binary {
                log::debug!("Binary payload is not tagged base64, sending raw text");
            }
        }
        self.payload.as_bytes().to_vec()
    }

    /// Decoded binary payload, `None` when the payload is not tagged base64.
    #[must_use]
    pub fn binary(&self) -> Option<Vec<u8>> {
        decode_binary(&self.payload)
    }

    /// Turn a suppressed send into an informational row.
    pub(crate) fn mark_skipped(&mut self) {
        let short = self.short_view();
        self.direction = Direction::Info;
        self.short_override = Some(format!("Message skipped: {short}"));
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Tag raw bytes as a binary payload.
#[must_use]
pub fn encode_binary(bytes: &[u8]) -> String {
    format!("{BINARY_TAG}{}", BASE64.encode(bytes))
}

/// Decode a `b64:` tagged payload.
#[must_use]
pub fn decode_binary(payload: &str) -> Option<Vec<u8>> {
    let encoded = payload.strip_prefix(BINARY_TAG)?;
    BASE64.decode(encoded).ok()
}

fn text_or_tagged(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => encode_binary(bytes),
    }
}

/// Pretty-print JSON with four-space indentation.
fn pretty_json(source: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(source).ok()?;
    // Bare scalars ("42", "true") read better unformatted.
    if !(value.is_object() || value.is_array()) {
        return None;
    }
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer).ok()?;
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_signs() {
        assert_eq!(Direction::Incoming.sign(), '<');
        assert_eq!(Direction::Outgoing.sign(), '>');
        assert_eq!(Direction::Debug.sign(), '.');
        assert_eq!(Direction::Info.sign(), '?');
        assert_eq!(Direction::Warning.sign(), '#');
        assert_eq!(Direction::Error.sign(), '!');
    }

    #[test]
    fn test_frame_kind_opcodes() {
        for kind in [
            FrameKind::Continuation,
            FrameKind::Text,
            FrameKind::Binary,
            FrameKind::Close,
            FrameKind::Ping,
            FrameKind::Pong,
        ] {
            assert_eq!(FrameKind::from_opcode(kind.opcode()), Some(kind));
        }
        assert_eq!(FrameKind::from_opcode(0x3), None);
    }

    #[test]
    fn test_predicates_follow_frame_kind() {
        let mut msg = Message::outgoing("x");
        assert!(!msg.is_binary() && !msg.is_ping() && !msg.is_pong() && !msg.is_continuation());

        msg.set_ping(true);
        assert!(msg.is_ping());
        assert_eq!(msg.frame(), FrameKind::Ping);

        // Setting another predicate replaces the kind, never stacks.
        msg.set_binary(true);
        assert!(msg.is_binary());
        assert!(!msg.is_ping());

        msg.set_binary(false);
        assert_eq!(msg.frame(), FrameKind::Text);
    }

    #[test]
    fn test_clearing_unset_predicate_keeps_kind() {
        let mut msg = Message::pong_out("");
        msg.set_ping(false);
        assert!(msg.is_pong());
    }

    #[test]
    fn test_short_view_defaults_to_payload() {
        let msg = Message::incoming("hello");
        assert_eq!(msg.short_view(), "hello");
    }

    #[test]
    fn test_short_override_wins_unless_empty() {
        let mut msg = Message::incoming("hello");
        msg.set_short_view("hi");
        assert_eq!(msg.short_view(), "hi");

        msg.set_short_view("");
        assert_eq!(msg.short_view(), "hello");
    }

    #[test]
    fn test_binary_utf8_is_shown_decoded() {
        let msg = Message::incoming_frame(b"plain", FrameKind::Binary, true);
        assert_eq!(msg.payload(), "b64:cGxhaW4=");
        assert_eq!(msg.short_view(), "plain");
        assert_eq!(msg.wire_bytes(), b"plain");
    }

    #[test]
    fn test_binary_non_utf8_is_shown_tagged() {
        let msg = Message::incoming_frame(&[0xff, 0x00, 0xfe], FrameKind::Binary, true);
        assert!(msg.short_view().starts_with(BINARY_TAG));
        assert_eq!(msg.binary(), Some(vec![0xff, 0x00, 0xfe]));
    }

    #[test]
    fn test_undecodable_binary_degrades_to_raw_text() {
        let mut msg = Message::outgoing("not tagged");
        msg.set_binary(true);
        assert_eq!(msg.short_view(), "not tagged");
        assert_eq!(msg.wire_bytes(), b"not tagged");
        assert_eq!(msg.binary(), None);

        msg.set_payload("b64:***");
        assert_eq!(msg.short_view(), "b64:***");
        assert_eq!(msg.wire_bytes(), b"b64:***");
    }

    #[test]
    fn test_non_utf8_ping_payload_is_tagged() {
        let msg = Message::incoming_frame(&[0xc3, 0x28], FrameKind::Ping, true);
        assert!(msg.payload().starts_with(BINARY_TAG));
        assert!(msg.is_ping());

        // Echoing it back as a pong restores the original bytes.
        let pong = Message::pong_out(msg.payload());
        assert_eq!(pong.wire_bytes(), vec![0xc3, 0x28]);
    }

    #[test]
    fn test_tag_lookalike_ping_round_trips() {
        let msg = Message::incoming_frame(b"b64:aGk=", FrameKind::Ping, true);
        assert_eq!(msg.short_view(), "b64:aGk=");
        assert_eq!(msg.wire_bytes(), b"b64:aGk=");

        let pong = Message::pong_out(msg.payload());
        assert_eq!(pong.wire_bytes(), b"b64:aGk=");
    }

    #[test]
    fn test_text_frames_never_decode_tag() {
        let msg = Message::outgoing("b64:aGk=");
        assert_eq!(msg.wire_bytes(), b"b64:aGk=");
    }

    #[test]
    fn test_long_view_pretty_prints_json() {
        let msg = Message::incoming(r#"{"a":1,"b":[true]}"#);
        assert_eq!(
            msg.long_view(),
            "{\n    \"a\": 1,\n    \"b\": [\n        true\n    ]\n}"
        );
    }

    #[test]
    fn test_long_view_falls_back_for_non_json() {
        let msg = Message::incoming("{not json");
        assert_eq!(msg.long_view(), "{not json");
        assert_eq!(Message::incoming("42").long_view(), "42");
    }

    #[test]
    fn test_long_view_uses_short_override() {
        let mut msg = Message::incoming("raw");
        msg.set_short_view("[1,2]");
        assert_eq!(msg.long_view(), "[\n    1,\n    2\n]");

        msg.set_long_view("detail");
        assert_eq!(msg.long_view(), "detail");
    }

    #[test]
    fn test_views_are_idempotent() {
        let msg = Message::incoming(r#"{"k":"v"}"#);
        assert_eq!(msg.short_view(), msg.short_view());
        assert_eq!(msg.long_view(), msg.long_view());
    }

    #[test]
    fn test_opcode_hex() {
        assert_eq!(Message::outgoing("x").opcode_hex(), "0x1");
        assert_eq!(Message::pong_in("").opcode_hex(), "0xA");
        assert_eq!(Message::info("log").opcode_hex(), "-");
    }

    #[test]
    fn test_mark_skipped() {
        let mut msg = Message::outgoing("secret");
        msg.mark_skipped();
        assert_eq!(msg.direction(), Direction::Info);
        assert_eq!(msg.short_view(), "Message skipped: secret");
        assert!(!msg.is_traffic());
    }

    #[test]
    fn test_log_levels_map_to_directions() {
        assert_eq!(Message::log(log::Level::Error, "e").direction(), Direction::Error);
        assert_eq!(Message::log(log::Level::Warn, "w").direction(), Direction::Warning);
        assert_eq!(Message::log(log::Level::Info, "i").direction(), Direction::Info);
        assert_eq!(Message::log(log::Level::Trace, "t").direction(), Direction::Debug);
    }
}
