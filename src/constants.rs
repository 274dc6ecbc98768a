//! Application-wide constants for wsrepl.
//!
//! Defaults for the command line live here so the CLI, the configuration
//! layer and the tests agree on them.
//!
//! # Categories
//!
//! - **Heartbeat**: native and application-level keep-alive defaults
//! - **Connection**: reconnect delay and handshake headers
//! - **UI**: history and input limits

use std::time::Duration;

// ============================================================================
// Heartbeat
// ============================================================================

/// Default interval for native (opcode 0x9) pings, in seconds.
///
/// Zero disables the native heartbeat.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 24;

/// Default interval for application-level (opcode 0x1) pings, in seconds.
///
/// The application-level heartbeat additionally needs both a ping and a
/// pong payload before it runs.
pub const DEFAULT_FAKE_PING_INTERVAL_SECS: u64 = 24;

/// Shortest sleep a heartbeat driver takes between checks.
pub const HEARTBEAT_MIN_SLEEP: Duration = Duration::from_secs(1);

// ============================================================================
// Connection
// ============================================================================

/// Default delay before reconnecting after the connection drops, in seconds.
pub const DEFAULT_RECONNECT_SECS: u64 = 2;

/// Pause inserted for each blank entry in a seeded message list.
pub const SEED_PAUSE: Duration = Duration::from_secs(1);

/// User-Agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("wsrepl/", env!("CARGO_PKG_VERSION"));

/// Handshake headers that are always managed by the transport.
///
/// Matched case-insensitively and stripped from every configured source.
pub const HEADER_BLACKLIST: &[&str] = &["host", "upgrade", "connection"];

/// Close code reported when the server closes without a status.
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;

/// Close code reported when the connection drops without a close frame.
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

// ============================================================================
// UI
// ============================================================================

/// TUI poll interval (approximately 60fps).
pub const TUI_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Maximum number of rows kept in the history before the oldest are dropped.
pub const MAX_HISTORY_ROWS: usize = 10_000;

/// Log file name used when `WSREPL_LOG_FILE` is not set.
pub const DEFAULT_LOG_FILE_NAME: &str = "wsrepl.log";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_defaults() {
        assert_eq!(DEFAULT_PING_INTERVAL_SECS, 24);
        assert_eq!(DEFAULT_FAKE_PING_INTERVAL_SECS, 24);
        assert_eq!(HEARTBEAT_MIN_SLEEP, Duration::from_secs(1));
    }

    #[test]
    fn test_blacklist_is_lowercase() {
        for name in HEADER_BLACKLIST {
            assert_eq!(*name, name.to_ascii_lowercase());
        }
    }

    #[test]
    fn test_user_agent_carries_version() {
        assert!(DEFAULT_USER_AGENT.starts_with("wsrepl/"));
    }
}
