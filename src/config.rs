//! Connection configuration.
//!
//! [`Config`] gathers every option the dispatcher, the transport and the
//! heartbeat drivers need. It is built once at startup (from the command
//! line in `main.rs`) and is immutable afterwards.
//!
//! Everything that can be wrong with the configuration is reported as a
//! [`ConfigError`] before the connection loop starts.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_FAKE_PING_INTERVAL_SECS, DEFAULT_PING_INTERVAL_SECS, DEFAULT_RECONNECT_SECS,
};
use crate::ws::http_to_ws_scheme;

/// Startup configuration failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Neither a URL nor `--plugin-provided-url` with a plugin was given.
    MissingUrl,
    /// `--plugin-provided-url` was set but the plugin did not provide one.
    MissingPluginUrl,
    /// The URL uses a scheme other than http, https, ws or wss.
    InvalidUrlScheme(String),
    /// A header line without a `Name: value` shape.
    MalformedHeader(String),
    /// The headers file could not be read.
    HeadersFile {
        /// File path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
    /// The initial messages file could not be read.
    InitialMessages {
        /// File path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
    /// The plugin file does not exist.
    PluginNotFound(PathBuf),
    /// The plugin file failed to load or evaluate.
    PluginInvalid {
        /// File path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
    /// The plugin file did not evaluate to exactly one plugin.
    PluginCount {
        /// File path.
        path: PathBuf,
        /// Number of plugin values found.
        found: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUrl => write!(
                f,
                "Please provide a WebSocket URL using -u or use --plugin-provided-url with --plugin"
            ),
            Self::MissingPluginUrl => {
                write!(f, "--plugin-provided-url was given but the plugin set no url")
            }
            Self::InvalidUrlScheme(url) => write!(
                f,
                "Invalid protocol in {url}. Supported protocols are http://, https://, ws://, and wss://"
            ),
            Self::MalformedHeader(line) => {
                write!(f, "Malformed header (expected \"Name: value\"): {line}")
            }
            Self::HeadersFile { path, reason } => {
                write!(f, "Cannot read headers file {}: {reason}", path.display())
            }
            Self::InitialMessages { path, reason } => write!(
                f,
                "Cannot read initial messages file {}: {reason}",
                path.display()
            ),
            Self::PluginNotFound(path) => write!(f, "Plugin not found: {}", path.display()),
            Self::PluginInvalid { path, reason } => {
                write!(f, "Failed to load plugin {}: {reason}", path.display())
            }
            Self::PluginCount { path, found } => write!(
                f,
                "Plugin {} must return exactly one plugin table, found {found}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything needed to run a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Target URL, already normalised to ws:// or wss://. `None` when the
    /// plugin provides it.
    pub url: Option<String>,
    /// Take the URL from the plugin's `url` seed.
    pub plugin_provided_url: bool,
    /// Explicit `Name: value` header lines (highest precedence).
    pub headers: Vec<String>,
    /// Cookie values (`name=value`).
    pub cookies: Vec<String>,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Origin override. An empty string disables the Origin header.
    pub origin: Option<String>,
    /// File with one `Name: value` header per line.
    pub headers_file: Option<PathBuf>,
    /// Native (opcode 0x9) heartbeat interval in seconds, 0 disables.
    pub ping_interval: u64,
    /// Hide native ping/pong rows.
    pub hide_ping_pong: bool,
    /// Application-level heartbeat interval in seconds, 0 disables.
    pub fake_ping_interval: u64,
    /// Application-level ping payload.
    pub fake_ping_payload: Option<String>,
    /// Application-level pong payload.
    pub fake_pong_payload: Option<String>,
    /// Hide application-level ping/pong rows.
    pub hide_fake_ping_pong: bool,
    /// HTTP proxy URL (`http://host:port`).
    pub proxy: Option<String>,
    /// Verify the server's TLS certificate.
    pub verify_tls: bool,
    /// Delay before reconnecting, in seconds.
    pub reconnect_interval: u64,
    /// File with messages to send on every connect.
    pub initial_messages: Option<PathBuf>,
    /// Lua plugin file.
    pub plugin: Option<PathBuf>,
    /// History verbosity, 1 (errors) to 4 (debug).
    pub verbosity: u8,
    /// Abort on plugin hook errors instead of logging them.
    pub strict_plugins: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            plugin_provided_url: false,
            headers: Vec::new(),
            cookies: Vec::new(),
            user_agent: None,
            origin: None,
            headers_file: None,
            ping_interval: DEFAULT_PING_INTERVAL_SECS,
            hide_ping_pong: false,
            fake_ping_interval: DEFAULT_FAKE_PING_INTERVAL_SECS,
            fake_ping_payload: None,
            fake_pong_payload: None,
            hide_fake_ping_pong: false,
            proxy: None,
            verify_tls: true,
            reconnect_interval: DEFAULT_RECONNECT_SECS,
            initial_messages: None,
            plugin: None,
            verbosity: 3,
            strict_plugins: false,
        }
    }
}

impl Config {
    /// Check the URL requirements and normalise URL and proxy in place.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        match (&self.url, self.plugin_provided_url) {
            (Some(url), false) => self.url = Some(normalize_url(url)?),
            // The plugin replaces whatever URL was given.
            (_, true) if self.plugin.is_some() => {}
            _ => return Err(ConfigError::MissingUrl),
        }
        self.proxy = self.proxy.as_deref().map(normalize_proxy);
        Ok(())
    }

    /// Final URL to connect to, falling back to the plugin's seed.
    pub fn resolve_url(&self, plugin_url: Option<&str>) -> Result<String, ConfigError> {
        if self.plugin_provided_url {
            let url = plugin_url
                .filter(|u| !u.is_empty())
                .ok_or(ConfigError::MissingPluginUrl)?;
            return normalize_url(url);
        }
        self.url.clone().ok_or(ConfigError::MissingUrl)
    }

    /// Native heartbeat interval, `None` when disabled.
    #[must_use]
    pub fn native_heartbeat_secs(&self) -> Option<u64> {
        (self.ping_interval > 0).then_some(self.ping_interval)
    }

    /// Messages from the initial messages file, one per line, trimmed.
    ///
    /// Blank lines are kept; the dispatcher turns them into pauses.
    pub fn load_initial_messages(&self) -> Result<Vec<String>, ConfigError> {
        match &self.initial_messages {
            Some(path) => read_message_lines(path),
            None => Ok(Vec::new()),
        }
    }
}

/// Normalise a URL to the ws:// or wss:// scheme.
pub fn normalize_url(url: &str) -> Result<String, ConfigError> {
    let converted = http_to_ws_scheme(url);
    if converted.starts_with("ws://") || converted.starts_with("wss://") {
        Ok(converted)
    } else {
        Err(ConfigError::InvalidUrlScheme(url.to_string()))
    }
}

/// Give a bare `host:port` proxy an `http://` scheme.
#[must_use]
pub fn normalize_proxy(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    }
}

fn read_message_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::InitialMessages {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(content.lines().map(|line| line.trim().to_string()).collect())
}
