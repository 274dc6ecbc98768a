//! wsrepl - interactive WebSocket REPL.
//!
//! This is the binary entry point: argument parsing, logging, and wiring
//! the dispatcher to either the terminal interface or the console. See the
//! `wsrepl` library for the runtime itself.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use wsrepl::constants::{
    DEFAULT_FAKE_PING_INTERVAL_SECS, DEFAULT_PING_INTERVAL_SECS, DEFAULT_RECONNECT_SECS,
    MAX_HISTORY_ROWS,
};
use wsrepl::display::{ConsoleSurface, DisplaySurface, InputGate};
use wsrepl::{
    build_headers, load_plugin, logging, tui, Config, ConnectOptions, DispatchTask, Dispatcher,
    Marshal, Message, Plugin, PluginSeed, WebSocketTransport,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser, Debug)]
#[command(name = "wsrepl")]
#[command(version = VERSION)]
#[command(about = "Interactive WebSocket REPL with Lua plugin hooks")]
struct Cli {
    /// WebSocket URL (e.g. wss://echo.websocket.org)
    #[arg(short = 'u', long = "url")]
    url: Option<String>,

    /// WebSocket URL (e.g. wss://echo.websocket.org)
    #[arg(value_name = "URL")]
    url_positional: Option<String>,

    /// No effect, just for curl compatibility
    #[arg(short = 'i', long)]
    #[allow(dead_code, reason = "accepted for curl compatibility")]
    include: bool,

    /// No effect, just for curl compatibility
    #[arg(short = 's', long)]
    #[allow(dead_code, reason = "accepted for curl compatibility")]
    silent: bool,

    /// No effect, kept for command lines written for the original tool
    #[arg(short = 'S', long)]
    #[allow(dead_code, reason = "accepted for command line compatibility")]
    small: bool,

    /// No effect, kept for command lines written for the original tool
    #[arg(short = 't', long)]
    #[allow(dead_code, reason = "accepted for command line compatibility")]
    ttl: Option<u64>,

    /// Disable TLS certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// No effect, just for curl compatibility
    #[arg(short = 'X', long)]
    #[allow(dead_code, reason = "accepted for curl compatibility")]
    request: Option<String>,

    /// Additional header (e.g. "X-Header: value"), can be used multiple times
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Cookie (e.g. "name=value"), can be used multiple times
    #[arg(short = 'b', long = "cookie")]
    cookies: Vec<String>,

    /// No effect, just for curl compatibility
    #[arg(long)]
    #[allow(dead_code, reason = "accepted for curl compatibility")]
    compressed: bool,

    /// User-Agent header
    #[arg(short = 'A', long)]
    user_agent: Option<String>,

    /// Origin header (empty to omit it)
    #[arg(short = 'O', long)]
    origin: Option<String>,

    /// Additional headers file, one "Name: value" per line
    #[arg(short = 'F', long)]
    headers_file: Option<PathBuf>,

    /// Disable native ping/pong messages
    #[arg(long)]
    no_native_ping: bool,

    /// Native ping interval (seconds, 0 disables)
    #[arg(long, default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    ping_interval: u64,

    /// Hide native ping/pong messages
    #[arg(long)]
    hide_ping_pong: bool,

    /// Fake ping (0x1 opcode) interval (seconds, 0 disables)
    #[arg(long = "ping-0x1-interval", default_value_t = DEFAULT_FAKE_PING_INTERVAL_SECS)]
    ping_0x1_interval: u64,

    /// Fake ping (0x1 opcode) payload
    #[arg(long = "ping-0x1-payload")]
    ping_0x1_payload: Option<String>,

    /// Fake pong (0x1 opcode) payload
    #[arg(long = "pong-0x1-payload")]
    pong_0x1_payload: Option<String>,

    /// Hide fake ping/pong messages
    #[arg(long = "hide-0x1-ping-pong")]
    hide_0x1_ping_pong: bool,

    /// HTTP proxy address (e.g. 127.0.0.1:8080)
    #[arg(short = 'p', long)]
    http_proxy: Option<String>,

    /// Reconnect interval (seconds)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RECONNECT_SECS)]
    reconnect_interval: u64,

    /// Send the messages from this file on connect
    #[arg(short = 'I', long)]
    initial_messages: Option<PathBuf>,

    /// Lua plugin file to load
    #[arg(short = 'P', long)]
    plugin: Option<PathBuf>,

    /// Take the WebSocket URL from the plugin
    #[arg(long)]
    plugin_provided_url: bool,

    /// Verbosity level 1-4: errors, warnings, info (default), debug
    #[arg(short = 'v', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=4))]
    verbose: u8,

    /// Print rows to stdout and send stdin lines instead of the terminal interface
    #[arg(long)]
    headless: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            url: self.url.or(self.url_positional),
            plugin_provided_url: self.plugin_provided_url,
            headers: self.headers,
            cookies: self.cookies,
            user_agent: self.user_agent,
            origin: self.origin,
            headers_file: self.headers_file,
            ping_interval: if self.no_native_ping {
                0
            } else {
                self.ping_interval
            },
            hide_ping_pong: self.hide_ping_pong,
            fake_ping_interval: self.ping_0x1_interval,
            fake_ping_payload: self.ping_0x1_payload,
            fake_pong_payload: self.pong_0x1_payload,
            hide_fake_ping_pong: self.hide_0x1_ping_pong,
            proxy: self.http_proxy,
            verify_tls: !self.insecure,
            reconnect_interval: self.reconnect_interval,
            initial_messages: self.initial_messages,
            plugin: self.plugin,
            verbosity: self.verbose,
            strict_plugins: std::env::var("WSREPL_LUA_STRICT").is_ok_and(|v| v == "1"),
        }
    }
}

/// Set up a panic hook that logs the panic and restores the terminal.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        tui::restore_terminal();
        default_hook(panic_info);
    }));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let headless = cli.headless;
    let history_sink = logging::init(cli.verbose)?;
    install_panic_hook();

    let mut config = cli.into_config();
    config.validate()?;

    // Plugin problems are configuration errors: fail before connecting.
    let mut plugin = load_plugin(config.plugin.as_deref())?;
    let mut seed = PluginSeed::default();
    plugin
        .init(&mut seed)
        .with_context(|| format!("Plugin {} failed to initialise", plugin.name()))?;

    let url = config.resolve_url(seed.url.as_deref())?;
    let options = ConnectOptions {
        headers: build_headers(&config, &url)?,
        url,
        proxy: config.proxy.clone(),
        verify_tls: config.verify_tls,
    };
    log::info!("wsrepl v{VERSION} connecting to {}", options.url);
    let transport =
        WebSocketTransport::new(options, Duration::from_secs(config.reconnect_interval));

    let (marshal, queue) = Marshal::channel();
    history_sink.attach(marshal.clone());

    let session = Session {
        config,
        seed,
        plugin,
        transport,
        marshal: marshal.clone(),
        queue,
    };

    if headless {
        let gate = InputGate::new();
        spawn_stdin_reader(marshal, gate.clone())?;
        session.run(ConsoleSurface::new(std::io::stdout(), gate, MAX_HISTORY_ROWS))
    } else {
        let (surface, tui_handle) = tui::spawn_tui(marshal, MAX_HISTORY_ROWS)?;
        // The dispatcher owns the surface; once it is gone the interface exits.
        let result = session.run(surface);
        tui_handle
            .join()
            .map_err(|_| anyhow!("TUI thread panicked"))??;
        result
    }
}

/// Everything the dispatcher needs besides its display surface.
struct Session {
    config: Config,
    seed: PluginSeed,
    plugin: Box<dyn Plugin>,
    transport: WebSocketTransport,
    marshal: Marshal,
    queue: mpsc::UnboundedReceiver<DispatchTask>,
}

impl Session {
    /// Build the dispatcher, start the connection and drain the queue on
    /// this thread until shutdown.
    fn run<D: DisplaySurface>(self, surface: D) -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;

        let mut dispatcher =
            Dispatcher::new(&self.config, self.seed, self.plugin, self.transport, surface)?;
        dispatcher.start(&self.marshal)?;
        rt.block_on(dispatcher.run(self.queue))
    }
}

/// Send stdin lines while the connection is up.
fn spawn_stdin_reader(marshal: Marshal, gate: InputGate) -> Result<()> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("Failed to read stdin: {e}");
                        break;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                if gate.is_open() {
                    marshal.send_str(line);
                } else {
                    marshal.log(Message::warning(format!("Not connected, dropped: {line}")));
                }
            }
            log::debug!("stdin closed");
        })
        .context("Failed to spawn stdin reader")?;
    Ok(())
}
