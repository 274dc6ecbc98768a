//! Process logging.
//!
//! Records go to a log file through `env_logger` (`RUST_LOG` filters it),
//! so the interactive surface is never written over. Records from this
//! crate and from Lua plugins (`lua` target) are also shown in the history
//! as log rows, filtered by the `--verbose` level:
//!
//! | verbose | rows shown |
//! |---|---|
//! | 1 | errors |
//! | 2 | + warnings |
//! | 3 | + info (default) |
//! | 4 | + debug |
//!
//! Records with the [`FILE_ONLY_TARGET`] target stay in the file. The
//! dispatcher uses it for rows it has already put in the history itself.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::constants::DEFAULT_LOG_FILE_NAME;
use crate::events::Marshal;
use crate::message::{Direction, Message};

/// Target for records that must not be forwarded to the history.
pub const FILE_ONLY_TARGET: &str = "history";

/// Target used by the Lua `log` table.
pub const LUA_TARGET: &str = "lua";

/// History level for a `--verbose` value.
#[must_use]
pub fn verbosity_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Log level of a log-direction row, `None` for traffic.
#[must_use]
pub fn direction_level(direction: Direction) -> Option<Level> {
    match direction {
        Direction::Incoming | Direction::Outgoing => None,
        Direction::Debug => Some(Level::Debug),
        Direction::Info => Some(Level::Info),
        Direction::Warning => Some(Level::Warn),
        Direction::Error => Some(Level::Error),
    }
}

/// Log file path: `WSREPL_LOG_FILE`, else the user cache directory, else
/// the temp directory.
#[must_use]
pub fn log_path() -> PathBuf {
    if let Ok(path) = std::env::var("WSREPL_LOG_FILE") {
        return PathBuf::from(path);
    }
    dirs::cache_dir()
        .map(|dir| dir.join("wsrepl"))
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_LOG_FILE_NAME)
}

/// Late-bound connection from the logger to the dispatcher queue.
///
/// Logging starts before the dispatcher exists; records logged before
/// [`HistorySink::attach`] only reach the file.
#[derive(Debug, Clone, Default)]
pub struct HistorySink(Arc<Mutex<Option<Marshal>>>);

impl HistorySink {
    /// Unattached sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding records to `marshal`.
    pub fn attach(&self, marshal: Marshal) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(marshal);
    }

    fn forward(&self, message: Message) {
        if let Some(marshal) = self.0.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            marshal.log(message);
        }
    }
}

/// `log` backend writing to the file logger and forwarding to the history.
#[derive(Debug)]
pub struct HistoryLogger {
    file: env_logger::Logger,
    history_level: LevelFilter,
    sink: HistorySink,
}

impl HistoryLogger {
    /// Wrap a file logger.
    #[must_use]
    pub fn new(file: env_logger::Logger, history_level: LevelFilter, sink: HistorySink) -> Self {
        Self {
            file,
            history_level,
            sink,
        }
    }

    fn forwards(&self, metadata: &Metadata<'_>) -> bool {
        let target = metadata.target();
        metadata.level() <= self.history_level
            && target != FILE_ONLY_TARGET
            && (target == LUA_TARGET || target.starts_with(env!("CARGO_CRATE_NAME")))
    }

    /// Most verbose level either destination wants.
    #[must_use]
    pub fn max_level(&self) -> LevelFilter {
        self.file.filter().max(self.history_level)
    }
}

impl Log for HistoryLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.file.enabled(metadata) || self.forwards(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.file.matches(record) {
            self.file.log(record);
        }
        if self.forwards(record.metadata()) {
            self.sink
                .forward(Message::log(record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {
        self.file.flush();
    }
}

/// Install the process logger.
///
/// Returns the sink to attach once the dispatcher queue exists.
pub fn init(verbosity: u8) -> Result<HistorySink> {
    let path = log_path();
    let log_file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create log file at {}", path.display()))?;
    let file = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .build();

    let sink = HistorySink::new();
    let logger = HistoryLogger::new(file, verbosity_filter(verbosity), sink.clone());
    let max_level = logger.max_level();
    log::set_boxed_logger(Box::new(logger)).context("Logger already installed")?;
    log::set_max_level(max_level);
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DispatchTask;

    fn logger(history_level: LevelFilter) -> (HistoryLogger, HistorySink) {
        let file = env_logger::Builder::new()
            .filter_level(LevelFilter::Off)
            .target(env_logger::Target::Pipe(Box::new(std::io::sink())))
            .build();
        let sink = HistorySink::new();
        (HistoryLogger::new(file, history_level, sink.clone()), sink)
    }

    fn record<'a>(level: Level, target: &'a str, args: std::fmt::Arguments<'a>) -> Record<'a> {
        Record::builder().level(level).target(target).args(args).build()
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(verbosity_filter(1), LevelFilter::Error);
        assert_eq!(verbosity_filter(2), LevelFilter::Warn);
        assert_eq!(verbosity_filter(3), LevelFilter::Info);
        assert_eq!(verbosity_filter(4), LevelFilter::Debug);
    }

    #[test]
    fn test_direction_levels() {
        assert_eq!(direction_level(Direction::Incoming), None);
        assert_eq!(direction_level(Direction::Warning), Some(Level::Warn));
    }

    #[test]
    fn test_forwards_crate_and_lua_records() {
        let (logger, sink) = logger(LevelFilter::Info);
        let (marshal, mut rx) = Marshal::channel();
        sink.attach(marshal);

        logger.log(&record(Level::Warn, "wsrepl::dispatcher", format_args!("careful")));
        logger.log(&record(Level::Info, LUA_TARGET, format_args!("from lua")));

        match rx.try_recv() {
            Ok(DispatchTask::Log { message, done }) => {
                assert_eq!(message.direction(), Direction::Warning);
                assert_eq!(message.payload(), "careful");
                assert!(done.is_none());
            }
            other => panic!("unexpected task: {other:?}"),
        }
        match rx.try_recv() {
            Ok(DispatchTask::Log { message, .. }) => assert_eq!(message.payload(), "from lua"),
            other => panic!("unexpected task: {other:?}"),
        }
    }

    #[test]
    fn test_filters_level_foreign_and_file_only_targets() {
        let (logger, sink) = logger(LevelFilter::Info);
        let (marshal, mut rx) = Marshal::channel();
        sink.attach(marshal);

        logger.log(&record(Level::Debug, "wsrepl::transport", format_args!("too verbose")));
        logger.log(&record(Level::Error, "tokio_tungstenite", format_args!("foreign")));
        logger.log(&record(Level::Error, FILE_ONLY_TARGET, format_args!("already shown")));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_interface_lifecycle_stays_out_of_history_at_debug() {
        let (logger, sink) = logger(LevelFilter::Debug);
        let (marshal, mut rx) = Marshal::channel();
        sink.attach(marshal);

        logger.log(&record(Level::Debug, FILE_ONLY_TARGET, format_args!("[tui] Event loop starting")));
        logger.log(&record(Level::Debug, FILE_ONLY_TARGET, format_args!("[tui] Event loop exiting")));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unattached_sink_drops_records() {
        let (logger, _sink) = logger(LevelFilter::Debug);
        logger.log(&record(Level::Error, "wsrepl", format_args!("nowhere to go")));
    }

    #[test]
    fn test_log_path_from_env() {
        // Only read here; other tests do not depend on it.
        if let Ok(path) = std::env::var("WSREPL_LOG_FILE") {
            assert_eq!(log_path(), PathBuf::from(path));
        } else {
            assert!(log_path().ends_with(DEFAULT_LOG_FILE_NAME));
        }
    }
}
