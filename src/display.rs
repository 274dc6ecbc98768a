//! Display surfaces.
//!
//! The dispatcher hands every visible message to a [`DisplaySurface`] and
//! gates interactive sending through it. Two surfaces exist: the ratatui
//! interface in [`crate::tui`] and the line-oriented [`ConsoleSurface`]
//! used with `--headless`.
//!
//! Row numbering lives in [`History`], the row store both surfaces use.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::message::Message;

/// Where the dispatcher sends visible rows.
pub trait DisplaySurface {
    /// Append one row.
    fn add_message(&mut self, message: Message);

    /// Allow interactive sending (connected).
    fn enable_input(&mut self);

    /// Block interactive sending (disconnected).
    fn disable_input(&mut self);
}

impl<D: DisplaySurface + ?Sized> DisplaySurface for Box<D> {
    fn add_message(&mut self, message: Message) {
        (**self).add_message(message);
    }

    fn enable_input(&mut self) {
        (**self).enable_input();
    }

    fn disable_input(&mut self) {
        (**self).disable_input();
    }
}

/// One displayed message with its position and arrival time.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    /// Display index, counting from 1 for the session.
    pub index: u64,
    /// When the row was added.
    pub time: DateTime<Local>,
    /// The message as it was when displayed.
    pub message: Message,
}

impl HistoryRow {
    /// Single-line form: index, time, opcode, direction sign, short view.
    #[must_use]
    pub fn format_line(&self) -> String {
        let short = self.message.short_view();
        format!(
            "{:>5} {} {:>3} {} {}",
            self.index,
            self.time.format("%H:%M:%S"),
            self.message.opcode_hex(),
            self.message.direction().sign(),
            first_line(&short),
        )
    }
}

fn first_line(text: &str) -> &str {
    text.split(['\r', '\n']).next().unwrap_or_default()
}

/// Bounded row store with its own display counter.
#[derive(Debug)]
pub struct History {
    rows: VecDeque<HistoryRow>,
    next_index: u64,
    max_rows: usize,
}

impl History {
    /// Empty history keeping at most `max_rows` rows.
    #[must_use]
    pub fn new(max_rows: usize) -> Self {
        Self {
            rows: VecDeque::new(),
            next_index: 1,
            max_rows: max_rows.max(1),
        }
    }

    /// Append a message, dropping the oldest row when full.
    pub fn push(&mut self, message: Message) -> &HistoryRow {
        self.push_at(message, Local::now())
    }

    /// Append a message with an explicit timestamp.
    pub fn push_at(&mut self, message: Message, time: DateTime<Local>) -> &HistoryRow {
        if self.rows.len() == self.max_rows {
            self.rows.pop_front();
        }
        let index = self.next_index;
        self.next_index += 1;
        self.rows.push_back(HistoryRow {
            index,
            time,
            message,
        });
        &self.rows[self.rows.len() - 1]
    }

    /// Number of rows kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows are kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row by position (0 = oldest kept).
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&HistoryRow> {
        self.rows.get(position)
    }

    /// Rows oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryRow> {
        self.rows.iter()
    }
}

/// Shared input gate for surfaces whose input runs on another thread.
#[derive(Debug, Clone, Default)]
pub struct InputGate(Arc<AtomicBool>);

impl InputGate {
    /// Closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open or close the gate.
    pub fn set(&self, open: bool) {
        self.0.store(open, Ordering::SeqCst);
    }

    /// Whether input may be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Line-oriented surface: one row per line on a writer (stdout).
#[derive(Debug)]
pub struct ConsoleSurface<W: Write> {
    out: W,
    history: History,
    gate: InputGate,
}

impl<W: Write> ConsoleSurface<W> {
    /// Surface writing to `out`, sharing `gate` with the input reader.
    pub fn new(out: W, gate: InputGate, max_rows: usize) -> Self {
        Self {
            out,
            history: History::new(max_rows),
            gate,
        }
    }

    /// Rows shown so far.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// The underlying writer.
    #[must_use]
    pub fn writer(&self) -> &W {
        &self.out
    }
}

impl<W: Write> DisplaySurface for ConsoleSurface<W> {
    fn add_message(&mut self, message: Message) {
        let line = self.history.push(message).format_line();
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            log::debug!(target: crate::logging::FILE_ONLY_TARGET, "[display] Console write failed: {e}");
        }
    }

    fn enable_input(&mut self) {
        self.gate.set(true);
    }

    fn disable_input(&mut self) {
        self.gate.set(false);
    }
}
