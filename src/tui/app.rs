//! Interactive state: history, row selection and the input line.
//!
//! Pure state with no terminal access, so key handling is tested directly.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tui_input::{Input, InputRequest};

use crate::display::{History, HistoryRow};
use crate::message::Message;

/// Update sent from the dispatcher to the interface thread.
#[derive(Debug, Clone)]
pub enum UiUpdate {
    /// Append a row.
    Message(Message),
    /// Open or close the input line.
    InputEnabled(bool),
}

/// What a key press asks the runner to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Nothing beyond redrawing.
    None,
    /// Send this text through the dispatcher.
    Send(String),
    /// Leave the interface.
    Quit,
}

/// Interface state.
#[derive(Debug)]
pub struct App {
    history: History,
    /// Selected row position, `None` only while the history is empty.
    selected: Option<usize>,
    /// Keep the newest row selected as rows arrive.
    follow: bool,
    input: Input,
    input_enabled: bool,
    page_size: usize,
}

impl App {
    /// Empty state keeping at most `max_rows` rows.
    #[must_use]
    pub fn new(max_rows: usize) -> Self {
        Self {
            history: History::new(max_rows),
            selected: None,
            follow: true,
            input: Input::default(),
            input_enabled: false,
            page_size: 10,
        }
    }

    /// Apply a dispatcher update.
    pub fn apply(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::Message(message) => self.push(message),
            UiUpdate::InputEnabled(enabled) => self.input_enabled = enabled,
        }
    }

    fn push(&mut self, message: Message) {
        let before = self.history.len();
        self.history.push(message);
        let dropped = self.history.len() == before;

        if self.follow {
            self.selected = Some(self.history.len() - 1);
        } else if dropped {
            self.selected = self.selected.map(|s| s.saturating_sub(1));
        }
    }

    /// Rows per PageUp/PageDown, set from the visible list height.
    pub fn set_page_size(&mut self, rows: usize) {
        self.page_size = rows.max(1);
    }

    /// Handle one key press.
    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => return AppAction::Quit,
            KeyCode::Esc => return AppAction::Quit,
            KeyCode::Enter => return self.submit(),
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-page_delta(self.page_size)),
            KeyCode::PageDown => self.move_selection(page_delta(self.page_size)),
            KeyCode::Home => self.select_first(),
            KeyCode::End => self.select_last(),
            _ => {
                if let Some(request) = input_request(key) {
                    self.input.handle(request);
                }
            }
        }
        AppAction::None
    }

    fn submit(&mut self) -> AppAction {
        if !self.input_enabled || self.input.value().is_empty() {
            return AppAction::None;
        }
        let text = self.input.value().to_string();
        self.input.reset();
        AppAction::Send(text)
    }

    fn move_selection(&mut self, delta: isize) {
        let Some(last) = self.history.len().checked_sub(1) else {
            return;
        };
        let current = self.selected.unwrap_or(last);
        let next = current.saturating_add_signed(delta).min(last);
        self.selected = Some(next);
        self.follow = next == last;
    }

    fn select_first(&mut self) {
        if !self.history.is_empty() {
            self.selected = Some(0);
            self.follow = self.history.len() == 1;
        }
    }

    fn select_last(&mut self) {
        self.selected = self.history.len().checked_sub(1);
        self.follow = true;
    }

    /// Rows shown so far.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Selected position.
    #[must_use]
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Selected row.
    #[must_use]
    pub fn selected_row(&self) -> Option<&HistoryRow> {
        self.selected.and_then(|s| self.history.get(s))
    }

    /// Whether new rows move the selection.
    #[must_use]
    pub fn is_following(&self) -> bool {
        self.follow
    }

    /// Input line state.
    #[must_use]
    pub fn input(&self) -> &Input {
        &self.input
    }

    /// Whether sending is allowed.
    #[must_use]
    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }
}

fn page_delta(page: usize) -> isize {
    isize::try_from(page).unwrap_or(isize::MAX)
}

/// Map editing keys to input line requests.
fn input_request(key: KeyEvent) -> Option<InputRequest> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    Some(match key.code {
        KeyCode::Char('a') if ctrl => InputRequest::GoToStart,
        KeyCode::Char('e') if ctrl => InputRequest::GoToEnd,
        KeyCode::Char('u') if ctrl => InputRequest::DeleteLine,
        KeyCode::Char('w') if ctrl => InputRequest::DeletePrevWord,
        KeyCode::Char(_) if ctrl => return None,
        KeyCode::Char(c) => InputRequest::InsertChar(c),
        KeyCode::Backspace => InputRequest::DeletePrevChar,
        KeyCode::Delete => InputRequest::DeleteNextChar,
        KeyCode::Left => InputRequest::GoToPrevChar,
        KeyCode::Right => InputRequest::GoToNextChar,
        _ => return None,
    })
}
