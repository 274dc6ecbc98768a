//! Frame rendering.
//!
//! ```text
//! ┌ History ───────────────────────────────┐
//! │    41 12:00:01 0x1 > {"type":"ping"}   │
//! │ >  42 12:00:01 0x1 < {"type":"pong"}   │
//! └────────────────────────────────────────┘
//! ┌ Details #42 ───────────────────────────┐
//! │ {                                      │
//! │     "type": "pong"                     │
//! │ }                                      │
//! └────────────────────────────────────────┘
//! ┌ Input ─────────────────────────────────┐
//! │ _                                      │
//! └────────────────────────────────────────┘
//! ```

use std::ops::Range;

use ratatui::{
    layout::{Constraint, Direction as LayoutDirection, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::message::Direction;

use super::app::App;

/// Split the frame into history, details and input areas.
#[must_use]
pub fn layout(area: Rect) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage(60),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(area);
    [chunks[0], chunks[1], chunks[2]]
}

/// Rows of a `len`-row list to draw in `height` lines so that `selected`
/// is visible.
#[must_use]
pub fn visible_window(len: usize, selected: Option<usize>, height: usize) -> Range<usize> {
    if len <= height {
        return 0..len;
    }
    let selected = selected.unwrap_or(len - 1).min(len - 1);
    let end = (selected + 1).max(height);
    end - height..end
}

fn direction_style(direction: Direction) -> Style {
    match direction {
        Direction::Incoming => Style::default().fg(Color::Green),
        Direction::Outgoing => Style::default().fg(Color::Cyan),
        Direction::Debug => Style::default().add_modifier(Modifier::DIM),
        Direction::Info => Style::default().fg(Color::Blue),
        Direction::Warning => Style::default().fg(Color::Yellow),
        Direction::Error => Style::default().fg(Color::Red),
    }
}

/// Draw the whole interface.
pub fn render(f: &mut Frame<'_>, app: &mut App) {
    let [history_area, detail_area, input_area] = layout(f.area());
    // Borders take two lines.
    app.set_page_size(usize::from(history_area.height.saturating_sub(2)));

    render_history(f, app, history_area);
    render_details(f, app, detail_area);
    render_input(f, app, input_area);
}

fn render_history(f: &mut Frame<'_>, app: &App, area: Rect) {
    let height = usize::from(area.height.saturating_sub(2));
    let history = app.history();
    let window = visible_window(history.len(), app.selected(), height);

    let items: Vec<ListItem<'_>> = window
        .clone()
        .filter_map(|position| history.get(position))
        .map(|row| ListItem::new(row.format_line()).style(direction_style(row.message.direction())))
        .collect();

    let title = if app.is_following() {
        " History ".to_string()
    } else {
        format!(" History ({} rows, scrolled) ", history.len())
    };

    let mut state = ListState::default();
    state.select(app.selected().map(|s| s.saturating_sub(window.start)));

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED))
        .highlight_symbol("> ");
    f.render_stateful_widget(list, area, &mut state);
}

fn render_details(f: &mut Frame<'_>, app: &App, area: Rect) {
    let (title, body) = match app.selected_row() {
        Some(row) => (
            format!(
                " Details #{} {} {} ",
                row.index,
                row.message.direction().as_str(),
                row.message.opcode_hex()
            ),
            row.message.long_view(),
        ),
        None => (" Details ".to_string(), String::new()),
    };
    let widget = Paragraph::new(body)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    f.render_widget(widget, area);
}

fn render_input(f: &mut Frame<'_>, app: &App, area: Rect) {
    let input = app.input();
    let width = usize::from(area.width.saturating_sub(2));
    let scroll = input.visual_scroll(width);

    let (title, style) = if app.input_enabled() {
        (" Input ", Style::default())
    } else {
        (
            " Input (disconnected) ",
            Style::default().add_modifier(Modifier::DIM),
        )
    };
    let widget = Paragraph::new(input.value())
        .style(style)
        .scroll((0, u16::try_from(scroll).unwrap_or(u16::MAX)))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);

    let offset = input.visual_cursor().saturating_sub(scroll);
    f.set_cursor_position(Position::new(
        area.x + 1 + u16::try_from(offset).unwrap_or(0),
        area.y + 1,
    ));
}
