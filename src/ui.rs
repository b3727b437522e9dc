//! Interactive terminal front end
//!
//! Renders the controller's state and forwards keys to it:
//! - type + Enter to ask (input is locked while an answer is pending)
//! - Tab to move into the history list, Up/Down to pick, Enter to replay
//! - Esc to quit

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io;
use std::time::Duration;
use unicode_width::UnicodeWidthChar;

use patentqa::{HistoryEntry, QueryController, SessionState};

// ═══════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════

/// Which pane receives keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Input,
    History,
}

/// View-only state; everything else lives in the controller
struct TuiState {
    focus: Focus,
    /// Index into the newest-first history list
    highlighted: usize,
    tick: usize,
}

impl TuiState {
    fn new() -> Self {
        Self {
            focus: Focus::Input,
            highlighted: 0,
            tick: 0,
        }
    }
}

/// Snapshot taken once per frame
struct View {
    session: SessionState,
    /// Newest first
    history: Vec<HistoryEntry>,
}

impl View {
    fn capture(controller: &QueryController) -> Self {
        let mut history = controller.history();
        history.reverse();
        Self {
            session: controller.state(),
            history,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// MAIN TUI
// ═══════════════════════════════════════════════════════════════

/// Run the interactive UI until Esc
pub async fn run_tui(controller: &QueryController, endpoint: &str) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let result = run_tui_loop(&mut terminal, controller, endpoint).await;
    restore_terminal(terminal)?;
    result
}

async fn run_tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    controller: &QueryController,
    endpoint: &str,
) -> Result<()> {
    let mut state = TuiState::new();
    tracing::info!(endpoint, "interactive session started");

    loop {
        state.tick += 1;
        let view = View::capture(controller);

        if view.history.is_empty() {
            state.focus = Focus::Input;
            state.highlighted = 0;
        } else if state.highlighted >= view.history.len() {
            state.highlighted = view.history.len() - 1;
        }

        terminal.draw(|f| render_tui(f, &state, &view, endpoint))?;

        if !event::poll(Duration::from_millis(50))? {
            // Let the exchange task make progress between frames.
            tokio::task::yield_now().await;
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Esc => break,
            KeyCode::Tab => {
                state.focus = match state.focus {
                    Focus::Input if !view.history.is_empty() => Focus::History,
                    _ => Focus::Input,
                };
                continue;
            }
            _ => {}
        }

        match state.focus {
            Focus::Input => handle_input_key(controller, &view, key.code),
            Focus::History => {
                if handle_history_key(controller, &mut state, &view, key.code) {
                    state.focus = Focus::Input;
                }
            }
        }
    }

    tracing::info!("interactive session ended");
    Ok(())
}

fn handle_input_key(controller: &QueryController, view: &View, code: KeyCode) {
    match code {
        KeyCode::Enter => {
            if let Err(reason) = controller.submit_current() {
                tracing::debug!(%reason, "submission ignored");
            }
        }
        KeyCode::Char(c) => {
            let mut text = view.session.query_text.clone();
            text.push(c);
            controller.edit(&text);
        }
        KeyCode::Backspace => {
            let mut text = view.session.query_text.clone();
            if text.pop().is_some() {
                controller.edit(&text);
            }
        }
        _ => {}
    }
}

/// Returns true when an entry was replayed
fn handle_history_key(
    controller: &QueryController,
    state: &mut TuiState,
    view: &View,
    code: KeyCode,
) -> bool {
    match code {
        KeyCode::Up => {
            state.highlighted = state.highlighted.saturating_sub(1);
            false
        }
        KeyCode::Down => {
            state.highlighted = (state.highlighted + 1).min(view.history.len().saturating_sub(1));
            false
        }
        KeyCode::Enter => view
            .history
            .get(state.highlighted)
            .map(|entry| controller.select_entry(entry.id))
            .unwrap_or(false),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════

fn render_tui(f: &mut Frame, state: &TuiState, view: &View, endpoint: &str) {
    let area = f.size();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),    // Answer + history
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
        .split(rows[0]);

    render_answer(f, state, view, columns[0]);
    render_history(f, state, view, columns[1]);

    // Input
    let session = &view.session;
    let (input_style, input_title) = if session.is_loading {
        (Style::default().fg(Color::DarkGray), "Waiting for answer...")
    } else if state.focus == Focus::Input {
        (Style::default(), "Ask about patents (Enter to send)")
    } else {
        (Style::default().fg(Color::DarkGray), "Ask about patents")
    };
    let input = Paragraph::new(session.query_text.as_str())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input, rows[1]);

    // Status bar
    let status = format!(
        " {} | {} | Tab:history Enter:send/replay Esc:quit",
        if session.is_loading { spinner_char(state.tick) } else { ' ' },
        endpoint,
    );
    let status = Paragraph::new(status).style(Style::default().fg(Color::DarkGray));
    f.render_widget(status, rows[2]);
}

fn render_answer(f: &mut Frame, state: &TuiState, view: &View, area: Rect) {
    let session = &view.session;
    let title = match session.selected_entry_id {
        Some(id) => format!("Answer (history {})", id),
        None => "Answer".to_string(),
    };

    let para = if let Some(error) = &session.error {
        Paragraph::new(error.message.as_str()).style(Style::default().fg(Color::Red))
    } else if session.is_loading {
        Paragraph::new(format!("{} Asking the backend...", spinner_char(state.tick)))
            .style(Style::default().fg(Color::Yellow))
    } else if session.response_text.is_empty() {
        Paragraph::new("Type a question about patents and press Enter.")
            .style(Style::default().fg(Color::DarkGray))
    } else {
        let mut lines = Vec::new();
        if session.selected_entry_id.is_some() {
            lines.push(Line::styled(
                format!("> {}", session.query_text),
                Style::default().fg(Color::Cyan),
            ));
            lines.push(Line::raw(""));
        }
        lines.push(Line::raw(session.response_text.as_str()));
        Paragraph::new(lines)
    };

    let para = para
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(para, area);
}

fn render_history(f: &mut Frame, state: &TuiState, view: &View, area: Rect) {
    // Borders plus the timestamp column
    let width = (area.width as usize).saturating_sub(2 + 9 + 2);

    let items: Vec<ListItem> = view
        .history
        .iter()
        .map(|entry| {
            let line = Line::from(vec![
                Span::styled(
                    format!("{} ", entry.timestamp),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw(truncate_to_width(&entry.query, width)),
            ]);
            ListItem::new(line)
        })
        .collect();

    let border_style = if state.focus == Focus::History {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(format!("History ({})", view.history.len())),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut list_state = ListState::default();
    if state.focus == Focus::History && !view.history.is_empty() {
        list_state.select(Some(state.highlighted));
    }
    f.render_stateful_widget(list, area, &mut list_state);
}

/// Cut `text` to at most `width` terminal columns, marking the cut with `…`
fn truncate_to_width(text: &str, width: usize) -> String {
    let text = text.replace('\n', " ");
    let total: usize = text.chars().filter_map(|c| c.width()).sum();
    if total <= width {
        return text;
    }
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width - 1 {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

fn spinner_char(tick: usize) -> char {
    const SPINNER: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
    SPINNER[tick % SPINNER.len()]
}

// ═══════════════════════════════════════════════════════════════
// TERMINAL SETUP
// ═══════════════════════════════════════════════════════════════

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
