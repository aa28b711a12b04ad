use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph},
    Terminal,
};
use std::io;

use crate::{
    accounts::describe,
    identity::AccountName,
    manager::{AccountManager, ListResponse, SwitchOptions, SwitchOutcome},
};

// ── State machine ─────────────────────────────────────────────────────────────

enum Mode {
    Normal,
    ConfirmSwitch { name: String, detail: String },
    NewAccount { input: String },
    /// A new instance is running; `quit_after` closes the picker on the next key.
    Done { message: String, quit_after: bool },
}

struct Flash {
    message: String,
    is_error: bool,
}

struct App<'a> {
    manager: &'a AccountManager,
    listing: ListResponse,
    selected: usize,
    mode: Mode,
    flash: Option<Flash>,
    quit: bool,
}

impl<'a> App<'a> {
    fn new(manager: &'a AccountManager) -> Self {
        let listing = manager.list();
        let selected = listing
            .current
            .as_ref()
            .and_then(|cur| listing.accounts.iter().position(|a| &a.name == cur))
            .unwrap_or(0);
        App {
            manager,
            listing,
            selected,
            mode: Mode::Normal,
            flash: None,
            quit: false,
        }
    }

    fn reload(&mut self) {
        self.listing = self.manager.list();
        if !self.listing.accounts.is_empty() && self.selected >= self.listing.accounts.len() {
            self.selected = self.listing.accounts.len() - 1;
        }
    }

    fn is_current(&self, name: &AccountName) -> bool {
        self.listing.current.as_ref() == Some(name)
    }

    /// Run a switch and move to the matching mode. With `close_current` the
    /// picker quits on the next key.
    fn switch(&mut self, name: &str, close_current: bool) {
        match self.manager.switch(name, SwitchOptions { close_current }) {
            SwitchOutcome::Switched(done) => {
                // The picker closes itself so the terminal is restored first.
                if let Some(exit) = &done.pending_exit {
                    exit.cancel();
                }
                self.reload();
                let mut message = format!("Opened {} (pid {})", done.account, done.pid);
                if let Some(warning) = done.synced.warning {
                    message.push_str(&format!("  ·  {warning}"));
                }
                self.mode = Mode::Done {
                    message,
                    quit_after: done.closed_current,
                };
            }
            SwitchOutcome::Failed(err) => {
                self.mode = Mode::Normal;
                self.flash = Some(Flash {
                    message: format!("Switch failed: {err}"),
                    is_error: true,
                });
            }
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

pub fn run(manager: &AccountManager) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, crossterm::cursor::Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, manager);

    // Always restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    terminal.show_cursor()?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    manager: &AccountManager,
) -> Result<()> {
    let mut app = App::new(manager);

    loop {
        terminal.draw(|f| ui(f, &mut app))?;

        if app.quit {
            break;
        }

        if !event::poll(std::time::Duration::from_millis(250))? {
            continue;
        }

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                break;
            }

            match &app.mode {
                Mode::Normal => handle_normal(&mut app, key.code),
                Mode::ConfirmSwitch { .. } => handle_confirm(&mut app, key.code),
                Mode::NewAccount { .. } => handle_input(&mut app, key.code),
                Mode::Done { quit_after, .. } => {
                    if *quit_after {
                        app.quit = true;
                    } else {
                        app.mode = Mode::Normal;
                    }
                }
            }
        }
    }
    Ok(())
}

// ── Key handlers ──────────────────────────────────────────────────────────────

fn handle_normal(app: &mut App, key: KeyCode) {
    app.flash = None;
    match key {
        KeyCode::Up | KeyCode::Char('k') => {
            app.selected = app.selected.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if app.selected + 1 < app.listing.accounts.len() {
                app.selected += 1;
            }
        }
        KeyCode::Enter | KeyCode::Char(' ') => {
            if let Some(info) = app.listing.accounts.get(app.selected) {
                if app.is_current(&info.name) {
                    app.flash = Some(Flash {
                        message: "Already the current account".to_string(),
                        is_error: false,
                    });
                } else {
                    app.mode = Mode::ConfirmSwitch {
                        name: info.name.to_string(),
                        detail: describe(info),
                    };
                }
            }
        }
        KeyCode::Char('n') => {
            app.mode = Mode::NewAccount {
                input: String::new(),
            };
        }
        KeyCode::Char('r') => app.reload(),
        KeyCode::Char('q') | KeyCode::Esc => {
            app.quit = true;
        }
        _ => {}
    }
}

fn handle_confirm(app: &mut App, key: KeyCode) {
    let Mode::ConfirmSwitch { name, .. } = &app.mode else {
        return;
    };
    let name = name.clone();
    match key {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => app.switch(&name, false),
        KeyCode::Char('c') | KeyCode::Char('C') => app.switch(&name, true),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
            app.mode = Mode::Normal;
            app.flash = Some(Flash {
                message: "Cancelled".to_string(),
                is_error: false,
            });
        }
        _ => {}
    }
}

fn handle_input(app: &mut App, key: KeyCode) {
    let Mode::NewAccount { input } = &mut app.mode else {
        return;
    };
    match key {
        KeyCode::Char(ch) => input.push(ch),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Enter => {
            let raw = std::mem::take(input);
            match AccountName::sanitize(&raw) {
                Some(name) => app.switch(name.as_str(), false),
                None => {
                    app.mode = Mode::Normal;
                    app.flash = Some(Flash {
                        message: "Account name must contain letters or digits".to_string(),
                        is_error: true,
                    });
                }
            }
        }
        KeyCode::Esc => {
            app.mode = Mode::Normal;
        }
        _ => {}
    }
}

// ── UI rendering ──────────────────────────────────────────────────────────────

fn ui(f: &mut ratatui::Frame, app: &mut App) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // header
            Constraint::Min(3),    // account list
            Constraint::Length(3), // help bar
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_list(f, app, chunks[1]);
    render_help(f, app, chunks[2]);

    match &app.mode {
        Mode::ConfirmSwitch { name, detail } => {
            render_dialog(
                f,
                area,
                "Switch Account",
                vec![
                    Line::from(Span::styled(
                        format!("   Open {name} in a new window?"),
                        Style::default()
                            .fg(Color::White)
                            .add_modifier(Modifier::BOLD),
                    )),
                    Line::from(Span::styled(
                        format!("   {detail}"),
                        Style::default().fg(Color::Yellow),
                    )),
                    Line::from(""),
                    Line::from(vec![
                        Span::styled(
                            "   [y] open",
                            Style::default()
                                .fg(Color::Green)
                                .add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(
                            "   [c] open & close picker",
                            Style::default().fg(Color::Cyan),
                        ),
                        Span::styled("   [n] cancel", Style::default().fg(Color::DarkGray)),
                    ]),
                ],
                Color::Yellow,
            );
        }
        Mode::NewAccount { input } => {
            let preview = AccountName::sanitize(input)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "(invalid)".to_string());
            render_dialog(
                f,
                area,
                "New Account",
                vec![
                    Line::from(Span::styled(
                        format!("   Name: {input}▏"),
                        Style::default()
                            .fg(Color::White)
                            .add_modifier(Modifier::BOLD),
                    )),
                    Line::from(Span::styled(
                        format!("   Folder: {preview}"),
                        Style::default().fg(Color::DarkGray),
                    )),
                    Line::from(""),
                    Line::from(Span::styled(
                        "   [↵] create & open      [Esc] cancel",
                        Style::default().fg(Color::Green),
                    )),
                ],
                Color::Cyan,
            );
        }
        _ => {}
    }
}

fn render_header(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let current = app
        .listing
        .current
        .as_ref()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "default".to_string());
    let root = app
        .listing
        .root
        .as_ref()
        .map(|r| r.display().to_string())
        .unwrap_or_else(|| "unavailable".to_string());

    let block = Block::default()
        .title(" codex-accounts ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Cyan));

    let text = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("  Current: ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                current,
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("  Root:    ", Style::default().fg(Color::DarkGray)),
            Span::styled(root, Style::default().fg(Color::DarkGray)),
        ]),
    ])
    .block(block);

    f.render_widget(text, area);
}

fn render_list(f: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let account_count = app.listing.accounts.len();
    let title = if account_count == 1 {
        " 1 account ".to_string()
    } else {
        format!(" {} accounts ", account_count)
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray));

    if app.listing.accounts.is_empty() {
        let text = Paragraph::new(Line::from(vec![Span::styled(
            "  No accounts yet. Press [n] to create one.",
            Style::default().fg(Color::DarkGray),
        )]))
        .block(block);
        f.render_widget(text, area);
        return;
    }

    let items: Vec<ListItem> = app
        .listing
        .accounts
        .iter()
        .map(|info| {
            let is_current = app.is_current(&info.name);
            let (marker, color) = if is_current {
                ("  ▶  ", Color::Green)
            } else {
                ("     ", Color::White)
            };

            let mut name_style = Style::default().fg(color);
            if is_current {
                name_style = name_style.add_modifier(Modifier::BOLD);
            }

            let mut spans = vec![
                Span::styled(marker, Style::default().fg(Color::Green)),
                Span::styled(info.name.to_string(), name_style),
            ];
            let detail = describe(info);
            if !detail.is_empty() {
                spans.push(Span::styled(
                    format!("  {detail}"),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            if !info.has_auth {
                spans.push(Span::styled(
                    "  [no auth]",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::DIM),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Rgb(40, 40, 60))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("");

    let mut list_state = ListState::default();
    list_state.select(Some(app.selected));

    f.render_stateful_widget(list, area, &mut list_state);
}

fn render_help(f: &mut ratatui::Frame, app: &App, area: Rect) {
    let (content, border) = match (&app.mode, &app.flash) {
        (Mode::Done { message, quit_after }, _) => {
            let hint = if *quit_after {
                "  ·  [any key] quit"
            } else {
                "  ·  [any key] continue"
            };
            (
                Line::from(vec![
                    Span::styled(
                        "  ✓ ",
                        Style::default()
                            .fg(Color::Green)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(message.clone(), Style::default().fg(Color::Green)),
                    Span::styled(hint, Style::default().fg(Color::Green)),
                ]),
                Color::Green,
            )
        }
        (_, Some(flash)) => {
            let color = if flash.is_error {
                Color::Red
            } else {
                Color::Green
            };
            let icon = if flash.is_error { "✗" } else { "✓" };
            (
                Line::from(vec![
                    Span::styled(
                        format!("  {}  ", icon),
                        Style::default().fg(color).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(flash.message.clone(), Style::default().fg(color)),
                ]),
                Color::DarkGray,
            )
        }
        _ => (
            Line::from(vec![Span::styled(
                "  ↑↓ nav  ·  ↵ open  ·  n new  ·  r refresh  ·  q quit",
                Style::default().fg(Color::DarkGray),
            )]),
            Color::DarkGray,
        ),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border));

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_dialog(
    f: &mut ratatui::Frame,
    area: Rect,
    title: &str,
    body: Vec<Line>,
    border_color: Color,
) {
    let dialog_width = 64u16;
    let dialog_height = 2 + 1 + body.len() as u16;

    let x = area.x + area.width.saturating_sub(dialog_width) / 2;
    let y = area.y + area.height.saturating_sub(dialog_height) / 2;

    let dialog_area = Rect {
        x,
        y,
        width: dialog_width.min(area.width),
        height: dialog_height.min(area.height),
    };

    f.render_widget(Clear, dialog_area);

    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border_color));

    let inner = block.inner(dialog_area);
    f.render_widget(block, dialog_area);

    let mut text = vec![Line::from("")];
    text.extend(body);

    let para = Paragraph::new(text).alignment(Alignment::Left);
    f.render_widget(para, inner);
}
