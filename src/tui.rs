use std::fs;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AppPaths;
use crate::errors::{ClothError, Result};
use crate::gallery::{GalleryQuery, parse_size_range};
use crate::repository::{ChangeEvent, ClothRepository};
use crate::storage::models::{ClothItem, MAX_MEMO_CHARS, TagData};
use crate::storage::sqlite::SqliteStorage;
use crate::watcher;

type Repo = ClothRepository<SqliteStorage>;

/// UI state that survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelState {
    pub detail_open: bool,
}

impl Default for PanelState {
    fn default() -> Self {
        Self { detail_open: true }
    }
}

impl PanelState {
    /// Missing or unreadable state falls back to the default.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClothError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Size,
    Color,
    Category,
    Memo,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Size => "Size",
            Field::Color => "Color",
            Field::Category => "Category",
            Field::Memo => "Memo",
        }
    }

    fn current_value(self, item: &ClothItem) -> String {
        match self {
            Field::Size => item.tags.size.to_string(),
            Field::Color => item.tags.color.clone(),
            Field::Category => item.tags.category.clone(),
            Field::Memo => item.memo.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Edit {
    Tags(TagData),
    Memo(Option<String>),
}

/// Turns the text typed for `field` into the write to perform on `item`.
pub fn build_edit(item: &ClothItem, field: Field, input: &str) -> Result<Edit> {
    let mut tags = item.tags.clone();
    match field {
        Field::Size => {
            tags.size = input
                .trim()
                .parse()
                .map_err(|_| ClothError::InvalidInput(format!("\"{}\" is not a size", input.trim())))?;
        }
        Field::Color => tags.color = input.to_string(),
        Field::Category => tags.category = input.to_string(),
        Field::Memo => return Ok(Edit::Memo(Some(input.to_string()))),
    }
    Ok(Edit::Tags(tags))
}

#[derive(PartialEq)]
enum Mode {
    Normal,
    Search,
    CategoryFilter,
    SizeFilter,
    Edit(Field),
    ConfirmDelete(i64),
}

struct App {
    items: Vec<ClothItem>,
    list_state: ListState,
    mode: Mode,
    query: GalleryQuery,
    input: String,
    panel: PanelState,
    status: String,
    status_time: Option<Instant>,
    data_version: i64,
    should_quit: bool,
}

impl App {
    fn new(panel: PanelState) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        Self {
            items: Vec::new(),
            list_state,
            mode: Mode::Normal,
            query: GalleryQuery::default(),
            input: String::new(),
            panel,
            status: String::new(),
            status_time: None,
            data_version: 0,
            should_quit: false,
        }
    }

    fn set_status(&mut self, msg: String) {
        self.status = msg;
        self.status_time = Some(Instant::now());
    }

    fn selected(&self) -> Option<&ClothItem> {
        self.list_state.selected().and_then(|i| self.items.get(i))
    }

    fn select_by(&mut self, delta: isize) {
        if self.items.is_empty() {
            return;
        }
        let current = self.list_state.selected().unwrap_or(0) as isize;
        let new = (current + delta).clamp(0, self.items.len() as isize - 1) as usize;
        self.list_state.select(Some(new));
    }

    fn select_first(&mut self) {
        if !self.items.is_empty() {
            self.list_state.select(Some(0));
        }
    }

    fn select_last(&mut self) {
        if !self.items.is_empty() {
            self.list_state.select(Some(self.items.len() - 1));
        }
    }

    fn begin_input(&mut self, mode: Mode, initial: String) {
        self.mode = mode;
        self.input = initial;
        self.status.clear();
        self.status_time = None;
    }

    fn refresh(&mut self, repo: &Repo) {
        match self.query.fetch(repo) {
            Ok(items) => self.items = items,
            Err(e) => self.set_status(format!("Error: {e}")),
        }

        if self.items.is_empty() {
            self.list_state.select(None);
        } else if let Some(i) = self.list_state.selected() {
            if i >= self.items.len() {
                self.list_state.select(Some(self.items.len() - 1));
            }
        } else {
            self.list_state.select(Some(0));
        }
    }

    /// Refreshes when this process or another one changed the catalogue.
    fn sync_changes(&mut self, repo: &Repo, changes: &Receiver<ChangeEvent>) {
        let local = changes.try_iter().count() > 0;
        let remote = match repo.storage().data_version() {
            Ok(version) if version != self.data_version => {
                self.data_version = version;
                true
            }
            _ => false,
        };
        if local || remote {
            self.refresh(repo);
        }
    }

    fn start_edit(&mut self, field: Field) {
        let Some(item) = self.selected() else {
            return;
        };
        let initial = field.current_value(item);
        self.begin_input(Mode::Edit(field), initial);
    }

    /// On failure the list keeps showing the previous value.
    fn apply_edit(&mut self, repo: &Repo, field: Field) {
        let Some(item) = self.selected().cloned() else {
            return;
        };
        let result = build_edit(&item, field, &self.input).and_then(|edit| match edit {
            Edit::Tags(tags) => repo.update_tags(item.id, tags),
            Edit::Memo(memo) => repo.update_memo(item.id, memo),
        });
        match result {
            Ok(updated) => {
                self.set_status(format!("Updated {} of #{}", field.label().to_lowercase(), updated.id));
                if let Some(idx) = self.list_state.selected()
                    && let Some(slot) = self.items.get_mut(idx)
                {
                    *slot = updated;
                }
            }
            Err(e) => self.set_status(format!("Update failed: {e}")),
        }
        self.input.clear();
    }

    fn request_delete(&mut self) {
        let Some(id) = self.selected().map(|i| i.id) else {
            return;
        };
        self.mode = Mode::ConfirmDelete(id);
        self.set_status(format!("Delete #{id} and its photo? [y/n]"));
    }

    fn confirm_delete(&mut self, repo: &Repo, id: i64) {
        match repo.delete(id, true) {
            Ok(true) => self.set_status(format!("Deleted #{id}")),
            Ok(false) => self.set_status(format!("#{id} not found")),
            Err(e) => self.set_status(format!("Delete error: {e}")),
        }
    }

    fn apply_category_filter(&mut self, repo: &Repo) {
        self.query.set_category(Some(self.input.clone()));
        self.input.clear();
        self.refresh(repo);
    }

    fn apply_size_filter(&mut self, repo: &Repo) {
        if self.input.trim().is_empty() {
            self.query.clear_size_range();
        } else {
            match parse_size_range(&self.input) {
                Some((min, max)) => self.query.set_size_range(min, max),
                None => {
                    self.set_status(format!("\"{}\" is not a size range", self.input.trim()));
                    self.input.clear();
                    return;
                }
            }
        }
        self.input.clear();
        self.refresh(repo);
    }

    fn toggle_detail(&mut self, paths: &AppPaths) {
        self.panel.detail_open = !self.panel.detail_open;
        if let Err(e) = self.panel.save(&paths.ui_state_file) {
            warn!(error = %e, "could not save panel state");
        }
    }
}

fn format_age(dt: chrono::DateTime<Utc>) -> String {
    let dur = Utc::now() - dt;
    if dur.num_seconds() < 60 {
        "now".to_string()
    } else if dur.num_minutes() < 60 {
        format!("{}m", dur.num_minutes())
    } else if dur.num_hours() < 24 {
        format!("{}h", dur.num_hours())
    } else {
        format!("{}d", dur.num_days())
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{truncated}…")
    } else {
        truncated
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "—" } else { s }
}

// ── UI rendering ───────────────────────────────────────────────────

fn draw(frame: &mut Frame, app: &mut App, paths: &AppPaths) {
    let [title_area, body_area, help_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let watcher_info = match watcher::watcher_status(paths) {
        Ok(Some(pid)) => format!("watcher: running (pid {pid})"),
        _ => "watcher: off".to_string(),
    };
    let filters = app.query.describe();
    let filter_info = if filters.is_empty() {
        String::new()
    } else {
        format!(" — filter: {filters}")
    };
    let title = format!(
        " cloth-stock — {} items{filter_info} — {watcher_info} ",
        app.items.len()
    );
    frame.render_widget(
        Paragraph::new(title).style(Style::new().fg(Color::Black).bg(Color::Cyan)),
        title_area,
    );

    let (list_area, detail_area) = if app.panel.detail_open {
        let [list, detail] =
            Layout::horizontal([Constraint::Percentage(45), Constraint::Percentage(55)])
                .areas(body_area);
        (list, Some(detail))
    } else {
        (body_area, None)
    };

    let items: Vec<ListItem> = app
        .items
        .iter()
        .map(|item| {
            let memo_mark = if item.memo.is_some() { "✎" } else { " " };
            ListItem::new(format!(
                "{:>4} {:>4} {:<10} {:<12}{} {:>4}",
                item.id,
                item.tags.size,
                truncate_chars(or_dash(&item.tags.color), 10),
                truncate_chars(or_dash(&item.tags.category), 12),
                memo_mark,
                format_age(item.created_at)
            ))
        })
        .collect();

    let list_title = match app.mode {
        Mode::Search => format!("Search: {}_", app.input),
        Mode::CategoryFilter => format!("Category: {}_", app.input),
        Mode::SizeFilter => format!("Size range (min-max): {}_", app.input),
        _ => "Gallery".to_string(),
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(list_title))
        .highlight_style(
            Style::new()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");

    frame.render_stateful_widget(list, list_area, &mut app.list_state);

    if let Some(detail_area) = detail_area {
        draw_detail(frame, app, detail_area);
    }

    if let Some(t) = app.status_time
        && t.elapsed() > Duration::from_secs(3)
    {
        app.status.clear();
        app.status_time = None;
    }

    let help_text = match app.mode {
        Mode::Normal | Mode::ConfirmDelete(_) => {
            if app.status.is_empty() {
                " [q]uit [/]search [f]category [z]size [x]clear [s/c/K/m]edit [d]el [v]detail [r]efresh"
                    .to_string()
            } else {
                format!(" {} ", app.status)
            }
        }
        Mode::Search => " Type to search (live) · [Enter] done · [Esc] cancel".to_string(),
        Mode::CategoryFilter => " Exact category, empty clears · [Enter] apply · [Esc] cancel".to_string(),
        Mode::SizeFilter => " e.g. 90-110 or 100, empty clears · [Enter] apply · [Esc] cancel".to_string(),
        Mode::Edit(_) => " [Enter] save · [Esc] cancel".to_string(),
    };

    frame.render_widget(
        Paragraph::new(help_text).style(Style::new().fg(Color::Black).bg(Color::White)),
        help_area,
    );
}

fn draw_detail(frame: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let label = |s: &'static str| Span::styled(s, Style::new().fg(Color::DarkGray));

    let content = match app.selected() {
        Some(item) => {
            let mut lines = vec![
                Line::from(vec![label("ID:       "), Span::raw(item.id.to_string())]),
                Line::from(vec![label("Size:     "), Span::raw(item.tags.size.to_string())]),
                Line::from(vec![label("Color:    "), Span::raw(or_dash(&item.tags.color).to_string())]),
                Line::from(vec![label("Category: "), Span::raw(or_dash(&item.tags.category).to_string())]),
                Line::from(vec![
                    label("Added:    "),
                    Span::raw(item.created_at.format("%Y-%m-%d %H:%M").to_string()),
                ]),
                Line::from(vec![label("Photo:    "), Span::raw(item.image_path.clone())]),
                Line::raw("─────────────────────────"),
            ];
            match item.memo {
                Some(ref memo) => lines.extend(memo.lines().map(|l| Line::raw(l.to_string()))),
                None => lines.push(Line::styled("(no memo)", Style::new().fg(Color::DarkGray))),
            }
            lines
        }
        None => vec![Line::raw("No item selected")],
    };

    let (title, border_style) = match app.mode {
        Mode::Edit(Field::Memo) => {
            let used = app.input.chars().count();
            let style = if used > MAX_MEMO_CHARS {
                Style::new().fg(Color::White).bg(Color::Red)
            } else {
                Style::new()
            };
            (
                format!("Memo ({} left): {}_", MAX_MEMO_CHARS as i64 - used as i64, app.input),
                style,
            )
        }
        Mode::Edit(field) => (format!("{}: {}_", field.label(), app.input), Style::new()),
        _ => ("Detail".to_string(), Style::new()),
    };

    let detail = Paragraph::new(content)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(Span::styled(title, border_style)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(detail, area);
}

// ── Event handling ─────────────────────────────────────────────────

fn handle_event(app: &mut App, repo: &Repo, paths: &AppPaths) -> std::io::Result<()> {
    if !event::poll(Duration::from_millis(250))? {
        return Ok(());
    }

    let Event::Key(key) = event::read()? else {
        return Ok(());
    };
    if key.kind != KeyEventKind::Press {
        return Ok(());
    }

    match app.mode {
        Mode::Normal => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down => app.select_by(1),
            KeyCode::Char('k') | KeyCode::Up => app.select_by(-1),
            KeyCode::PageDown => app.select_by(10),
            KeyCode::PageUp => app.select_by(-10),
            KeyCode::Char('g') | KeyCode::Home => app.select_first(),
            KeyCode::Char('G') | KeyCode::End => app.select_last(),
            KeyCode::Char('/') => {
                let text = app.query.text.clone();
                app.begin_input(Mode::Search, text);
            }
            KeyCode::Char('f') => {
                let category = app.query.category.clone().unwrap_or_default();
                app.begin_input(Mode::CategoryFilter, category);
            }
            KeyCode::Char('z') => app.begin_input(Mode::SizeFilter, String::new()),
            KeyCode::Char('x') => {
                app.query.clear();
                app.refresh(repo);
                app.set_status("Filters cleared".to_string());
            }
            KeyCode::Char('s') => app.start_edit(Field::Size),
            KeyCode::Char('c') => app.start_edit(Field::Color),
            KeyCode::Char('K') => app.start_edit(Field::Category),
            KeyCode::Char('m') => app.start_edit(Field::Memo),
            KeyCode::Char('d') => app.request_delete(),
            KeyCode::Char('v') => app.toggle_detail(paths),
            KeyCode::Char('r') => {
                app.refresh(repo);
                app.set_status("Refreshed".to_string());
            }
            _ => {}
        },
        Mode::ConfirmDelete(id) => {
            app.mode = Mode::Normal;
            if key.code == KeyCode::Char('y') {
                app.confirm_delete(repo, id);
            } else {
                app.set_status("Delete cancelled".to_string());
            }
        }
        Mode::Search => match key.code {
            KeyCode::Esc => {
                app.mode = Mode::Normal;
                app.input.clear();
                app.query.set_text("");
                app.refresh(repo);
            }
            KeyCode::Enter => {
                app.mode = Mode::Normal;
                app.input.clear();
            }
            KeyCode::Backspace => {
                app.input.pop();
                app.query.set_text(app.input.clone());
                app.refresh(repo);
            }
            KeyCode::Char(c) => {
                app.input.push(c);
                app.query.set_text(app.input.clone());
                app.refresh(repo);
            }
            _ => {}
        },
        Mode::CategoryFilter | Mode::SizeFilter | Mode::Edit(_) => match key.code {
            KeyCode::Esc => {
                app.mode = Mode::Normal;
                app.input.clear();
            }
            KeyCode::Enter => {
                let mode = std::mem::replace(&mut app.mode, Mode::Normal);
                match mode {
                    Mode::CategoryFilter => app.apply_category_filter(repo),
                    Mode::SizeFilter => app.apply_size_filter(repo),
                    Mode::Edit(field) => app.apply_edit(repo, field),
                    _ => {}
                }
            }
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Char(c) => app.input.push(c),
            _ => {}
        },
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────

pub fn run(paths: &AppPaths) -> Result<()> {
    paths.ensure_dirs()?;
    let conn = Connection::open(&paths.db_path)?;
    let repo = ClothRepository::new(SqliteStorage::new(conn)?);
    let changes = repo.subscribe();

    let mut app = App::new(PanelState::load(&paths.ui_state_file));
    app.data_version = repo.storage().data_version()?;
    app.refresh(&repo);

    let mut terminal = ratatui::init();

    let result = (|| {
        loop {
            terminal.draw(|frame| draw(frame, &mut app, paths))?;
            handle_event(&mut app, &repo, paths)?;
            app.sync_changes(&repo, &changes);
            if app.should_quit {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    })();

    ratatui::restore();

    result.map_err(ClothError::Io)
}
