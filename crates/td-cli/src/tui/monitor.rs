//! Live dashboard: focused issue, in progress, awaiting review, the ready
//! queue and recent activity.
//!
//! A loader thread owns every database read. It rebuilds a [`MonitorData`]
//! on a timer (or on `r`) and sends it over a channel; the UI loop only
//! drains that channel, handles keys and draws.
//!
//! Default keys: Tab/Shift-Tab switch pane, j/k move, r refresh, ? help,
//! q or Esc quit. `.todos/keymap.json` can rebind them (see [`Keymap`]).

use super::keymap::{Action, Keymap};
use crate::app::SyncSetup;
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::border;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use td_core::config::ProjectConfig;
use td_core::context::{self, ContextLimits, ContextSnapshot};
use td_core::db::action_log;
use td_core::model::{ActionEntry, Issue};
use td_core::sync::{Periodic, SyncEngine};
use td_core::Store;

const EVENT_POLL_MS: u64 = 100;
const ACTIVITY_LIMIT: usize = 30;

/// One refresh worth of dashboard content.
#[derive(Debug, Clone)]
pub struct MonitorData {
    pub context: ContextSnapshot,
    pub activity: Vec<ActionEntry>,
    pub loaded_at: DateTime<Utc>,
}

/// Read everything the dashboard shows. Focus is re-read from the project
/// config so `td focus` in another terminal shows up on the next refresh.
///
/// # Errors
///
/// Database failures, or a config file that no longer parses.
pub fn load(store: &Store, session_id: &str, config_path: &std::path::Path) -> Result<MonitorData> {
    let project = ProjectConfig::load(config_path)?;
    let limits = ContextLimits {
        logs: 8,
        open: 20,
        review: 20,
    };
    let context = context::build(store, session_id, project.focus.as_deref(), limits)?;
    let activity = store.read(|conn| action_log::recent(conn, None, ACTIVITY_LIMIT))?;
    Ok(MonitorData {
        context,
        activity,
        loaded_at: Utc::now(),
    })
}

enum UiMsg {
    Loaded(Box<MonitorData>),
    LoadError(String),
    SyncError(String),
}

enum LoadRequest {
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pane {
    #[default]
    InProgress,
    Review,
    Ready,
    Activity,
}

impl Pane {
    const ORDER: [Self; 4] = [Self::InProgress, Self::Review, Self::Ready, Self::Activity];

    fn title(self) -> &'static str {
        match self {
            Self::InProgress => "In progress",
            Self::Review => "Awaiting review",
            Self::Ready => "Ready",
            Self::Activity => "Recent activity",
        }
    }

    fn index(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

/// UI state. Holds no database handles.
#[derive(Debug, Default)]
pub struct MonitorState {
    pub data: Option<MonitorData>,
    pub error: Option<String>,
    pub pane: Pane,
    pub selected: [usize; 4],
    pub show_help: bool,
    pub keymap: Keymap,
}

/// What the loop should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Refresh,
    Quit,
}

impl MonitorState {
    fn pane_len(&self, pane: Pane) -> usize {
        self.data.as_ref().map_or(0, |d| match pane {
            Pane::InProgress => d.context.in_progress.len(),
            Pane::Review => d.context.reviewable.len(),
            Pane::Ready => d.context.next_up.len(),
            Pane::Activity => d.activity.len(),
        })
    }

    fn apply(&mut self, data: MonitorData) {
        self.data = Some(data);
        self.error = None;
        for pane in Pane::ORDER {
            let len = self.pane_len(pane);
            let sel = &mut self.selected[pane.index()];
            *sel = (*sel).min(len.saturating_sub(1));
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return KeyOutcome::Quit;
        }
        if self.show_help {
            self.show_help = false;
            return KeyOutcome::Continue;
        }
        let Some(action) = self.keymap.action(&key) else {
            return KeyOutcome::Continue;
        };
        let len = self.pane_len(self.pane);
        let sel = &mut self.selected[self.pane.index()];
        match action {
            Action::Quit => return KeyOutcome::Quit,
            Action::Refresh => return KeyOutcome::Refresh,
            Action::Help => self.show_help = true,
            Action::NextPane => self.pane = self.pane.next(),
            Action::PrevPane => self.pane = self.pane.prev(),
            Action::Down if *sel + 1 < len => *sel += 1,
            Action::Down => {}
            Action::Up => *sel = sel.saturating_sub(1),
            Action::Top => *sel = 0,
            Action::Bottom => *sel = len.saturating_sub(1),
        }
        KeyOutcome::Continue
    }
}

/// Run the dashboard until the user quits. When `sync` is set, a periodic
/// pull runs alongside the loader.
///
/// # Errors
///
/// Terminal setup or teardown failures.
pub fn run_monitor(
    store: Store,
    session_id: String,
    config_path: PathBuf,
    refresh: Duration,
    sync: Option<SyncSetup>,
    keymap: Keymap,
) -> Result<()> {
    let (ui_tx, ui_rx) = mpsc::channel();
    let (req_tx, req_rx) = mpsc::channel();

    let puller = sync.map(|setup| spawn_puller(store.clone(), setup, ui_tx.clone()));
    spawn_loader(store, session_id, config_path, refresh, req_rx, ui_tx);

    let mut state = MonitorState {
        keymap,
        ..MonitorState::default()
    };
    let result = run_terminal(&mut state, &ui_rx, &req_tx);
    if let Some(puller) = puller {
        puller.stop();
    }
    result
}

fn spawn_loader(
    store: Store,
    session_id: String,
    config_path: PathBuf,
    refresh: Duration,
    req_rx: Receiver<LoadRequest>,
    ui_tx: Sender<UiMsg>,
) {
    thread::spawn(move || {
        loop {
            let msg = match load(&store, &session_id, &config_path) {
                Ok(data) => UiMsg::Loaded(Box::new(data)),
                Err(err) => UiMsg::LoadError(format!("{err:#}")),
            };
            if ui_tx.send(msg).is_err() {
                break;
            }
            match req_rx.recv_timeout(refresh) {
                Ok(LoadRequest::Reload) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });
}

fn spawn_puller(store: Store, setup: SyncSetup, ui_tx: Sender<UiMsg>) -> Periodic {
    let interval = Duration::from_secs(setup.user.sync.auto.interval_secs.max(1));
    Periodic::spawn(interval, move || {
        let transport = setup.transport();
        let result = SyncEngine::new(&store, &transport, setup.config.clone())
            .and_then(|engine| engine.pull());
        match result {
            Ok(report) => tracing::info!(applied = report.applied, "monitor pull"),
            Err(err) => {
                tracing::warn!(error = %err, "monitor pull failed");
                let _ = ui_tx.send(UiMsg::SyncError(err.to_string()));
            }
        }
    })
}

fn run_terminal(
    state: &mut MonitorState,
    ui_rx: &Receiver<UiMsg>,
    req_tx: &Sender<LoadRequest>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, state, ui_rx, req_tx);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut MonitorState,
    ui_rx: &Receiver<UiMsg>,
    req_tx: &Sender<LoadRequest>,
) -> Result<()> {
    let mut dirty = true;
    loop {
        while let Ok(msg) = ui_rx.try_recv() {
            match msg {
                UiMsg::Loaded(data) => state.apply(*data),
                UiMsg::LoadError(err) | UiMsg::SyncError(err) => state.error = Some(err),
            }
            dirty = true;
        }

        if dirty {
            terminal.draw(|frame| render(frame, state))?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(EVENT_POLL_MS))? {
            match event::read()? {
                Event::Key(key) => {
                    match state.handle_key(key) {
                        KeyOutcome::Quit => break,
                        KeyOutcome::Refresh => {
                            let _ = req_tx.send(LoadRequest::Reload);
                        }
                        KeyOutcome::Continue => {}
                    }
                    dirty = true;
                }
                Event::Resize(..) => dirty = true,
                _ => {}
            }
        }
    }
    Ok(())
}

fn issue_item(issue: &Issue) -> ListItem<'static> {
    ListItem::new(Line::from(vec![
        Span::styled(format!("{} ", issue.id), Style::default().fg(Color::Cyan)),
        Span::styled(
            format!("{:<3} ", issue.priority.as_str()),
            Style::default().fg(priority_color(issue)),
        ),
        Span::raw(issue.title.clone()),
    ]))
}

fn priority_color(issue: &Issue) -> Color {
    match issue.priority.as_str() {
        "P0" => Color::Red,
        "P1" => Color::Yellow,
        _ => Color::Gray,
    }
}

fn action_item(entry: &ActionEntry) -> ListItem<'static> {
    let when = entry.timestamp.with_timezone(&Local).format("%H:%M:%S");
    ListItem::new(Line::from(vec![
        Span::styled(format!("{when} "), Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{:<8} ", entry.action_type.as_str()),
            Style::default().fg(Color::Green),
        ),
        Span::raw(format!("{} ", entry.entity_id)),
        Span::styled(entry.session_id.clone(), Style::default().fg(Color::DarkGray)),
    ]))
}

fn pane_block(pane: Pane, active: Pane, count: usize) -> Block<'static> {
    let style = if pane == active {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .borders(Borders::ALL)
        .border_set(border::ROUNDED)
        .border_style(style)
        .title(format!(" {} ({count}) ", pane.title()))
}

fn render_list(
    frame: &mut ratatui::Frame<'_>,
    state: &MonitorState,
    pane: Pane,
    items: Vec<ListItem<'static>>,
    area: Rect,
) {
    let count = items.len();
    let list = List::new(items)
        .block(pane_block(pane, state.pane, count))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut list_state = ListState::default();
    if pane == state.pane && count > 0 {
        list_state.select(Some(state.selected[pane.index()]));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn focus_lines(snapshot: &ContextSnapshot) -> Vec<Line<'static>> {
    let Some(focus) = &snapshot.focus else {
        return vec![Line::from(Span::styled(
            "no focused issue (td focus <id>)",
            Style::default().fg(Color::DarkGray),
        ))];
    };
    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{} ", focus.issue.id), Style::default().fg(Color::Cyan)),
        Span::styled(
            format!("[{}] ", focus.issue.status.as_str()),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled(focus.issue.title.clone(), Style::default().add_modifier(Modifier::BOLD)),
    ])];
    if let Some(git) = &focus.git {
        lines.push(Line::from(format!(
            "git {} @ {} ({} dirty, {} untracked)",
            git.branch,
            git.commit_sha.chars().take(8).collect::<String>(),
            git.dirty_files,
            git.untracked_files
        )));
    }
    if let Some(handoff) = &focus.handoff {
        for item in &handoff.remaining {
            lines.push(Line::from(format!("  remaining: {item}")));
        }
    }
    for log in &focus.logs {
        lines.push(Line::from(vec![
            Span::styled(
                format!("  {} ", log.timestamp.with_timezone(&Local).format("%m-%d %H:%M")),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw(log.message.clone()),
        ]));
    }
    lines
}

/// Draw one frame.
pub fn render(frame: &mut ratatui::Frame<'_>, state: &MonitorState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(6), Constraint::Length(1)])
        .split(frame.area());

    let Some(data) = &state.data else {
        let msg = state.error.as_deref().unwrap_or("loading…");
        frame.render_widget(Paragraph::new(msg.to_string()), rows[1]);
        return;
    };

    let header = Paragraph::new(focus_lines(&data.context))
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .title(format!(" td: {} ", data.context.session)),
        );
    frame.render_widget(header, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(columns[0]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(columns[1]);

    let ctx = &data.context;
    let issues = |list: &[Issue]| list.iter().map(issue_item).collect::<Vec<_>>();
    render_list(frame, state, Pane::InProgress, issues(&ctx.in_progress), left[0]);
    render_list(frame, state, Pane::Review, issues(&ctx.reviewable), left[1]);
    render_list(frame, state, Pane::Ready, issues(&ctx.next_up), right[0]);
    let activity = data.activity.iter().map(action_item).collect();
    render_list(frame, state, Pane::Activity, activity, right[1]);

    let status = match &state.error {
        Some(err) => Line::from(Span::styled(format!(" {err}"), Style::default().fg(Color::Red))),
        None => Line::from(Span::styled(
            format!(
                " refreshed {}  Tab pane  j/k move  r refresh  ? help  q quit",
                data.loaded_at.with_timezone(&Local).format("%H:%M:%S")
            ),
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(status), rows[2]);

    if state.show_help {
        render_help(frame, frame.area(), &state.keymap);
    }
}

fn render_help(frame: &mut ratatui::Frame<'_>, area: Rect, keymap: &Keymap) {
    let width = 48.min(area.width);
    let height = 13.min(area.height);
    let popup = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    };
    let mut lines: Vec<Line<'_>> = [
        (Action::NextPane, "next pane"),
        (Action::PrevPane, "previous pane"),
        (Action::Down, "move down"),
        (Action::Up, "move up"),
        (Action::Top, "first"),
        (Action::Bottom, "last"),
        (Action::Refresh, "refresh now"),
        (Action::Quit, "quit"),
    ]
    .into_iter()
    .map(|(action, label)| Line::from(format!("{:<20}{label}", keymap.keys_for(action))))
    .collect();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "any key closes this",
        Style::default().fg(Color::DarkGray),
    )));
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .title(" keys "),
        ),
        popup,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use td_core::MutationContext;
    use td_core::mutation::issues::{self as mi, NewIssue};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn loaded_state() -> MonitorState {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        let store = Store::open_in_memory().unwrap();
        let ctx = MutationContext::new("ses_mon");
        for title in ["parser", "lexer", "docs"] {
            mi::create(&store, &ctx, NewIssue::titled(title)).unwrap();
        }
        let mut state = MonitorState::default();
        state.apply(load(&store, "ses_mon", &config).unwrap());
        state
    }

    #[test]
    fn load_collects_ready_queue_and_activity() {
        let state = loaded_state();
        let data = state.data.as_ref().unwrap();
        assert_eq!(data.context.next_up.len(), 3);
        assert_eq!(data.activity.len(), 3);
        assert!(data.context.focus.is_none());
    }

    #[test]
    fn keys_move_within_pane_bounds() {
        let mut state = loaded_state();
        state.pane = Pane::Ready;
        for _ in 0..5 {
            assert_eq!(state.handle_key(key(KeyCode::Char('j'))), KeyOutcome::Continue);
        }
        assert_eq!(state.selected[Pane::Ready.index()], 2);
        state.handle_key(key(KeyCode::Char('g')));
        assert_eq!(state.selected[Pane::Ready.index()], 0);
    }

    #[test]
    fn tab_cycles_and_q_quits() {
        let mut state = MonitorState::default();
        state.handle_key(key(KeyCode::Tab));
        assert_eq!(state.pane, Pane::Review);
        state.handle_key(key(KeyCode::BackTab));
        state.handle_key(key(KeyCode::BackTab));
        assert_eq!(state.pane, Pane::Activity);
        assert_eq!(state.handle_key(key(KeyCode::Char('r'))), KeyOutcome::Refresh);
        assert_eq!(state.handle_key(key(KeyCode::Char('q'))), KeyOutcome::Quit);
    }

    #[test]
    fn rebound_keys_drive_the_same_actions() {
        let mut state = loaded_state();
        state.keymap = {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("keymap.json");
            std::fs::write(&path, r#"{"down": ["n"], "quit": ["x"]}"#).unwrap();
            Keymap::load(&path).unwrap()
        };
        state.pane = Pane::Ready;
        state.handle_key(key(KeyCode::Char('n')));
        assert_eq!(state.selected[Pane::Ready.index()], 1);
        state.handle_key(key(KeyCode::Char('j')));
        assert_eq!(state.selected[Pane::Ready.index()], 1);
        assert_eq!(state.handle_key(key(KeyCode::Char('q'))), KeyOutcome::Continue);
        assert_eq!(state.handle_key(key(KeyCode::Char('x'))), KeyOutcome::Quit);
    }

    #[test]
    fn help_swallows_next_key() {
        let mut state = MonitorState::default();
        state.handle_key(key(KeyCode::Char('?')));
        assert!(state.show_help);
        assert_eq!(state.handle_key(key(KeyCode::Char('q'))), KeyOutcome::Continue);
        assert!(!state.show_help);
    }

    #[test]
    fn renders_panes_into_buffer() {
        let state = loaded_state();
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|frame| render(frame, &state)).unwrap();
        let text: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(ratatui::buffer::Cell::symbol)
            .collect();
        assert!(text.contains("Ready (3)"));
        assert!(text.contains("no focused issue"));
    }
}
