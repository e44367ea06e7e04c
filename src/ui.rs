use std::collections::BTreeMap;
use std::error::Error;
use std::io;
use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, Local, NaiveDate};
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{ExecutableCommand, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};

use crate::domain::{
    Intensity, Session, aggregate_by_date, classify, format_minutes, grand_total, minutes_between,
};
use crate::merge::{DeleteError, WorkingSet};
use crate::store::{LocalStore, RemoteStore, SessionStore};
use crate::timer::{TimerController, clear_timer_state, save_timer_state};

const FOCUSED_PANEL_BORDER_COLOR: Color = Color::Yellow;
const INACTIVE_PANEL_BORDER_COLOR: Color = Color::DarkGray;
const HIGHLIGHT_BACKGROUND_COLOR: Color = Color::Rgb(42, 45, 52);

pub fn run_dashboard(
    working: &mut WorkingSet,
    timer: &mut TimerController,
    active: &dyn SessionStore,
    local: &LocalStore,
    remote: &RemoteStore,
    timer_path: &Path,
) -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, working, timer, active, local, remote, timer_path);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    working: &mut WorkingSet,
    timer: &mut TimerController,
    active: &dyn SessionStore,
    local: &LocalStore,
    remote: &RemoteStore,
    timer_path: &Path,
) -> Result<(), Box<dyn Error>> {
    let mut app = App::new(Local::now().date_naive());

    loop {
        let view = build_view(&app, working, timer);
        app.clamp_selection(&view);
        terminal.draw(|frame| draw_dashboard(frame, &app, &view))?;

        if event::poll(StdDuration::from_millis(250))? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                let should_quit = match &app.mode {
                    InputMode::Prompt(_) => {
                        handle_prompt_key(&mut app, key.code, timer, timer_path);
                        false
                    }
                    InputMode::ConfirmReset => {
                        handle_confirm_key(
                            &mut app, key.code, working, timer, local, remote, timer_path,
                        );
                        false
                    }
                    InputMode::Normal => {
                        handle_normal_key(&mut app, key.code, working, timer, active, &view, timer_path)
                    }
                };

                if should_quit {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn draw_dashboard(frame: &mut Frame, app: &App, view: &ViewModel) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(12), Constraint::Length(5)])
        .split(frame.area());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(26), Constraint::Min(30)])
        .split(layout[0]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(11), Constraint::Min(6)])
        .split(body[0]);

    render_calendar_panel(frame, left[0], app, view);
    render_summary_panel(frame, left[1], view);
    render_day_panel(frame, body[1], app, view);
    render_footer(frame, layout[1], app);
}

fn render_calendar_panel(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
    let month = app.calendar_month;
    let mut lines = Vec::new();
    lines.push(Line::from(format!("{} {}", month.format("%B"), month.year())));
    lines.push(Line::from("Mo Tu We Th Fr Sa Su"));

    let first_weekday = month.weekday().number_from_monday() as usize - 1;
    let days_in_month = days_in_month(month.year(), month.month());
    let mut day_counter = 1u32;
    for week in 0..6 {
        let mut spans = Vec::new();
        for weekday_index in 0..7 {
            let before_first = week == 0 && weekday_index < first_weekday;
            let after_last = day_counter > days_in_month;
            if before_first || after_last {
                spans.push(Span::raw("   "));
                continue;
            }

            let date = NaiveDate::from_ymd_opt(month.year(), month.month(), day_counter)
                .expect("calendar day must be valid");
            let total = view.totals.get(&date).copied().unwrap_or(0.0);
            let mut style = intensity_style(classify(total));
            if date == app.selected_day {
                style = Style::default()
                    .fg(Color::Black)
                    .bg(Color::Yellow)
                    .add_modifier(Modifier::BOLD);
            }

            spans.push(Span::styled(format!("{day_counter:>2} "), style));
            day_counter += 1;
        }
        lines.push(Line::from(spans));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Calendar")
        .border_style(border_style(app.focus == FocusPane::Calendar));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_summary_panel(frame: &mut Frame, area: Rect, view: &ViewModel) {
    let mut lines = Vec::new();
    match &view.running {
        Some((task, started_at, elapsed)) => {
            lines.push(Line::from(vec![
                Span::styled("studying ", Style::default().fg(Color::Green)),
                Span::styled(task.clone(), Style::default().add_modifier(Modifier::BOLD)),
            ]));
            lines.push(Line::from(format!(
                "since {} ({} min)",
                started_at,
                format_minutes(*elapsed)
            )));
        }
        None => lines.push(Line::from(Span::styled(
            "idle",
            Style::default().fg(Color::DarkGray),
        ))),
    }

    lines.push(Line::from(""));
    lines.push(Line::from(format!(
        "Total: {} min",
        format_minutes(view.grand_total)
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled(" low ", intensity_style(Intensity::Low)),
        Span::raw(" "),
        Span::styled(" med ", intensity_style(Intensity::Medium)),
        Span::raw(" "),
        Span::styled(" high ", intensity_style(Intensity::High)),
    ]));

    let panel = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Timer"));
    frame.render_widget(panel, area);
}

fn render_day_panel(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
    let items = view
        .day_rows
        .iter()
        .map(|session| ListItem::new(session_line(session)))
        .collect::<Vec<_>>();

    let mut state = ListState::default();
    if !view.day_rows.is_empty() {
        state.select(Some(app.day_index.min(view.day_rows.len() - 1)));
    }

    let title = format!(
        "{} | {} min ({})",
        app.selected_day.format("%A, %d %B %Y"),
        format_minutes(view.day_total),
        intensity_label(classify(view.day_total))
    );
    let list = List::new(if items.is_empty() {
        vec![ListItem::new("(no sessions for selected day)")]
    } else {
        items
    })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style(app.focus == FocusPane::Day)),
    )
    .highlight_style(
        Style::default()
            .bg(HIGHLIGHT_BACKGROUND_COLOR)
            .add_modifier(Modifier::BOLD),
    );

    frame.render_stateful_widget(list, area, &mut state);
}

fn session_line(session: &Session) -> Line<'static> {
    let origin_span = match session.origin {
        crate::domain::Origin::Local => Span::styled("local   ", Style::default().fg(Color::Green)),
        crate::domain::Origin::Imported => {
            Span::styled("imported", Style::default().fg(Color::Cyan))
        }
        crate::domain::Origin::Remote => {
            Span::styled("remote  ", Style::default().fg(Color::Magenta))
        }
    };

    Line::from(vec![
        Span::raw(format!(
            "{} -> {} | {:>8} min | ",
            session.start.format("%H:%M"),
            session.end.format("%H:%M"),
            format_minutes(session.duration)
        )),
        origin_span,
        Span::raw(format!(" | {}", session.display_task())),
    ])
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let footer_lines = match &app.mode {
        InputMode::Normal => vec![
            Line::from("Tab pane | arrows/hjkl navigate | n/N month | q quit"),
            Line::from("s start | x stop | d delete (day) | R reset all"),
            Line::from(app.status.clone()),
        ],
        InputMode::Prompt(prompt) => vec![
            Line::from("Task to study"),
            Line::from(format!("> {}", prompt.input)),
            Line::from("Enter start | Esc cancel"),
        ],
        InputMode::ConfirmReset => vec![
            Line::from(Span::styled(
                "Reset removes every stored session and the running timer.",
                Style::default().fg(Color::Red),
            )),
            Line::from("y confirm | any other key cancels"),
            Line::from(app.status.clone()),
        ],
    };

    let footer =
        Paragraph::new(footer_lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
    frame.render_widget(footer, area);
}

fn handle_normal_key(
    app: &mut App,
    code: KeyCode,
    working: &mut WorkingSet,
    timer: &mut TimerController,
    active: &dyn SessionStore,
    view: &ViewModel,
    timer_path: &Path,
) -> bool {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Tab | KeyCode::BackTab => {
            app.focus = app.focus.next();
            false
        }
        KeyCode::Up | KeyCode::Char('k') => {
            match app.focus {
                FocusPane::Calendar => app.shift_selected_day(-7),
                FocusPane::Day => app.move_day_selection(-1, view),
            }
            false
        }
        KeyCode::Down | KeyCode::Char('j') => {
            match app.focus {
                FocusPane::Calendar => app.shift_selected_day(7),
                FocusPane::Day => app.move_day_selection(1, view),
            }
            false
        }
        KeyCode::Left | KeyCode::Char('h') => {
            if app.focus == FocusPane::Calendar {
                app.shift_selected_day(-1);
            }
            false
        }
        KeyCode::Right | KeyCode::Char('l') => {
            if app.focus == FocusPane::Calendar {
                app.shift_selected_day(1);
            }
            false
        }
        KeyCode::Char('n') => {
            app.shift_selected_month(1);
            false
        }
        KeyCode::Char('N') => {
            app.shift_selected_month(-1);
            false
        }
        KeyCode::Char('s') | KeyCode::Char(' ') if !timer.is_running() => {
            app.mode = InputMode::Prompt(PromptState::default());
            false
        }
        KeyCode::Char('x') | KeyCode::Char(' ') => {
            stop_running_session(app, working, timer, active, timer_path);
            false
        }
        KeyCode::Char('d') => {
            delete_selected_session(app, working, active, view);
            false
        }
        KeyCode::Char('R') => {
            app.mode = InputMode::ConfirmReset;
            false
        }
        _ => false,
    }
}

fn handle_prompt_key(app: &mut App, code: KeyCode, timer: &mut TimerController, timer_path: &Path) {
    match code {
        KeyCode::Esc => {
            app.mode = InputMode::Normal;
            app.status = "Input cancelled".to_string();
        }
        KeyCode::Backspace => {
            if let InputMode::Prompt(prompt) = &mut app.mode {
                prompt.input.pop();
            }
        }
        KeyCode::Char(value) => {
            if let InputMode::Prompt(prompt) = &mut app.mode {
                prompt.input.push(value);
            }
        }
        KeyCode::Enter => {
            let prompt = match std::mem::replace(&mut app.mode, InputMode::Normal) {
                InputMode::Prompt(prompt) => prompt,
                other => {
                    app.mode = other;
                    return;
                }
            };

            match timer.start(&prompt.input, Local::now()) {
                Ok(true) => {
                    app.status = match save_timer_state(timer_path, timer.state()) {
                        Ok(()) => format!("studying {}", prompt.input.trim()),
                        Err(err) => format!("timer started but state not saved: {err}"),
                    };
                }
                Ok(false) => app.status = "a session is already running".to_string(),
                Err(err) => {
                    app.status = format!("error: {err}");
                    app.mode = InputMode::Prompt(prompt);
                }
            }
        }
        _ => {}
    }
}

fn handle_confirm_key(
    app: &mut App,
    code: KeyCode,
    working: &mut WorkingSet,
    timer: &mut TimerController,
    local: &LocalStore,
    remote: &RemoteStore,
    timer_path: &Path,
) {
    app.mode = InputMode::Normal;
    if code != KeyCode::Char('y') {
        app.status = "Reset cancelled".to_string();
        return;
    }

    let result = local
        .clear()
        .and_then(|()| remote.clear())
        .and_then(|()| clear_timer_state(timer_path));
    match result {
        Ok(()) => {
            *timer = TimerController::new();
            working.clear();
            app.status = "All study data cleared".to_string();
        }
        Err(err) => app.status = format!("reset failed: {err}"),
    }
}

fn stop_running_session(
    app: &mut App,
    working: &mut WorkingSet,
    timer: &mut TimerController,
    active: &dyn SessionStore,
    timer_path: &Path,
) {
    let Some(session) = timer.end(Local::now()) else {
        app.status = "No session is running".to_string();
        return;
    };

    let minutes = session.duration;
    let task = session.task.clone();
    let mut status = match working.commit(session, active) {
        Ok(()) => format!("studied {} for {} min", task, format_minutes(minutes)),
        // optimistic append: the session stays visible even though the
        // durable write failed
        Err(err) => format!("session kept in memory but not saved: {err}"),
    };

    if let Err(err) = save_timer_state(timer_path, timer.state()) {
        status = format!("{status}; timer state not saved: {err}");
    }
    app.status = status;
}

fn delete_selected_session(
    app: &mut App,
    working: &mut WorkingSet,
    active: &dyn SessionStore,
    view: &ViewModel,
) {
    if app.focus != FocusPane::Day {
        app.status = "Focus the day view to delete a session".to_string();
        return;
    }

    let Some(target) = view.day_rows.get(app.day_index).cloned() else {
        app.status = "No selected session to delete".to_string();
        return;
    };

    app.status = match working.request_delete(&target, active) {
        Ok(()) => format!("deleted {}", target.display_task()),
        Err(err @ DeleteError::Permission) => format!("{err}"),
        Err(DeleteError::Storage(err)) => format!("delete failed: {err}"),
    };
}

fn build_view(app: &App, working: &WorkingSet, timer: &TimerController) -> ViewModel {
    let totals = aggregate_by_date(working.sessions());
    let day_rows = working
        .sessions_on(app.selected_day)
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    let day_total = day_rows.iter().map(|session| session.duration).sum();

    let running = timer.running_since().map(|(task, started_at)| {
        (
            task.to_string(),
            started_at.format("%H:%M").to_string(),
            minutes_between(started_at, Local::now()),
        )
    });

    ViewModel {
        totals,
        day_total,
        day_rows,
        running,
        grand_total: grand_total(working.sessions()),
    }
}

fn intensity_style(intensity: Intensity) -> Style {
    match intensity {
        Intensity::None => Style::default(),
        Intensity::Low => Style::default().fg(Color::White).bg(Color::Rgb(0, 64, 0)),
        Intensity::Medium => Style::default().fg(Color::White).bg(Color::Rgb(0, 110, 0)),
        Intensity::High => Style::default().fg(Color::White).bg(Color::Rgb(0, 168, 0)),
    }
}

fn intensity_label(intensity: Intensity) -> &'static str {
    match intensity {
        Intensity::None => "none",
        Intensity::Low => "low",
        Intensity::Medium => "medium",
        Intensity::High => "high",
    }
}

fn border_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(FOCUSED_PANEL_BORDER_COLOR)
    } else {
        Style::default().fg(INACTIVE_PANEL_BORDER_COLOR)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("month start must be valid");
    let next = shift_month(first, 1);
    (next - first).num_days() as u32
}

fn first_day_of_month(day: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(day.year(), day.month(), 1).expect("month start must be valid")
}

fn shift_month(day: NaiveDate, delta: i32) -> NaiveDate {
    let months = day.year() * 12 + day.month() as i32 - 1 + delta;
    let year = months.div_euclid(12);
    let month = months.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).expect("shifted month must be valid")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocusPane {
    Calendar,
    Day,
}

impl FocusPane {
    fn next(self) -> Self {
        match self {
            FocusPane::Calendar => FocusPane::Day,
            FocusPane::Day => FocusPane::Calendar,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PromptState {
    input: String,
}

#[derive(Debug)]
enum InputMode {
    Normal,
    Prompt(PromptState),
    ConfirmReset,
}

struct App {
    focus: FocusPane,
    mode: InputMode,
    calendar_month: NaiveDate,
    selected_day: NaiveDate,
    day_index: usize,
    status: String,
}

impl App {
    fn new(today: NaiveDate) -> Self {
        Self {
            focus: FocusPane::Calendar,
            mode: InputMode::Normal,
            calendar_month: first_day_of_month(today),
            selected_day: today,
            day_index: 0,
            status: "Ready".to_string(),
        }
    }

    fn shift_selected_day(&mut self, delta: i64) {
        self.selected_day = self.selected_day + Duration::days(delta);
        self.calendar_month = first_day_of_month(self.selected_day);
        self.day_index = 0;
    }

    fn shift_selected_month(&mut self, delta: i32) {
        self.calendar_month = shift_month(self.calendar_month, delta);
        self.selected_day = self.calendar_month;
        self.day_index = 0;
    }

    fn move_day_selection(&mut self, delta: isize, view: &ViewModel) {
        if view.day_rows.is_empty() {
            self.day_index = 0;
            return;
        }
        let last = view.day_rows.len() - 1;
        self.day_index = self
            .day_index
            .saturating_add_signed(delta)
            .min(last);
    }

    fn clamp_selection(&mut self, view: &ViewModel) {
        if view.day_rows.is_empty() {
            self.day_index = 0;
        } else {
            self.day_index = self.day_index.min(view.day_rows.len() - 1);
        }
    }
}

struct ViewModel {
    totals: BTreeMap<NaiveDate, f64>,
    day_rows: Vec<Session>,
    day_total: f64,
    running: Option<(String, String, f64)>,
    grand_total: f64,
}
