use std::collections::VecDeque;
use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::GraderError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 500;

type Backend = CrosstermBackend<io::Stdout>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Progress,
    Logs,
}

#[derive(Debug)]
struct ScreenState {
    phase: String,
    status: String,
    done: usize,
    total: usize,
    failures: usize,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    active: bool,
    summary: Vec<String>,
}

/// Full-screen progress view for one long-running batch.
pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<ScreenState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<ScreenState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let message = event.message.trim().to_string();
        if let Some((phase, payload)) = parse_phase(&message) {
            state.phase = phase.to_string();
            state.status = payload.to_string();
        } else if let Some((label, done, total)) = parse_progress(&message) {
            state.status = format!("{label} {done}/{total}");
            state.done = done;
            state.total = total;
            // progress lines are too chatty for the event list
            push_bounded(&mut state.logs, format!("[{}] {message}", timestamp()), LOGS_MAX);
            return;
        } else {
            state.status = message.clone();
        }
        if message.contains("failed") {
            state.failures = state.failures.saturating_add(1);
        }
        let message = match event.elapsed {
            Some(elapsed) => format!("{message} ({:.1}s)", elapsed.as_secs_f64()),
            None => message,
        };
        push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
        push_bounded(&mut state.logs, format!("[{}] {message}", timestamp()), LOGS_MAX);
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(ScreenState {
                phase: "Resolve".to_string(),
                status: "ready".to_string(),
                done: 0,
                total: 0,
                failures: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Progress,
                started: Instant::now(),
                active: false,
                summary: Vec::new(),
            })),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while rendering its progress events.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, GraderError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);
        let mut terminal = enter_screen()?;

        let (tx, rx) = mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            self.draw(&mut terminal, tick)?;

            if let Ok(result) = rx.try_recv() {
                self.set_active(false);
                leave_screen()?;
                handle.join().ok();
                return result.map_err(miette::Report::new);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }
            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        leave_screen()?;
        Err(miette::Report::msg("aborted"))
    }

    /// Shows `lines` as the result panel until a key is pressed.
    pub fn finish(&mut self, lines: Vec<String>) -> miette::Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.phase = "Done".to_string();
            state.summary = lines;
        }
        let mut terminal = enter_screen()?;
        loop {
            self.draw(&mut terminal, 0)?;
            if event::poll(Duration::from_millis(200)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('l') | KeyCode::F(4) => self.toggle_logs(),
                        KeyCode::Up => self.scroll_logs(1),
                        KeyCode::Down => self.scroll_logs(-1),
                        _ => break,
                    }
                }
            }
        }
        leave_screen()
    }

    pub fn confirm(&mut self, question: &str, details: &[String]) -> miette::Result<bool> {
        let mut terminal = enter_screen()?;
        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let mut lines: Vec<Line> = details.iter().map(|d| Line::from(d.clone())).collect();
                    lines.push(Line::from(""));
                    lines.push(Line::from(question.to_string()));
                    lines.push(Line::from("Press y to confirm, n to cancel."));
                    let text = Paragraph::new(lines)
                        .alignment(Alignment::Center)
                        .block(Block::default().borders(Borders::ALL).title("Confirm"));
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };
        leave_screen()?;
        Ok(confirmed)
    }

    fn draw(&self, terminal: &mut Terminal<Backend>, tick: usize) -> miette::Result<()> {
        let Ok(state) = self.state.lock() else {
            return Ok(());
        };
        let kind = self.kind;
        let scroll = self.log_scroll;
        terminal
            .draw(|frame| {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Length(2),
                        Constraint::Length(3),
                        Constraint::Min(6),
                        Constraint::Length(1),
                    ])
                    .split(frame.area());

                frame.render_widget(draw_header(&state, kind, tick), chunks[0]);
                frame.render_widget(draw_gauge(&state), chunks[1]);
                let body = match state.view {
                    View::Progress => draw_events(&state),
                    View::Logs => draw_logs(&state, scroll),
                };
                frame.render_widget(body, chunks[2]);
                frame.render_widget(
                    Paragraph::new("l logs  ↑/↓ scroll  q quit")
                        .style(Style::default().fg(Color::DarkGray)),
                    chunks[3],
                );
            })
            .into_diagnostic()?;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('l') | KeyCode::F(4) => self.toggle_logs(),
            KeyCode::Up => self.scroll_logs(1),
            KeyCode::Down => self.scroll_logs(-1),
            KeyCode::Char('q') | KeyCode::Esc => return !self.is_active(),
            _ => {}
        }
        false
    }

    fn toggle_logs(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.view = match state.view {
                View::Progress => View::Logs,
                View::Logs => View::Progress,
            };
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        self.log_scroll = if delta.is_negative() {
            self.log_scroll.saturating_sub(delta.unsigned_abs())
        } else {
            self.log_scroll.saturating_add(delta as u16)
        };
    }

    fn is_active(&self) -> bool {
        self.state.lock().map(|state| state.active).unwrap_or(false)
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

fn enter_screen() -> miette::Result<Terminal<Backend>> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

fn leave_screen() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn draw_header(state: &ScreenState, kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let elapsed = state.started.elapsed().as_secs();
    Paragraph::new(Line::from(vec![
        Span::styled(
            "CHEESEGRADER",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(kind.title(), Style::default().fg(Color::Cyan)),
        Span::raw(format!("   Phase: {}   {elapsed}s ", state.phase)),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]))
    .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_gauge(state: &ScreenState) -> Gauge<'static> {
    let ratio = if state.total == 0 {
        0.0
    } else {
        (state.done as f64 / state.total as f64).clamp(0.0, 1.0)
    };
    let color = if state.failures > 0 { Color::Yellow } else { Color::Green };
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(state.status.clone()))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(format!("{}/{}", state.done, state.total))
}

fn draw_events(state: &ScreenState) -> Paragraph<'static> {
    let mut lines: Vec<Line> = Vec::new();
    if state.summary.is_empty() {
        lines.push(Line::from(Span::styled(
            "Recent events",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )));
        for event in &state.events {
            lines.push(Line::from(format!("- {event}")));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "Result (any key to close)",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )));
        for line in &state.summary {
            lines.push(Line::from(line.clone()));
        }
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: true })
}

fn draw_logs(state: &ScreenState, scroll: u16) -> Paragraph<'static> {
    let visible = 12usize;
    let start = state.logs.len().saturating_sub(scroll as usize + visible);
    let lines: Vec<Line> = state
        .logs
        .iter()
        .skip(start)
        .take(visible)
        .map(|line| Line::from(line.clone()))
        .collect();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Logs"))
        .wrap(Wrap { trim: true })
}

fn parse_phase(message: &str) -> Option<(&str, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (phase, payload) = rest.split_once(';')?;
    Some((phase.trim(), payload.trim()))
}

fn parse_progress(message: &str) -> Option<(&str, usize, usize)> {
    let rest = message.strip_prefix("progress=")?;
    let (label, counts) = rest.rsplit_once(' ')?;
    let (done, total) = counts.split_once('/')?;
    Some((label, done.parse().ok()?, total.parse().ok()?))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
