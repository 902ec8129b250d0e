// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! victus-tui: terminal UI client that talks to victus-daemon over its
//! Unix domain socket for live monitoring and fan control.

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, Tabs},
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use victus_fan_control::client::RequestQueue;
use victus_fan_control::config;
use victus_fan_control::mode::{FanId, FanMode};
use victus_fan_control::profile::{
    FanProfile, MAX_PROFILE_RPM, MAX_PROFILE_TEMP_C, MIN_PROFILE_RPM, MIN_PROFILE_TEMP_C,
    ProfilePoint,
};
use victus_fan_control::protocol::{Request, parse_response};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "victus-tui", about = "HP Victus fan control TUI client")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);
const RPM_STEP: i64 = 100;
const TEMP_STEP: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Dashboard,
    Mode,
    Manual,
    Profile,
}

impl Tab {
    const ALL: [Tab; 4] = [Tab::Dashboard, Tab::Mode, Tab::Manual, Tab::Profile];

    fn index(self) -> usize {
        match self {
            Tab::Dashboard => 0,
            Tab::Mode => 1,
            Tab::Manual => 2,
            Tab::Profile => 3,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Tab::Dashboard => "Dashboard",
            Tab::Mode => "Mode",
            Tab::Manual => "Manual RPM",
            Tab::Profile => "Profile",
        }
    }
}

/// Results coming back from request tasks.
enum Update {
    Status(Status),
    Reply { action: String, response: String },
}

#[derive(Debug, Clone, Default)]
struct Status {
    fan_speeds: [String; 2],
    mode: String,
    cpu_temp: String,
    all_temps: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileField {
    Temp,
    Rpm,
}

struct App {
    tab: Tab,
    running: bool,
    status_message: String,
    connected: bool,

    runtime: Runtime,
    queue: RequestQueue,
    updates_tx: mpsc::Sender<Update>,
    updates_rx: mpsc::Receiver<Update>,
    last_refresh: Option<Instant>,

    // Dashboard
    status: Status,

    // Mode selection
    mode_list_state: ListState,

    // Manual RPM
    manual_rpm: i64,

    // Profile editor
    profile: Vec<ProfilePoint>,
    profile_selected: usize,
    profile_field: ProfileField,
}

impl App {
    fn new(socket_path: &str) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let queue = {
            let _guard = runtime.enter();
            RequestQueue::new(socket_path)
        };
        let (updates_tx, updates_rx) = mpsc::channel();

        let mut mode_list_state = ListState::default();
        mode_list_state.select(Some(0));

        Ok(Self {
            tab: Tab::Dashboard,
            running: true,
            status_message: String::new(),
            connected: false,
            runtime,
            queue,
            updates_tx,
            updates_rx,
            last_refresh: None,
            status: Status::default(),
            mode_list_state,
            manual_rpm: 3000,
            profile: vec![
                ProfilePoint { temp_c: 40, rpm: 2600 },
                ProfilePoint { temp_c: 60, rpm: 3800 },
                ProfilePoint { temp_c: 80, rpm: 5200 },
            ],
            profile_selected: 0,
            profile_field: ProfileField::Temp,
        })
    }

    fn refresh_status(&mut self) {
        self.last_refresh = Some(Instant::now());
        let queue = self.queue.clone();
        let tx = self.updates_tx.clone();
        self.runtime.spawn(async move {
            let (fan1, fan2, mode, cpu_temp, all_temps) = tokio::join!(
                queue.send(&Request::GetFanSpeed(FanId::One)),
                queue.send(&Request::GetFanSpeed(FanId::Two)),
                queue.send(&Request::GetFanMode),
                queue.send(&Request::GetCpuTemp),
                queue.send(&Request::GetAllTemps),
            );
            let _ = tx.send(Update::Status(Status {
                fan_speeds: [fan1, fan2],
                mode,
                cpu_temp,
                all_temps,
            }));
        });
    }

    /// Send requests in order and report the first failure, or the last reply.
    fn submit(&self, action: impl Into<String>, requests: Vec<Request>) {
        let action = action.into();
        let queue = self.queue.clone();
        let tx = self.updates_tx.clone();
        self.runtime.spawn(async move {
            let mut response = String::new();
            for request in &requests {
                response = queue.send(request).await;
                if parse_response(&response).is_err() {
                    break;
                }
            }
            let _ = tx.send(Update::Reply { action, response });
        });
    }

    fn drain_updates(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            match update {
                Update::Status(status) => {
                    self.connected = !status.mode.starts_with("ERROR: No server connection");
                    self.status = status;
                }
                Update::Reply { action, response } => {
                    self.status_message = match parse_response(&response) {
                        Ok(_) => format!("{action}: done"),
                        Err(reason) => format!("{action}: {reason}"),
                    };
                    self.refresh_status();
                }
            }
        }
    }

    fn selected_mode(&self) -> FanMode {
        FanMode::ALL[self.mode_list_state.selected().unwrap_or(0) % FanMode::ALL.len()]
    }

    fn apply_mode(&mut self) {
        let mode = self.selected_mode();
        self.status_message = format!("Switching to {mode}...");
        self.submit(format!("Set mode {mode}"), vec![Request::SetFanMode(mode)]);
    }

    fn apply_manual_rpm(&mut self) {
        let rpm = self.manual_rpm.to_string();
        self.status_message = format!("Applying {rpm} RPM...");
        self.submit(
            format!("Set {rpm} RPM"),
            vec![
                Request::SetFanMode(FanMode::Manual),
                Request::SetFanSpeed(FanId::One, rpm.clone()),
                Request::SetFanSpeed(FanId::Two, rpm),
            ],
        );
    }

    fn apply_profile(&mut self) {
        match FanProfile::new(self.profile.clone()) {
            Ok(profile) => {
                self.status_message = "Applying profile...".to_string();
                self.submit(
                    "Apply profile",
                    vec![
                        Request::SetFanMode(FanMode::Profile),
                        Request::SetFanProfile(profile),
                    ],
                );
            }
            Err(e) => self.status_message = format!("Profile not applied: {e}"),
        }
    }
}

/// Manual speeds go out as 0 or within the daemon's accepted range.
fn step_manual_rpm(current: i64, delta: i64) -> i64 {
    let next = current + delta;
    if next < MIN_PROFILE_RPM {
        if delta < 0 { 0 } else { MIN_PROFILE_RPM }
    } else {
        next.min(MAX_PROFILE_RPM)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, terminate.clone())?;

    let mut app = App::new(&cli.socket)?;
    app.refresh_status();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, &terminate);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    terminate: &AtomicBool,
) -> anyhow::Result<()> {
    let tick_rate = Duration::from_millis(250);

    while app.running && !terminate.load(Ordering::Relaxed) {
        app.drain_updates();
        terminal.draw(|f| ui(f, app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                handle_input(app, key.code, key.modifiers);
            }
        }

        if app.last_refresh.is_none_or(|at| at.elapsed() >= REFRESH_INTERVAL) {
            app.refresh_status();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Input handling
// ---------------------------------------------------------------------------

fn handle_input(app: &mut App, key: KeyCode, modifiers: KeyModifiers) {
    // Global keys
    match key {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            app.running = false;
            return;
        }
        KeyCode::Char('q') => {
            app.running = false;
            return;
        }
        KeyCode::Char('1') => app.tab = Tab::Dashboard,
        KeyCode::Char('2') => app.tab = Tab::Mode,
        KeyCode::Char('3') => app.tab = Tab::Manual,
        KeyCode::Char('4') => app.tab = Tab::Profile,
        KeyCode::Tab => {
            let idx = (app.tab.index() + 1) % Tab::ALL.len();
            app.tab = Tab::ALL[idx];
        }
        KeyCode::BackTab => {
            let idx = (app.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len();
            app.tab = Tab::ALL[idx];
        }
        _ => {}
    }

    // Tab-specific keys
    match app.tab {
        Tab::Dashboard => {
            if key == KeyCode::Char('r') {
                app.refresh_status();
                app.status_message = "Refreshed".to_string();
            }
        }
        Tab::Mode => handle_mode_input(app, key),
        Tab::Manual => handle_manual_input(app, key),
        Tab::Profile => handle_profile_input(app, key),
    }
}

fn handle_mode_input(app: &mut App, key: KeyCode) {
    let count = FanMode::ALL.len();
    let i = app.mode_list_state.selected().unwrap_or(0);
    match key {
        KeyCode::Up | KeyCode::Char('k') => {
            app.mode_list_state.select(Some((i + count - 1) % count));
        }
        KeyCode::Down | KeyCode::Char('j') => {
            app.mode_list_state.select(Some((i + 1) % count));
        }
        KeyCode::Enter => app.apply_mode(),
        _ => {}
    }
}

fn handle_manual_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Left | KeyCode::Char('h') => {
            app.manual_rpm = step_manual_rpm(app.manual_rpm, -RPM_STEP);
        }
        KeyCode::Right | KeyCode::Char('l') => {
            app.manual_rpm = step_manual_rpm(app.manual_rpm, RPM_STEP);
        }
        KeyCode::Char('0') => app.manual_rpm = 0,
        KeyCode::Enter => app.apply_manual_rpm(),
        _ => {}
    }
}

fn handle_profile_input(app: &mut App, key: KeyCode) {
    let len = app.profile.len();
    match key {
        KeyCode::Up | KeyCode::Char('k') => {
            if len > 0 {
                app.profile_selected = (app.profile_selected + len - 1) % len;
            }
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if len > 0 {
                app.profile_selected = (app.profile_selected + 1) % len;
            }
        }
        KeyCode::Char('t') => app.profile_field = ProfileField::Temp,
        KeyCode::Char('r') => app.profile_field = ProfileField::Rpm,
        KeyCode::Left | KeyCode::Char('h') => adjust_point(app, -1),
        KeyCode::Right | KeyCode::Char('l') => adjust_point(app, 1),
        KeyCode::Char('a') => {
            let last = app.profile.last().copied();
            let point = match last {
                Some(p) => ProfilePoint {
                    temp_c: (p.temp_c + TEMP_STEP).min(MAX_PROFILE_TEMP_C),
                    rpm: p.rpm,
                },
                None => ProfilePoint { temp_c: 50, rpm: 3000 },
            };
            app.profile.push(point);
            app.profile_selected = app.profile.len() - 1;
        }
        KeyCode::Char('d') | KeyCode::Delete => {
            if app.profile_selected < len {
                app.profile.remove(app.profile_selected);
                app.profile_selected = app.profile_selected.min(app.profile.len().saturating_sub(1));
            }
        }
        KeyCode::Enter => app.apply_profile(),
        _ => {}
    }
}

fn adjust_point(app: &mut App, direction: i64) {
    let field = app.profile_field;
    let Some(point) = app.profile.get_mut(app.profile_selected) else {
        return;
    };
    match field {
        ProfileField::Temp => {
            point.temp_c =
                (point.temp_c + direction * TEMP_STEP).clamp(MIN_PROFILE_TEMP_C, MAX_PROFILE_TEMP_C);
        }
        ProfileField::Rpm => point.rpm = step_manual_rpm(point.rpm, direction * RPM_STEP),
    }
}

// ---------------------------------------------------------------------------
// Drawing
// ---------------------------------------------------------------------------

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Tabs
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Status bar
        ])
        .split(f.area());

    draw_tabs(f, app, chunks[0]);

    match app.tab {
        Tab::Dashboard => draw_dashboard(f, app, chunks[1]),
        Tab::Mode => draw_mode(f, app, chunks[1]),
        Tab::Manual => draw_manual(f, app, chunks[1]),
        Tab::Profile => draw_profile(f, app, chunks[1]),
    }

    draw_status_bar(f, app, chunks[2]);
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<Line> = Tab::ALL
        .iter()
        .enumerate()
        .map(|(i, t)| Line::from(format!(" {} {} ", i + 1, t.title())))
        .collect();
    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" victus-control "),
        )
        .select(app.tab.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    f.render_widget(tabs, area);
}

fn draw_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let conn = if app.connected {
        Span::styled(" CONNECTED ", Style::default().fg(Color::Green).bold())
    } else {
        Span::styled(" DISCONNECTED ", Style::default().fg(Color::Red).bold())
    };

    let help = match app.tab {
        Tab::Dashboard => "[r]efresh  [Tab] switch  [q]uit",
        Tab::Mode => "[↑/↓] select  [Enter] apply  [q]uit",
        Tab::Manual => "[←/→] ±100 RPM  [0] zero  [Enter] apply  [q]uit",
        Tab::Profile => "[↑/↓] point  [t]emp/[r]pm  [←/→] adjust  [a]dd [d]elete  [Enter] apply",
    };

    let line = Line::from(vec![
        conn,
        Span::raw(" "),
        Span::raw(app.status_message.as_str()),
    ]);
    let help_line = Line::from(Span::styled(help, Style::default().fg(Color::DarkGray)));

    let paragraph =
        Paragraph::new(vec![line, help_line]).block(Block::default().borders(Borders::ALL));
    f.render_widget(paragraph, area);
}

fn draw_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)])
        .split(area);

    let rows: Vec<Row> = FanId::BOTH
        .iter()
        .map(|fan| {
            let speed = &app.status.fan_speeds[fan.index()];
            let speed = match parse_response(speed) {
                Ok(rpm) => format!("{rpm} RPM"),
                Err(reason) => reason.to_string(),
            };
            Row::new(vec![Cell::from(format!("Fan {fan}")), Cell::from(speed)])
        })
        .collect();

    let fan_table = Table::new(rows, [Constraint::Length(10), Constraint::Min(10)])
        .header(
            Row::new(vec!["Fan", "Speed"])
                .style(Style::default().fg(Color::Cyan).bold()),
        )
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Fans ({}) ", app.status.mode)),
        );
    f.render_widget(fan_table, chunks[0]);

    let cpu = parse_response(&app.status.cpu_temp).unwrap_or("N/A");
    let mut lines = vec![Line::from(vec![
        Span::raw("CPU: "),
        Span::styled(format!("{cpu}°C"), temp_style(cpu)),
    ])];
    for section in app.status.all_temps.split('|') {
        if let Some((label, values)) = section.split_once(':') {
            lines.push(Line::from(format!("{label}: {}", values.replace(',', "  "))));
        }
    }

    let temps = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Temperatures "),
    );
    f.render_widget(temps, chunks[1]);
}

fn temp_style(temp: &str) -> Style {
    let color = match temp.parse::<i64>() {
        Ok(t) if t >= 85 => Color::Red,
        Ok(t) if t >= 70 => Color::Yellow,
        Ok(_) => Color::Green,
        Err(_) => Color::DarkGray,
    };
    Style::default().fg(color)
}

fn draw_mode(f: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = FanMode::ALL
        .iter()
        .map(|mode| {
            let marker = if app.status.mode == mode.as_str() { "●" } else { "○" };
            ListItem::new(format!("{marker} {mode}"))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Fan Mode "),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    f.render_stateful_widget(list, area, &mut app.mode_list_state.clone());
}

fn draw_manual(f: &mut Frame, app: &App, area: Rect) {
    let pct = app.manual_rpm as f64 / MAX_PROFILE_RPM as f64 * 100.0;
    let bar_width = 30;
    let filled = ((pct / 100.0 * bar_width as f64) as usize).min(bar_width);
    let bar = format!(
        "[{}{}] {} RPM",
        "█".repeat(filled),
        "░".repeat(bar_width - filled),
        app.manual_rpm
    );

    let text = vec![
        Line::from(bar),
        Line::from(""),
        Line::from(Span::styled(
            "Applied to both fans; switches the daemon to MANUAL",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let widget = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Manual RPM "),
    );
    f.render_widget(widget, area);
}

fn draw_profile(f: &mut Frame, app: &App, area: Rect) {
    let highlight = Style::default().fg(Color::Cyan).bold();
    let rows: Vec<Row> = app
        .profile
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let selected = i == app.profile_selected;
            let cell = |text: String, field: ProfileField| {
                if selected && app.profile_field == field {
                    Cell::from(text).style(highlight)
                } else {
                    Cell::from(text)
                }
            };
            Row::new(vec![
                Cell::from(if selected { "▶" } else { " " }),
                cell(format!("{}°C", p.temp_c), ProfileField::Temp),
                cell(format!("{} RPM", p.rpm), ProfileField::Rpm),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(8),
            Constraint::Min(10),
        ],
    )
    .header(
        Row::new(vec!["", "Temp", "RPM"])
            .style(Style::default().fg(Color::Cyan).bold()),
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Profile Points "),
    );
    f.render_widget(table, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_rpm_steps_skip_forbidden_band() {
        assert_eq!(step_manual_rpm(600, -100), 0);
        assert_eq!(step_manual_rpm(0, 100), 600);
        assert_eq!(step_manual_rpm(3000, 100), 3100);
        assert_eq!(step_manual_rpm(6100, 100), 6100);
    }
}
