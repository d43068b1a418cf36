use std::collections::VecDeque;
use std::time::Instant;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use everscore::{
    ControlMode, EngineEvent, GameState, Health, LinkHealth, LinkStats, NetworkHealth,
    NetworkRole, NetworkStats, PeerStatus, Team,
};

const MAX_LOG_ENTRIES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn color(self) -> Color {
        match self {
            LogLevel::Info => Color::Gray,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }
}

struct LogEntry {
    at: Instant,
    level: LogLevel,
    message: String,
}

/// Everything the console shows that is not part of the engine snapshot.
pub struct ConsoleState {
    started: Instant,
    log: VecDeque<LogEntry>,
    period_minutes: u16,
    /// Role to use in Automatic. Kept here because the snapshot reports
    /// Send for as long as the console is in Manual.
    automatic_role: NetworkRole,
    last_health: Health,
}

impl ConsoleState {
    pub fn new(period_minutes: u16, automatic_role: NetworkRole, health: Health) -> Self {
        Self {
            started: Instant::now(),
            log: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            period_minutes,
            automatic_role,
            last_health: health,
        }
    }

    pub fn period_minutes(&self) -> u16 {
        self.period_minutes
    }

    pub fn toggle_role(&mut self) -> NetworkRole {
        self.automatic_role = match self.automatic_role {
            NetworkRole::Send => NetworkRole::Listen,
            NetworkRole::Listen => NetworkRole::Send,
        };
        self.automatic_role
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.log.len() == MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            at: Instant::now(),
            level,
            message,
        });
    }

    /// Turns engine events into log lines. Plain state changes are already
    /// visible on the board and are not logged.
    pub fn record_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Changed { .. } => {}
            EngineEvent::ModeChanged { from, to } => {
                self.log_info(format!("Mode {} -> {}", from.as_str(), to.as_str()));
            }
            EngineEvent::Health(health) => self.record_health(health),
            EngineEvent::ShuttingDown => self.log_info("Engine shutting down"),
        }
    }

    fn record_health(&mut self, health: &Health) {
        let previous = std::mem::replace(&mut self.last_health, health.clone());
        if previous.link != health.link {
            let message = format!("Serial link {}", health.link.as_str());
            match health.link {
                LinkHealth::Failed => self.log_error(message),
                LinkHealth::Silent => self.log_warn(message),
                _ => self.log_info(message),
            }
        }
        if previous.network != health.network {
            match &health.network {
                NetworkHealth::Degraded { reason } => {
                    self.log_warn(format!("Network degraded: {}", reason));
                }
                NetworkHealth::Ok => self.log_info("Network ok"),
                NetworkHealth::Disabled => self.log_info("Network disabled"),
            }
        }
        if previous.peer != health.peer {
            let message = format!("Peer {}", health.peer.as_str());
            match health.peer {
                PeerStatus::Silent | PeerStatus::Offline => self.log_warn(message),
                _ => self.log_info(message),
            }
        }
    }
}

pub struct ConsoleView<'a> {
    pub state: &'a GameState,
    pub health: &'a Health,
    pub network: Option<NetworkStats>,
    pub link: Option<LinkStats>,
}

pub fn render(frame: &mut Frame, console: &ConsoleState, view: &ConsoleView<'_>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Min(4),
            Constraint::Length(4),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], console, view.state);
    render_board(frame, chunks[1], view.state);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[2]);
    render_health(frame, middle[0], view.health);
    render_network(frame, middle[1], view.network, view.link.as_ref());

    render_log(frame, chunks[3], console);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, console: &ConsoleState, state: &GameState) {
    let uptime = format_duration(console.started.elapsed().as_secs());
    let title = format!(" Everscore - Uptime: {} ", uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let control = match state.control_mode() {
        ControlMode::Manual => "MANUAL",
        ControlMode::Automatic => "AUTOMATIC",
    };
    let role = match console.automatic_role {
        NetworkRole::Send => "send",
        NetworkRole::Listen => "listen",
    };
    let line = Line::from(vec![
        Span::styled(
            control,
            Style::default()
                .fg(if state.control_mode() == ControlMode::Manual {
                    Color::Magenta
                } else {
                    Color::Green
                })
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "  |  Live role: {}  |  Automatic role: {}  |  Sport: {}",
            match state.network_role() {
                NetworkRole::Send => "send",
                NetworkRole::Listen => "listen",
            },
            role,
            state.board().sport().as_str()
        )),
    ]);

    frame.render_widget(Paragraph::new(line).block(block), area);
}

fn render_board(frame: &mut Frame, area: Rect, state: &GameState) {
    let block = Block::default()
        .title(" Scoreboard ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let board = state.board();
    let display = state.display();
    let label = Style::default().fg(Color::Gray);
    let value = Style::default()
        .fg(Color::White)
        .add_modifier(Modifier::BOLD);

    let team_line = |team: Team| {
        let side = board.team(team);
        let name = if side.name().is_empty() {
            team.as_str()
        } else {
            side.name()
        };
        let mut spans = vec![
            Span::styled(format!("{:<6}", team.as_str().to_uppercase()), label),
            Span::styled(format!("{:<20}", name), Style::default().fg(Color::White)),
            Span::styled(format!("{:>4}", side.score()), value),
        ];
        if display.show_fouls {
            spans.push(Span::styled(format!("   fouls {}", side.fouls()), label));
        }
        Line::from(spans)
    };

    let clock = board.clock_display();
    let clock_style = if board.clock_running() {
        value.fg(Color::Green)
    } else {
        value.fg(Color::Yellow)
    };
    let direction = if board.count_down() { "down" } else { "up" };
    let mut clock_spans = vec![
        Span::styled("Clock ", label),
        Span::styled(format!("{:>6}", clock.to_string()), clock_style),
        Span::styled(
            format!(
                "  {} ({})",
                if board.clock_running() { "running" } else { "stopped" },
                direction
            ),
            label,
        ),
    ];
    if clock.is_fast() {
        clock_spans.push(Span::styled("  fast", Style::default().fg(Color::Red)));
    }

    let shot = match (display.show_shot_clock, board.shot_clock_tenths()) {
        (false, _) => "hidden".to_string(),
        (true, None) => "--".to_string(),
        (true, Some(tenths)) => format!("{}.{}", tenths / 10, tenths % 10),
    };

    let mut lines = vec![
        team_line(Team::Home),
        team_line(Team::Away),
        Line::from(vec![
            Span::styled("Period ", label),
            Span::styled(board.period().to_string(), value),
            Span::styled("   Shot clock ", label),
            Span::styled(shot, value),
        ]),
        Line::from(clock_spans),
    ];
    if !board.weight_class().is_empty() {
        lines.push(Line::from(vec![
            Span::styled("Weight ", label),
            Span::styled(board.weight_class().to_string(), value),
        ]));
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_health(frame: &mut Frame, area: Rect, health: &Health) {
    let border = if health.is_degraded() {
        Color::Red
    } else {
        Color::Green
    };
    let block = Block::default()
        .title(" Health ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border));

    let link_color = match health.link {
        LinkHealth::Active => Color::Green,
        LinkHealth::Silent => Color::Yellow,
        LinkHealth::Failed => Color::Red,
        LinkHealth::Disabled | LinkHealth::Waiting => Color::Gray,
    };
    let (network_text, network_color) = match &health.network {
        NetworkHealth::Disabled => ("disabled".to_string(), Color::Gray),
        NetworkHealth::Ok => ("ok".to_string(), Color::Green),
        NetworkHealth::Degraded { reason } => (format!("degraded: {}", reason), Color::Red),
    };
    let peer_color = match health.peer {
        PeerStatus::Online => Color::Green,
        PeerStatus::Silent => Color::Yellow,
        PeerStatus::Offline => Color::Red,
        PeerStatus::Unknown => Color::Gray,
    };

    let lines = vec![
        status_line("Serial: ", health.link.as_str().to_string(), link_color),
        status_line("Network: ", network_text, network_color),
        status_line("Peer: ", health.peer.as_str().to_string(), peer_color),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn status_line(label: &'static str, text: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::styled(text, Style::default().fg(color)),
    ])
}

fn render_network(
    frame: &mut Frame,
    area: Rect,
    network: Option<NetworkStats>,
    link: Option<&LinkStats>,
) {
    let block = Block::default()
        .title(" Traffic ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let label = Style::default().fg(Color::Gray);
    let value = Style::default().fg(Color::White);
    let mut lines = Vec::new();

    match network {
        Some(net) => {
            lines.push(Line::from(vec![
                Span::styled("Packets: ", label),
                Span::styled(
                    format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                    value,
                ),
            ]));
            lines.push(Line::from(vec![
                Span::styled("Bytes: ", label),
                Span::styled(
                    format!(
                        "{} sent / {} recv",
                        format_bytes(net.bytes_sent),
                        format_bytes(net.bytes_received)
                    ),
                    value,
                ),
            ]));
            let dropped = net.packets_filtered + net.packets_malformed + net.packets_stale;
            lines.push(Line::from(vec![
                Span::styled("Dropped: ", label),
                Span::styled(
                    format!(
                        "{} filtered / {} malformed / {} stale",
                        net.packets_filtered, net.packets_malformed, net.packets_stale
                    ),
                    Style::default().fg(if dropped > 0 { Color::Yellow } else { Color::White }),
                ),
            ]));
            let errors = net.send_errors + net.receive_errors;
            lines.push(Line::from(vec![
                Span::styled("Errors: ", label),
                Span::styled(
                    format!("{} send / {} recv", net.send_errors, net.receive_errors),
                    Style::default().fg(if errors > 0 { Color::Red } else { Color::White }),
                ),
            ]));
        }
        None => lines.push(Line::from(Span::styled("Network disabled", label))),
    }

    if let Some(link) = link {
        lines.push(Line::from(vec![
            Span::styled("Serial: ", label),
            Span::styled(
                format!(
                    "{} frames / {} dropped / {} reconnects",
                    link.frames_ok, link.frames_dropped, link.reconnects
                ),
                value,
            ),
        ]));
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, console: &ConsoleState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let skip = console.log.len().saturating_sub(visible);
    let lines: Vec<Line> = console
        .log
        .iter()
        .skip(skip)
        .map(|entry| {
            let at = entry.at.duration_since(console.started).as_secs();
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", format_duration(at)),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(entry.message.clone(), Style::default().fg(entry.level.color())),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new(vec![
        Line::from("m manual/auto  r send/listen  h/H a/A score  f/F g/G fouls  p/P period"),
        Line::from("space start/stop  d count direction  x reset clock  q/ESC quit"),
    ])
    .block(block)
    .style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use everscore::Mode;

    fn console() -> ConsoleState {
        ConsoleState::new(8, NetworkRole::Listen, Health::default())
    }

    #[test]
    fn test_log_is_bounded() {
        let mut console = console();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            console.log_info(format!("entry {}", i));
        }
        assert_eq!(console.log.len(), MAX_LOG_ENTRIES);
        assert_eq!(console.log.front().unwrap().message, "entry 10");
    }

    #[test]
    fn test_health_transitions_are_logged_once() {
        let mut console = console();
        let silent = Health {
            peer: PeerStatus::Silent,
            ..Default::default()
        };
        console.record_event(&EngineEvent::Health(silent.clone()));
        console.record_event(&EngineEvent::Health(silent));
        assert_eq!(console.log.len(), 1);
        assert_eq!(console.log[0].level, LogLevel::Warn);
        assert_eq!(console.log[0].message, "Peer silent");
    }

    #[test]
    fn test_mode_change_is_logged() {
        let mut console = console();
        console.record_event(&EngineEvent::ModeChanged {
            from: Mode::AutomaticListen,
            to: Mode::Manual,
        });
        assert_eq!(console.log[0].message, "Mode automatic/listen -> manual");
    }

    #[test]
    fn test_toggle_role() {
        let mut console = console();
        assert_eq!(console.toggle_role(), NetworkRole::Send);
        assert_eq!(console.toggle_role(), NetworkRole::Listen);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration(3725), "01:02:05");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
    }
}
