use std::collections::VecDeque;
use std::time::Duration;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};

use relay::{PermissionFlags, PlayerSummary};

use crate::server::ModuleOverview;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Overview,
    Players,
    Log,
}

impl Tab {
    const ALL: [Tab; 3] = [Tab::Overview, Tab::Players, Tab::Log];

    fn title(self) -> &'static str {
        match self {
            Tab::Overview => "Overview",
            Tab::Players => "Players",
            Tab::Log => "Log",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
struct LogLine {
    level: LogLevel,
    uptime: Duration,
    text: String,
}

pub struct TuiState {
    tab: Tab,
    log: VecDeque<LogLine>,
    /// Lines scrolled up from the bottom of the log.
    scroll: usize,
    selected: usize,
    pending_kick: Option<String>,
    uptime: Duration,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            tab: Tab::Overview,
            log: VecDeque::new(),
            scroll: 0,
            selected: 0,
            pending_kick: None,
            uptime: Duration::ZERO,
        }
    }

    pub fn set_uptime(&mut self, uptime: Duration) {
        self.uptime = uptime;
    }

    pub fn log_info(&mut self, text: impl Into<String>) {
        self.push_log(LogLevel::Info, text.into());
    }

    pub fn log_warn(&mut self, text: impl Into<String>) {
        self.push_log(LogLevel::Warn, text.into());
    }

    pub fn log_error(&mut self, text: impl Into<String>) {
        self.push_log(LogLevel::Error, text.into());
    }

    fn push_log(&mut self, level: LogLevel, text: String) {
        if self.log.len() >= MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(LogLine {
            level,
            uptime: self.uptime,
            text,
        });
        if self.scroll > 0 {
            self.scroll = (self.scroll + 1).min(self.log.len().saturating_sub(1));
        }
    }

    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn next_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + 1) % Tab::ALL.len()];
    }

    pub fn prev_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len()];
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 10).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(10);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev_player(&mut self, count: usize) {
        if count == 0 {
            self.selected = 0;
        } else {
            self.selected = self.selected.min(count - 1).saturating_sub(1);
        }
    }

    pub fn select_next_player(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1).min(count - 1);
        }
    }

    pub fn request_kick(&mut self, players: &[PlayerSummary]) {
        if let Some(player) = players.get(self.selected) {
            self.pending_kick = Some(player.name.clone());
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<String> {
        self.pending_kick.take()
    }
}

pub fn render(
    frame: &mut Frame,
    state: &TuiState,
    modules: &[ModuleOverview],
    players: &[PlayerSummary],
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, modules, players.len());
    match state.tab {
        Tab::Overview => render_overview(frame, chunks[1], state, modules),
        Tab::Players => render_players(frame, chunks[1], state, players),
        Tab::Log => render_log(frame, chunks[1], state),
    }
    render_help(frame, chunks[2], state.tab);
}

fn render_header(
    frame: &mut Frame,
    area: Rect,
    state: &TuiState,
    modules: &[ModuleOverview],
    player_count: usize,
) {
    let title = format!(" Relay Server - Uptime: {} ", format_duration(state.uptime));
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let mut spans = Vec::new();
    for tab in Tab::ALL {
        let style = if tab == state.tab {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::styled(format!(" {} ", tab.title()), style));
        spans.push(Span::raw("|"));
    }
    spans.push(Span::styled(
        format!("  Modules: {}  Players: {}", modules.len(), player_count),
        Style::default().fg(Color::White),
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_overview(frame: &mut Frame, area: Rect, state: &TuiState, modules: &[ModuleOverview]) {
    let mut constraints: Vec<Constraint> = modules.iter().map(|_| Constraint::Length(6)).collect();
    constraints.push(Constraint::Min(0));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    for (module, area) in modules.iter().zip(chunks.iter()) {
        render_module(frame, *area, module);
    }
    if let Some(rest) = chunks.last() {
        render_log(frame, *rest, state);
    }
}

fn render_module(frame: &mut Frame, area: Rect, module: &ModuleOverview) {
    let block = Block::default()
        .title(format!(" {} - {} ", module.kind, module.addr))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(inner);

    let stats = &module.stats;
    let ratio = if module.max_clients == 0 {
        0.0
    } else {
        stats.clients as f64 / module.max_clients as f64
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} clients", stats.clients, module.max_clients));
    frame.render_widget(gauge, rows[0]);

    let lines = vec![
        Line::from(vec![
            Span::styled("Connections: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} attached / {} joined",
                    stats.attached, stats.clients
                ),
                Style::default().fg(Color::White),
            ),
            Span::styled("  Exchanges: ", Style::default().fg(Color::Gray)),
            Span::styled(stats.exchanges.to_string(), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::styled("Groups: ", Style::default().fg(Color::Gray)),
            Span::styled(stats.groups.to_string(), Style::default().fg(Color::White)),
            Span::styled("  Discovery: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format_micros(stats.discovery_micros),
                Style::default().fg(Color::White),
            ),
            Span::styled("  Relay: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format_micros(stats.relay_micros),
                Style::default().fg(if stats.relay_micros > 5_000 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines), rows[1]);
}

fn render_players(frame: &mut Frame, area: Rect, state: &TuiState, players: &[PlayerSummary]) {
    let block = Block::default()
        .title(format!(" Players ({}) ", players.len()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    if players.is_empty() {
        let text = Paragraph::new("No players online")
            .block(block)
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(text, area);
        return;
    }

    let lines: Vec<Line> = players
        .iter()
        .enumerate()
        .map(|(i, player)| {
            let selected = i == state.selected.min(players.len() - 1);
            let marker = if selected { "> " } else { "  " };
            let name_style = if selected {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else if player.permissions.contains(PermissionFlags::ADMINISTRATOR) {
                Style::default().fg(Color::Magenta)
            } else {
                Style::default().fg(Color::White)
            };
            let addr = player
                .addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string());
            Line::from(vec![
                Span::raw(marker),
                Span::styled(format!("{:>6} ", player.id), Style::default().fg(Color::Gray)),
                Span::styled(format!("{:<20}", player.name), name_style),
                Span::styled(format!("{:<8}", player.module), Style::default().fg(Color::Cyan)),
                Span::styled(
                    format!("{:<16}", player.level.as_deref().unwrap_or("-")),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!(
                        "({:.1}, {:.1}, {:.1}) ",
                        player.position.x, player.position.y, player.position.z
                    ),
                    Style::default().fg(Color::Gray),
                ),
                Span::styled(addr, Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let height = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(height);
    let lines: Vec<Line> = state
        .log
        .range(start..end)
        .map(|line| {
            let (tag, color) = match line.level {
                LogLevel::Info => ("INFO ", Color::Green),
                LogLevel::Warn => ("WARN ", Color::Yellow),
                LogLevel::Error => ("ERROR", Color::Red),
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", format_duration(line.uptime)),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(tag, Style::default().fg(color)),
                Span::raw(" "),
                Span::styled(line.text.clone(), Style::default().fg(Color::White)),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect, tab: Tab) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = match tab {
        Tab::Players => "Up/Down select  k kick  Tab switch view  q/ESC quit",
        _ => "PgUp/PgDn scroll  End follow  Tab switch view  q/ESC quit",
    };
    let help = Paragraph::new(text).block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(help, area);
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_micros(micros: u64) -> String {
    if micros < 1000 {
        format!("{}us", micros)
    } else {
        format!("{:.1}ms", micros as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tabs_wrap_both_ways() {
        let mut state = TuiState::new();
        state.prev_tab();
        assert_eq!(state.active_tab(), Tab::Log);
        state.next_tab();
        assert_eq!(state.active_tab(), Tab::Overview);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 10 {
            state.log_info(format!("line {i}"));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().map(|l| l.text.as_str()), Some("line 10"));
    }

    #[test]
    fn test_selection_stays_in_range() {
        let mut state = TuiState::new();
        state.select_next_player(2);
        state.select_next_player(2);
        assert_eq!(state.selected, 1);
        state.select_prev_player(2);
        state.select_prev_player(2);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_micros(420), "420us");
        assert_eq!(format_micros(5_500), "5.5ms");
    }
}
