mod config;
mod server;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use relay::ServerEvent;

use config::ServerConfig;
use server::RelayServer;
use tui::TuiState;

const STORE_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "Multiplayer relay server")]
struct Args {
    #[arg(short, long, help = "Path to a TOML config file")]
    config: Option<PathBuf>,

    #[arg(long)]
    headless: bool,

    #[arg(long)]
    game_port: Option<u16>,

    #[arg(long)]
    legacy_port: Option<u16>,

    #[arg(long)]
    admin_port: Option<u16>,

    #[arg(long, help = "Player record archive, kept in memory only when unset")]
    store: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.game_port {
            config.game.port = port;
        }
        if let Some(port) = self.legacy_port {
            config.legacy.port = port;
        }
        if let Some(port) = self.admin_port {
            config.admin.port = port;
        }
        if let Some(path) = &self.store {
            config.store_path = Some(path.clone());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let mut server = RelayServer::start(&config)?;
        for module in server.modules() {
            log::info!("{} module ready on {}", module.kind, module.addr);
        }
        run_headless(&server);
        log::info!("Server shutting down");
        server.shutdown();
    } else {
        let mut server = RelayServer::start(&config)?;
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_headless(server: &RelayServer) {
    let running = server.running();
    let mut last_flush = Instant::now();
    while running.load(Ordering::SeqCst) {
        for event in server.drain_events() {
            if let ServerEvent::Chat {
                channel,
                sender,
                text,
            } = &event
            {
                log::info!("[{}] {}: {}", channel, sender, text);
            }
        }
        if last_flush.elapsed() >= STORE_FLUSH_INTERVAL {
            server.flush_store();
            last_flush = Instant::now();
        }
        thread::sleep(Duration::from_millis(100));
    }
}

fn run_with_tui(server: &mut RelayServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();
    let mut last_flush = Instant::now();

    for module in server.modules() {
        tui_state.log_info(format!("{} module ready on {}", module.kind, module.addr));
    }

    while running.load(Ordering::SeqCst) {
        tui_state.set_uptime(server.uptime());

        for event in server.drain_events() {
            if event.is_error() {
                tui_state.log_error(event.describe());
            } else if event.is_warning() {
                tui_state.log_warn(event.describe());
            } else {
                tui_state.log_info(event.describe());
            }
        }

        if let Some(name) = tui_state.take_pending_kick() {
            if server.kick(&name) {
                tui_state.log_info(format!("Kicked {}", name));
            } else {
                tui_state.log_warn(format!("{} is no longer online", name));
            }
        }

        if last_flush.elapsed() >= STORE_FLUSH_INTERVAL {
            server.flush_store();
            last_flush = Instant::now();
        }

        let players = server.players();
        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Tab => tui_state.next_tab(),
                        KeyCode::BackTab => tui_state.prev_tab(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up => {
                            if tui_state.active_tab() == tui::Tab::Players {
                                tui_state.select_prev_player(players.len());
                            }
                        }
                        KeyCode::Down => {
                            if tui_state.active_tab() == tui::Tab::Players {
                                tui_state.select_next_player(players.len());
                            }
                        }
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            if tui_state.active_tab() == tui::Tab::Players {
                                tui_state.request_kick(&players);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let modules = server.modules();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &modules, &players);
        })?;
    }

    server.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
