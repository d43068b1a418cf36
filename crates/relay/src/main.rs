mod config;
mod tui;

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

use config::{DEFAULT_PERIOD_MINUTES, LinkSelection, RelayConfig, RelayOptions, RoleArg, SportArg};
use everscore::{
    ControlMode, DEFAULT_BAUD_RATE, DEFAULT_PORT, Engine, EngineClosed, EngineEvent, EngineHandle,
    HardwareLink, LinkError, Mode, NetworkRole, NetworkTransport, OpenLink, Team,
};
use tui::{ConsoleState, ConsoleView};

const FRAME_INTERVAL: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "everscore")]
#[command(about = "Scoreboard relay and operator console")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, help = "Destination ip or ip:port (default: broadcast)")]
    peer: Option<String>,

    #[arg(long, value_enum, default_value_t = RoleArg::Listen)]
    role: RoleArg,

    #[arg(long, help = "Start in manual control")]
    manual: bool,

    #[arg(long, help = "Only accept packets from this address")]
    allow_from: Option<IpAddr>,

    #[arg(long, help = "Serial device (default: auto-detect a PL2303 adapter)")]
    serial: Option<String>,

    #[arg(long, help = "Do not read a console over serial")]
    no_serial: bool,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    #[arg(long, value_enum, default_value_t = SportArg::Basketball)]
    sport: SportArg,

    #[arg(long, default_value_t = DEFAULT_PERIOD_MINUTES)]
    period_minutes: u16,

    #[arg(long, default_value_t = 50)]
    send_interval_ms: u64,

    #[arg(long, default_value_t = 1000)]
    heartbeat_ms: u64,

    #[arg(long, default_value_t = 200)]
    failsafe_ms: u64,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let config = RelayConfig::from_options(RelayOptions {
        bind: args.bind,
        port: args.port,
        peer: args.peer.as_deref(),
        role: args.role,
        manual: args.manual,
        allow_from: args.allow_from,
        serial: args.serial.clone(),
        no_serial: args.no_serial,
        baud: args.baud,
        sport: args.sport,
        period_minutes: args.period_minutes,
        send_interval_ms: args.send_interval_ms,
        heartbeat_ms: args.heartbeat_ms,
        failsafe_ms: args.failsafe_ms,
    })?;

    let runtime = Runtime::new().context("failed to start async runtime")?;
    let link = open_link(&config.link)?;
    let (handle, join) = runtime.block_on(async {
        let transport = NetworkTransport::bind(config.transport.clone())
            .await
            .with_context(|| format!("cannot use UDP port {}", config.transport.bind_addr))?;
        Engine::start(config.engine.clone(), Some(transport), link)
            .context("failed to start engine")
    })?;

    if args.headless {
        runtime.block_on(run_headless(handle, join))
    } else {
        let automatic_role = match args.role {
            RoleArg::Send => NetworkRole::Send,
            RoleArg::Listen => NetworkRole::Listen,
        };
        let mut console = ConsoleState::new(config.period_minutes, automatic_role, handle.health());
        if handle.link_stats().is_none() && !matches!(config.link, LinkSelection::Disabled) {
            console.log_warn("No serial console link; operator input only");
        }
        let result = run_with_tui(&handle, console);
        stop_engine(&runtime, &handle, join);
        result.context("console failed")
    }
}

/// Missing auto-detected hardware is fine; a named device that will not
/// open is not.
fn open_link(selection: &LinkSelection) -> Result<Option<OpenLink>> {
    match selection {
        LinkSelection::Disabled => Ok(None),
        LinkSelection::Explicit(config) => HardwareLink::open(config.clone())
            .map(Some)
            .context("cannot open serial device"),
        LinkSelection::Detect(config) => match HardwareLink::open(config.clone()) {
            Ok(link) => Ok(Some(link)),
            Err(LinkError::NotFound) => {
                log::warn!("No USB serial adapter found; running without a console link");
                Ok(None)
            }
            Err(e) => {
                log::warn!("{}; running without a console link", e);
                Ok(None)
            }
        },
    }
}

fn stop_engine(runtime: &Runtime, handle: &EngineHandle, join: JoinHandle<()>) {
    if handle.request_shutdown().is_err() {
        return;
    }
    runtime.block_on(async {
        if tokio::time::timeout(SHUTDOWN_GRACE, join).await.is_err() {
            log::warn!("Engine did not stop within {:?}", SHUTDOWN_GRACE);
        }
    });
}

async fn run_headless(handle: EngineHandle, mut join: JoinHandle<()>) -> Result<()> {
    let mut events = handle.subscribe();
    let state = handle.snapshot();
    log::info!(
        "Running in {} mode, press Ctrl-C to stop",
        Mode::from_parts(state.control_mode(), state.network_role()).as_str()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                log::info!("Shutting down");
                break;
            }
            result = &mut join => {
                result.context("engine task failed")?;
                log::warn!("Engine stopped");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => log::debug!("Skipped {} engine events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if handle.request_shutdown().is_ok() {
        tokio::time::timeout(SHUTDOWN_GRACE, join)
            .await
            .context("engine did not stop in time")?
            .context("engine task failed")?;
    }
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Changed { fields, state } => {
            let board = state.board();
            log::debug!(
                "{:?}: {} {} - {} {}, period {}, clock {}",
                fields,
                board.team(Team::Home).name(),
                board.team(Team::Home).score(),
                board.team(Team::Away).score(),
                board.team(Team::Away).name(),
                board.period(),
                board.clock_display()
            );
        }
        EngineEvent::ModeChanged { from, to } => {
            log::info!("Mode {} -> {}", from.as_str(), to.as_str());
        }
        EngineEvent::Health(health) => {
            if health.is_degraded() {
                log::warn!(
                    "Health: serial {}, network {:?}, peer {}",
                    health.link.as_str(),
                    health.network,
                    health.peer.as_str()
                );
            } else {
                log::info!(
                    "Health: serial {}, peer {}",
                    health.link.as_str(),
                    health.peer.as_str()
                );
            }
        }
        EngineEvent::ShuttingDown => log::info!("Engine shutting down"),
    }
}

fn run_with_tui(handle: &EngineHandle, mut console: ConsoleState) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = console_loop(&mut terminal, handle, &mut console);

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;
    result
}

fn console_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    handle: &EngineHandle,
    console: &mut ConsoleState,
) -> io::Result<()> {
    let mut events = handle.subscribe();
    let state = handle.snapshot();
    console.log_info(format!(
        "Started in {} mode",
        Mode::from_parts(state.control_mode(), state.network_role()).as_str()
    ));

    loop {
        loop {
            match events.try_recv() {
                Ok(event) => console.record_event(&event),
                Err(TryRecvError::Lagged(missed)) => {
                    console.log_warn(format!("Skipped {} engine events", missed));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    console.log_error("Engine stopped");
                    return Ok(());
                }
            }
        }

        if event::poll(FRAME_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                        console.log_info("Shutting down...");
                        return Ok(());
                    }
                    if handle_key(key.code, handle, console).is_err() {
                        return Ok(());
                    }
                }
            }
        }

        let state = handle.snapshot();
        let health = handle.health();
        let view = ConsoleView {
            state: &state,
            health: &health,
            network: handle.network_stats(),
            link: handle.link_stats(),
        };
        terminal.draw(|frame| tui::render(frame, console, &view))?;
    }
}

fn handle_key(
    code: KeyCode,
    handle: &EngineHandle,
    console: &mut ConsoleState,
) -> Result<(), EngineClosed> {
    let state = handle.snapshot();
    let board = state.board();
    match code {
        KeyCode::Char('m') => match state.control_mode() {
            ControlMode::Manual => handle.set_control_mode(ControlMode::Automatic)?,
            ControlMode::Automatic => handle.set_control_mode(ControlMode::Manual)?,
        },
        KeyCode::Char('r') => {
            let role = console.toggle_role();
            handle.set_network_role(role)?;
            if state.control_mode() == ControlMode::Manual {
                console.log_info(format!(
                    "Automatic role set to {}",
                    match role {
                        NetworkRole::Send => "send",
                        NetworkRole::Listen => "listen",
                    }
                ));
            }
        }
        KeyCode::Char('h') => handle.adjust_score(Team::Home, 1)?,
        KeyCode::Char('H') => handle.adjust_score(Team::Home, -1)?,
        KeyCode::Char('a') => handle.adjust_score(Team::Away, 1)?,
        KeyCode::Char('A') => handle.adjust_score(Team::Away, -1)?,
        KeyCode::Char('f') => handle.adjust_fouls(Team::Home, 1)?,
        KeyCode::Char('F') => handle.adjust_fouls(Team::Home, -1)?,
        KeyCode::Char('g') => handle.adjust_fouls(Team::Away, 1)?,
        KeyCode::Char('G') => handle.adjust_fouls(Team::Away, -1)?,
        KeyCode::Char('p') => handle.adjust_period(1)?,
        KeyCode::Char('P') => handle.adjust_period(-1)?,
        KeyCode::Char(' ') => {
            if board.clock_running() {
                handle.stop_clock()?;
            } else {
                handle.start_clock()?;
            }
        }
        KeyCode::Char('d') => handle.set_count_down(!board.count_down())?,
        KeyCode::Char('x') => {
            if board.count_down() {
                handle.set_clock(i32::from(console.period_minutes()), 0)?;
            } else {
                handle.set_clock(0, 0)?;
            }
        }
        _ => {}
    }
    Ok(())
}
