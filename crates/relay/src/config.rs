use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;

use everscore::{EngineConfig, LinkConfig, Mode, SourceFilter, SportMode, TransportConfig};

pub const DEFAULT_PERIOD_MINUTES: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Send,
    Listen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SportArg {
    Volleyball,
    Basketball,
    Wrestling,
}

impl From<SportArg> for SportMode {
    fn from(sport: SportArg) -> Self {
        match sport {
            SportArg::Volleyball => SportMode::Volleyball,
            SportArg::Basketball => SportMode::Basketball,
            SportArg::Wrestling => SportMode::Wrestling,
        }
    }
}

/// How the serial device is chosen at startup.
#[derive(Debug, Clone)]
pub enum LinkSelection {
    Disabled,
    /// Auto-detect; a missing adapter is not an error.
    Detect(LinkConfig),
    /// Given on the command line; failing to open it is fatal.
    Explicit(LinkConfig),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub engine: EngineConfig,
    pub transport: TransportConfig,
    pub link: LinkSelection,
    pub period_minutes: u16,
}

pub struct RelayOptions<'a> {
    pub bind: IpAddr,
    pub port: u16,
    pub peer: Option<&'a str>,
    pub role: RoleArg,
    pub manual: bool,
    pub allow_from: Option<IpAddr>,
    pub serial: Option<String>,
    pub no_serial: bool,
    pub baud: u32,
    pub sport: SportArg,
    pub period_minutes: u16,
    pub send_interval_ms: u64,
    pub heartbeat_ms: u64,
    pub failsafe_ms: u64,
}

impl RelayConfig {
    pub fn from_options(options: RelayOptions<'_>) -> Result<Self> {
        if options.period_minutes == 0 || options.period_minutes > 99 {
            bail!("period length must be between 1 and 99 minutes");
        }
        if options.send_interval_ms == 0 {
            bail!("send interval must be at least 1 ms");
        }

        let peer_addr = match options.peer {
            Some(peer) => parse_peer(peer, options.port)?,
            None => SocketAddr::from(([255, 255, 255, 255], options.port)),
        };
        let source_filter = options
            .allow_from
            .map_or_else(SourceFilter::any, SourceFilter::only);

        let transport = TransportConfig {
            bind_addr: SocketAddr::new(options.bind, options.port),
            peer_addr,
            source_filter,
            send_interval: Duration::from_millis(options.send_interval_ms),
            heartbeat_interval: Duration::from_millis(options.heartbeat_ms),
            failsafe_window: Duration::from_millis(options.failsafe_ms),
            ..Default::default()
        };

        let initial_mode = match (options.manual, options.role) {
            (true, _) => Mode::Manual,
            (false, RoleArg::Send) => Mode::AutomaticSend,
            (false, RoleArg::Listen) => Mode::AutomaticListen,
        };
        let engine = EngineConfig {
            initial_mode,
            sport: options.sport.into(),
            ..Default::default()
        };

        let link_config = LinkConfig {
            baud_rate: options.baud,
            path: options.serial.clone(),
            ..Default::default()
        };
        let link = match (options.no_serial, options.serial) {
            (true, _) => LinkSelection::Disabled,
            (false, Some(_)) => LinkSelection::Explicit(link_config),
            (false, None) => LinkSelection::Detect(link_config),
        };

        Ok(Self {
            engine,
            transport,
            link,
            period_minutes: options.period_minutes,
        })
    }
}

/// Accepts `ip:port` or a bare `ip`, which then uses the shared port.
fn parse_peer(peer: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = peer
        .parse()
        .with_context(|| format!("invalid peer address '{}'", peer))?;
    Ok(SocketAddr::new(ip, port))
}
