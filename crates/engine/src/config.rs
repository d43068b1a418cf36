use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::mode::Mode;
use crate::net::{DEFAULT_PORT, SourceFilter};
use crate::state::{DisplayOptions, SportMode};
use crate::timing::BackoffConfig;

pub const DEFAULT_BAUD_RATE: u32 = 19_200;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_mode: Mode,
    pub sport: SportMode,
    pub display: DisplayOptions,
    /// A peer is reported silent after this long without a packet.
    pub peer_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_mode: Mode::AutomaticListen,
            sport: SportMode::Basketball,
            display: DisplayOptions::default(),
            peer_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub source_filter: SourceFilter,
    pub send_interval: Duration,
    pub heartbeat_interval: Duration,
    pub failsafe_window: Duration,
    pub retry: BackoffConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            peer_addr: SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_PORT)),
            source_filter: SourceFilter::any(),
            send_interval: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(1000),
            failsafe_window: Duration::from_millis(200),
            retry: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial device path; `None` auto-detects a PL2303 adapter.
    pub path: Option<String>,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub silence_timeout: Duration,
    pub retry: BackoffConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            path: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
            silence_timeout: Duration::from_secs(3),
            retry: BackoffConfig::default(),
        }
    }
}
