use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serialport::{SerialPort, SerialPortType, UsbPortInfo};
use tokio::sync::{mpsc, watch};

use super::{DecoderStats, FrameDecoder};
use crate::config::LinkConfig;
use crate::engine::Command;
use crate::state::GameState;
use crate::timing::Backoff;

const PROLIFIC_VID: u16 = 0x067b;
const READ_CHUNK: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no serial device configured and no PL2303 adapter detected")]
    NotFound,
    #[error("failed to open serial device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Active,
    Silent,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub bytes_read: u64,
    pub frames_ok: u64,
    pub frames_dropped: u64,
    pub bytes_discarded: u64,
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct LinkCounters {
    bytes_read: AtomicU64,
    frames_ok: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_discarded: AtomicU64,
    reconnects: AtomicU64,
}

impl LinkCounters {
    fn record_decoder(&self, stats: &DecoderStats) {
        self.frames_ok.store(stats.frames_ok, Ordering::Relaxed);
        self.frames_dropped
            .store(stats.frames_dropped(), Ordering::Relaxed);
        self.bytes_discarded
            .store(stats.bytes_discarded, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_ok: self.frames_ok.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Tracks whether frames are still arriving.
#[derive(Debug)]
pub struct SilenceMonitor {
    threshold: Duration,
    last_frame: Option<Instant>,
    silent: bool,
}

impl SilenceMonitor {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_frame: Some(now),
            silent: false,
        }
    }

    pub fn on_frame(&mut self, now: Instant) -> Option<LinkStatus> {
        let was_quiet = self.silent || self.last_frame.is_none();
        self.last_frame = Some(now);
        self.silent = false;
        was_quiet.then_some(LinkStatus::Active)
    }

    pub fn poll(&mut self, now: Instant) -> Option<LinkStatus> {
        if self.silent {
            return None;
        }
        let last = self.last_frame?;
        if now.saturating_duration_since(last) >= self.threshold {
            self.silent = true;
            return Some(LinkStatus::Silent);
        }
        None
    }

    /// Forgets the last frame, e.g. after the device was reopened.
    pub fn reset(&mut self) {
        self.last_frame = None;
        self.silent = false;
    }
}

fn is_prolific(info: &UsbPortInfo) -> bool {
    let mentions = |text: &Option<String>| {
        text.as_deref().is_some_and(|t| {
            let lower = t.to_lowercase();
            lower.contains("prolific") || lower.contains("pl2303")
        })
    };
    info.vid == PROLIFIC_VID || mentions(&info.manufacturer) || mentions(&info.product)
}

/// Finds the first USB serial adapter that looks like a PL2303 cable.
pub fn detect_port() -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            log::warn!("Could not enumerate serial ports: {}", e);
            return None;
        }
    };
    ports
        .into_iter()
        .find(|port| matches!(&port.port_type, SerialPortType::UsbPort(info) if is_prolific(info)))
        .map(|port| port.port_name)
}

fn open_port(path: &str, config: &LinkConfig) -> Result<Box<dyn SerialPort>, LinkError> {
    serialport::new(path, config.baud_rate)
        .timeout(config.read_timeout)
        .open()
        .map_err(|source| LinkError::Open {
            path: path.to_owned(),
            source,
        })
}

/// A serial device opened at startup, not yet being read.
pub struct OpenLink {
    path: String,
    port: Box<dyn SerialPort>,
    config: LinkConfig,
}

impl OpenLink {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Reader thread for the scoreboard controller's serial line.
pub struct HardwareLink {
    path: String,
    config: LinkConfig,
    port: Box<dyn SerialPort>,
    decoder: Box<dyn FrameDecoder>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<Arc<GameState>>,
    running: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
}

impl HardwareLink {
    /// Opens the configured device, or the detected one. Failure here is a
    /// startup error for the caller to report.
    pub fn open(config: LinkConfig) -> Result<OpenLink, LinkError> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => detect_port().ok_or(LinkError::NotFound)?,
        };
        let port = open_port(&path, &config)?;
        log::info!("Opened serial device {} at {} baud", path, config.baud_rate);
        Ok(OpenLink { path, port, config })
    }

    pub(crate) fn spawn(
        link: OpenLink,
        decoder: Box<dyn FrameDecoder>,
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<Arc<GameState>>,
    ) -> io::Result<LinkHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(LinkCounters::default());
        let path = link.path.clone();

        let reader = HardwareLink {
            path: link.path,
            config: link.config,
            port: link.port,
            decoder,
            commands,
            state,
            running: Arc::clone(&running),
            counters: Arc::clone(&counters),
        };

        let thread = thread::Builder::new()
            .name("serial-link".into())
            .spawn(move || reader.run())?;

        Ok(LinkHandle {
            path,
            running,
            counters,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        let mut buf = [0u8; READ_CHUNK];
        let mut monitor = SilenceMonitor::new(self.config.silence_timeout, Instant::now());
        let mut backoff = Backoff::new(self.config.retry);

        while self.running.load(Ordering::SeqCst) {
            self.follow_sport();

            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    self.counters.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                    let updates = self.decoder.push(&buf[..n]);
                    self.counters.record_decoder(&self.decoder.stats());
                    if !updates.is_empty() {
                        if let Some(status) = monitor.on_frame(Instant::now()) {
                            self.report(status);
                        }
                    }
                    for update in updates {
                        if self.commands.send(Command::Decoded(update)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("Serial read on {} failed: {}", self.path, e);
                    self.report(LinkStatus::Failed);
                    if !self.reopen(&mut backoff) {
                        break;
                    }
                    monitor.reset();
                    continue;
                }
            }

            if let Some(status) = monitor.poll(Instant::now()) {
                log::warn!("No frames from {} for {:?}", self.path, self.config.silence_timeout);
                self.report(status);
            }
        }

        log::info!("Serial link on {} stopped", self.path);
    }

    fn follow_sport(&mut self) {
        if self.state.has_changed().unwrap_or(false) {
            let sport = self.state.borrow_and_update().board().sport();
            self.decoder.set_sport(sport);
        }
    }

    fn reopen(&mut self, backoff: &mut Backoff) -> bool {
        while self.running.load(Ordering::SeqCst) {
            thread::sleep(backoff.next_delay());
            match open_port(&self.path, &self.config) {
                Ok(port) => {
                    log::info!("Reopened serial device {}", self.path);
                    self.port = port;
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    backoff.reset();
                    return true;
                }
                Err(e) => log::debug!("{}", e),
            }
        }
        false
    }

    fn report(&self, status: LinkStatus) {
        let _ = self.commands.send(Command::Link(status));
    }
}

/// Owner-side handle to the reader thread. Dropping the handle does not stop
/// the thread; call `stop` and then `join`.
pub struct LinkHandle {
    path: String,
    running: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
    thread: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stats_source(&self) -> LinkStatsSource {
        LinkStatsSource(Arc::clone(&self.counters))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Waits for the thread to exit, which closes the serial handle.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Serial link thread panicked");
            }
        }
    }
}

/// Read-only view of link counters that outlives the handle.
#[derive(Clone)]
pub struct LinkStatsSource(Arc<LinkCounters>);

impl LinkStatsSource {
    pub fn snapshot(&self) -> LinkStats {
        self.0.snapshot()
    }
}
