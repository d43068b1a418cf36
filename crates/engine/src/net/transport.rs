use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::filter::SourceFilter;
use super::pacing::Coalescer;
use super::protocol::{MAX_PACKET_SIZE, Packet, PacketError, PacketHeader, Payload, encode_snapshot};
use super::stats::{NetworkCounters, NetworkStats, rand_u32};
use crate::config::TransportConfig;
use crate::engine::Command;
use crate::state::Scoreboard;
use crate::timing::{Backoff, sleep_until};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure UDP socket: {0}")]
    Configure(#[source] io::Error),
    #[error("UDP send failed: {0}")]
    Send(#[source] io::Error),
    #[error("UDP receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error("offline notice not sent within {0:?}")]
    FailsafeTimeout(Duration),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Reported by the socket tasks to the owner so it can update `Health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    SendFailed(String),
    ReceiveFailed(String),
    Recovered,
}

pub(crate) struct TransportTasks {
    receive: JoinHandle<()>,
    send: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl TransportTasks {
    /// Stops receiving, lets the send task flush a snapshot still held back
    /// by pacing, and waits until both tasks have released the socket. The
    /// flush is abandoned after `window`.
    pub(crate) async fn shutdown(self, window: Duration) {
        let TransportTasks {
            receive,
            mut send,
            stop,
        } = self;
        receive.abort();
        let _ = stop.send(());
        if tokio::time::timeout(window, &mut send).await.is_err() {
            log::warn!("Pending snapshot not flushed within {:?}", window);
            send.abort();
            let _ = send.await;
        }
        let _ = receive.await;
    }
}

/// UDP replication endpoint. One socket serves both directions; the owner
/// decides whether anything is published.
pub struct NetworkTransport {
    socket: Arc<UdpSocket>,
    config: TransportConfig,
    session: u32,
    sequence: Arc<AtomicU32>,
    counters: Arc<NetworkCounters>,
}

impl NetworkTransport {
    pub async fn bind(config: TransportConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        if config.peer_addr.is_ipv4() {
            socket
                .set_broadcast(true)
                .map_err(TransportError::Configure)?;
        }

        let session = rand_u32();
        log::info!(
            "UDP transport on {} -> {} (session {:08x}, filter {})",
            socket.local_addr().map_err(TransportError::Configure)?,
            config.peer_addr,
            session,
            config.source_filter
        );

        Ok(Self {
            socket: Arc::new(socket),
            config,
            session,
            sequence: Arc::new(AtomicU32::new(0)),
            counters: Arc::new(NetworkCounters::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn stats(&self) -> NetworkStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<NetworkCounters> {
        Arc::clone(&self.counters)
    }

    fn next_header(&self) -> PacketHeader {
        PacketHeader::new(self.session, next_sequence(&self.sequence))
    }

    pub(crate) fn spawn(
        &self,
        commands: mpsc::UnboundedSender<Command>,
        outbound: watch::Receiver<Option<Scoreboard>>,
        filter: watch::Receiver<SourceFilter>,
    ) -> TransportTasks {
        let (stop_tx, stop_rx) = oneshot::channel();
        let receiver = Receiver {
            socket: Arc::clone(&self.socket),
            counters: Arc::clone(&self.counters),
            commands: commands.clone(),
            filter,
            backoff: Backoff::new(self.config.retry),
        };
        let sender = Sender {
            socket: Arc::clone(&self.socket),
            peer: self.config.peer_addr,
            session: self.session,
            sequence: Arc::clone(&self.sequence),
            counters: Arc::clone(&self.counters),
            commands,
            outbound,
            stop: stop_rx,
            pacing: Coalescer::new(self.config.send_interval, self.config.heartbeat_interval),
            backoff: Backoff::new(self.config.retry),
            retry_at: None,
        };

        TransportTasks {
            receive: tokio::spawn(receiver.run()),
            send: tokio::spawn(sender.run()),
            stop: stop_tx,
        }
    }

    /// Sends one offline notice, giving up after `window`.
    pub async fn send_failsafe(&self, window: Duration) -> Result<(), TransportError> {
        let bytes = Packet::new(self.next_header(), Payload::Offline).encode()?;
        let send = self.socket.send_to(&bytes, self.config.peer_addr);
        match tokio::time::timeout(window, send).await {
            Ok(Ok(len)) => {
                self.counters.record_sent(len);
                Ok(())
            }
            Ok(Err(e)) => {
                self.counters.record_send_error();
                Err(TransportError::Send(e))
            }
            Err(_) => Err(TransportError::FailsafeTimeout(window)),
        }
    }
}

fn next_sequence(sequence: &AtomicU32) -> u32 {
    sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

struct Receiver {
    socket: Arc<UdpSocket>,
    counters: Arc<NetworkCounters>,
    commands: mpsc::UnboundedSender<Command>,
    filter: watch::Receiver<SourceFilter>,
    backoff: Backoff,
}

impl Receiver {
    async fn run(mut self) {
        // One spare byte so an over-long datagram is seen as such.
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    if self.backoff.is_backing_off() {
                        self.backoff.reset();
                        log::info!("UDP receive recovered");
                        self.report(TransportStatus::Recovered);
                    }
                    if !self.handle_datagram(&buf[..len], from) {
                        break;
                    }
                }
                Err(e) => {
                    self.counters.record_receive_error();
                    let delay = self.backoff.next_delay();
                    log::warn!("UDP receive failed: {} (retrying in {:?})", e, delay);
                    self.report(TransportStatus::ReceiveFailed(e.to_string()));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Returns false once the owner has gone away.
    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) -> bool {
        if !self.filter.borrow().accepts(&from) {
            self.counters.record_filtered();
            log::trace!("Dropped {} bytes from filtered sender {}", data.len(), from);
            return true;
        }
        if data.len() > MAX_PACKET_SIZE {
            self.counters.record_malformed();
            log::debug!("Dropped oversized datagram from {}", from);
            return true;
        }
        match Packet::decode(data) {
            Ok(packet) => {
                self.counters.record_received(data.len());
                self.commands.send(Command::Inbound { from, packet }).is_ok()
            }
            Err(e) => {
                self.counters.record_malformed();
                log::debug!("Dropped packet from {}: {}", from, e);
                true
            }
        }
    }

    fn report(&self, status: TransportStatus) {
        let _ = self.commands.send(Command::Transport(status));
    }
}

struct Sender {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    session: u32,
    sequence: Arc<AtomicU32>,
    counters: Arc<NetworkCounters>,
    commands: mpsc::UnboundedSender<Command>,
    outbound: watch::Receiver<Option<Scoreboard>>,
    stop: oneshot::Receiver<()>,
    pacing: Coalescer,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl Sender {
    async fn run(mut self) {
        if self.outbound.borrow_and_update().is_some() {
            self.pacing.mark_dirty();
        }

        loop {
            let has_payload = self.outbound.borrow().is_some();
            let due = self
                .pacing
                .next_send_at(Instant::now(), has_payload)
                .map(|due| self.retry_at.map_or(due, |retry| due.max(retry)));

            tokio::select! {
                _ = &mut self.stop => {
                    self.flush().await;
                    break;
                }
                changed = self.outbound.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if self.outbound.borrow_and_update().is_some() {
                        self.pacing.mark_dirty();
                    } else {
                        self.pacing.reset();
                    }
                }
                _ = sleep_until(due) => self.send_latest().await,
            }
        }
    }

    /// Sends the newest snapshot once more if pacing was still holding it.
    async fn flush(&mut self) {
        if self.outbound.has_changed().unwrap_or(false)
            && self.outbound.borrow_and_update().is_some()
        {
            self.pacing.mark_dirty();
        }
        if self.pacing.is_dirty() {
            log::debug!("Flushing pending snapshot to {}", self.peer);
            self.send_latest().await;
        }
    }

    async fn send_latest(&mut self) {
        let latest = self.outbound.borrow().clone();
        let Some(board) = latest else {
            return;
        };
        let header = PacketHeader::new(self.session, next_sequence(&self.sequence));

        let bytes = match encode_snapshot(header, &board) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Could not encode snapshot: {}", e);
                self.pacing.record_sent(Instant::now());
                return;
            }
        };

        match self.socket.send_to(&bytes, self.peer).await {
            Ok(len) => {
                self.counters.record_sent(len);
                self.pacing.record_sent(Instant::now());
                if self.backoff.is_backing_off() {
                    self.backoff.reset();
                    self.retry_at = None;
                    log::info!("UDP send to {} recovered", self.peer);
                    let _ = self
                        .commands
                        .send(Command::Transport(TransportStatus::Recovered));
                }
            }
            Err(e) => {
                self.counters.record_send_error();
                let delay = self.backoff.next_delay();
                self.retry_at = Some(Instant::now() + delay);
                log::warn!("UDP send to {} failed: {} (retrying in {:?})", self.peer, e, delay);
                let _ = self
                    .commands
                    .send(Command::Transport(TransportStatus::SendFailed(e.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            peer_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failsafe_sends_offline_notice() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut config = loopback_config();
        config.peer_addr = listener.local_addr().unwrap();

        let transport = NetworkTransport::bind(config).await.unwrap();
        transport
            .send_failsafe(Duration::from_millis(200))
            .await
            .unwrap();

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        let packet = Packet::decode(&buf[..len]).unwrap();
        assert_eq!(packet.payload, Payload::Offline);
        assert_eq!(packet.header.session, transport.session());
        assert_eq!(transport.stats().packets_sent, 1);
    }

    #[tokio::test]
    async fn test_oversized_datagram_dropped() {
        let transport = NetworkTransport::bind(loopback_config()).await.unwrap();
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound_rx) = watch::channel(None);
        let (_filter_tx, filter_rx) = watch::channel(SourceFilter::any());
        let tasks = transport.spawn(commands_tx, outbound_rx, filter_rx);

        let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let target = transport.local_addr().unwrap();
        let mut oversized = Packet::new(PacketHeader::new(7, 1), Payload::Offline)
            .encode()
            .unwrap()
            .to_vec();
        oversized.resize(MAX_PACKET_SIZE + 1, 0);
        peer.send_to(&oversized, target).await.unwrap();
        let valid = Packet::new(PacketHeader::new(7, 2), Payload::Offline)
            .encode()
            .unwrap();
        peer.send_to(&valid, target).await.unwrap();

        let command = tokio::time::timeout(Duration::from_secs(1), commands_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match command {
            Command::Inbound { packet, .. } => assert_eq!(packet.header.sequence, 2),
            other => panic!("unexpected command {:?}", other),
        }
        let stats = transport.stats();
        assert_eq!(stats.packets_malformed, 1);
        assert_eq!(stats.packets_received, 1);

        tasks.shutdown(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut config = loopback_config();
        config.bind_addr = first.local_addr().unwrap();
        let err = NetworkTransport::bind(config).await.err().unwrap();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
