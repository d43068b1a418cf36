use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use everscore::{
    Command, Engine, EngineConfig, EngineHandle, FieldUpdate, GameState, Mode, NetworkTransport,
    Packet, Payload, PeerStatus, SourceFilter, Team, TransportConfig,
};

/// Default send pacing interval, doubled, plus scheduling slack.
fn one_send_window_ms() -> u64 {
    let interval = TransportConfig::default().send_interval.as_millis() as u64;
    interval * 2 + 50
}

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

async fn start_peer(
    port: u16,
    peer_port: u16,
    mode: Mode,
    filter: SourceFilter,
) -> (EngineHandle, JoinHandle<()>) {
    let transport = NetworkTransport::bind(TransportConfig {
        bind_addr: loopback(port),
        peer_addr: loopback(peer_port),
        source_filter: filter,
        ..Default::default()
    })
    .await
    .unwrap();
    let config = EngineConfig {
        initial_mode: mode,
        ..Default::default()
    };
    Engine::start(config, Some(transport), None).unwrap()
}

async fn wait_for_state<F>(handle: &EngineHandle, timeout_ms: u64, check: F) -> Option<Arc<GameState>>
where
    F: Fn(&GameState) -> bool,
{
    let mut rx = handle.watch_state();
    let waited = tokio::time::timeout(Duration::from_millis(timeout_ms), rx.wait_for(|s| check(s))).await;
    match waited {
        Ok(Ok(state)) => Some(Arc::clone(&state)),
        _ => None,
    }
}

async fn shutdown(handle: EngineHandle, join: JoinHandle<()>) {
    handle.request_shutdown().unwrap();
    tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("engine did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_decoded_score_reaches_listener() {
    let port = next_port();
    let (sender, sender_join) = start_peer(port, port + 1, Mode::AutomaticSend, SourceFilter::any()).await;
    let (listener, listener_join) =
        start_peer(port + 1, port, Mode::AutomaticListen, SourceFilter::any()).await;

    sender
        .send(Command::Decoded(FieldUpdate {
            home_score: Some(42),
            ..Default::default()
        }))
        .unwrap();

    let state = wait_for_state(&listener, one_send_window_ms(), |s| {
        s.board().team(Team::Home).score() == 42
    })
        .await
        .expect("listener never saw the score");
    assert_eq!(state.board().team(Team::Away).score(), 0);
    assert_eq!(listener.health().peer, PeerStatus::Online);

    shutdown(sender, sender_join).await;
    shutdown(listener, listener_join).await;
}

#[tokio::test]
async fn test_source_filter_discards_other_senders() {
    let port = next_port();
    let blocked = SourceFilter::only("10.0.0.5".parse().unwrap());
    let (sender, sender_join) = start_peer(port, port + 1, Mode::Manual, SourceFilter::any()).await;
    let (listener, listener_join) = start_peer(port + 1, port, Mode::AutomaticListen, blocked).await;

    sender.set_score(Team::Home, 7).unwrap();
    assert!(
        wait_for_state(&listener, 300, |s| s.board().team(Team::Home).score() == 7)
            .await
            .is_none()
    );
    let stats = listener.network_stats().unwrap();
    assert!(stats.packets_filtered > 0);
    assert_eq!(stats.packets_received, 0);

    listener
        .set_source_filter(SourceFilter::only(Ipv4Addr::LOCALHOST.into()))
        .unwrap();
    sender.set_score(Team::Home, 8).unwrap();
    assert!(
        wait_for_state(&listener, 1000, |s| s.board().team(Team::Home).score() == 8)
            .await
            .is_some()
    );

    shutdown(sender, sender_join).await;
    shutdown(listener, listener_join).await;
}

#[tokio::test]
async fn test_burst_of_edits_is_coalesced() {
    let port = next_port();
    let raw = UdpSocket::bind(loopback(port + 1)).await.unwrap();
    let (sender, sender_join) = start_peer(port, port + 1, Mode::Manual, SourceFilter::any()).await;

    for _ in 0..20 {
        sender.adjust_score(Team::Away, 1).unwrap();
    }

    let mut buf = [0u8; 1500];
    let mut snapshots = 0;
    let mut last_score = None;
    while last_score != Some(20) {
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), raw.recv_from(&mut buf))
            .await
            .expect("no packet")
            .unwrap();
        if let Payload::Snapshot(board) = Packet::decode(&buf[..len]).unwrap().payload {
            snapshots += 1;
            last_score = Some(board.team(Team::Away).score());
        }
    }
    assert!(snapshots <= 4, "{snapshots} snapshots for one burst");

    shutdown(sender, sender_join).await;
}

#[tokio::test]
async fn test_offline_notice_on_shutdown() {
    let port = next_port();
    let (sender, sender_join) = start_peer(port, port + 1, Mode::Manual, SourceFilter::any()).await;
    let (listener, listener_join) =
        start_peer(port + 1, port, Mode::AutomaticListen, SourceFilter::any()).await;

    sender.set_score(Team::Home, 42).unwrap();
    wait_for_state(&listener, 1000, |s| s.board().team(Team::Home).score() == 42)
        .await
        .expect("score not replicated");

    shutdown(sender, sender_join).await;

    let mut health = listener.watch_health();
    tokio::time::timeout(
        Duration::from_secs(1),
        health.wait_for(|h| h.peer == PeerStatus::Offline),
    )
    .await
    .expect("offline notice not seen")
    .unwrap();
    assert_eq!(listener.snapshot().board().team(Team::Home).score(), 42);

    shutdown(listener, listener_join).await;
}

#[tokio::test]
async fn test_last_edit_sent_before_offline_notice() {
    let port = next_port();
    let (sender, sender_join) = start_peer(port, port + 1, Mode::Manual, SourceFilter::any()).await;
    let (listener, listener_join) =
        start_peer(port + 1, port, Mode::AutomaticListen, SourceFilter::any()).await;

    sender.set_score(Team::Home, 1).unwrap();
    wait_for_state(&listener, 1000, |s| s.board().team(Team::Home).score() == 1)
        .await
        .expect("first score not replicated");

    // Lands inside the pacing window of the previous send.
    sender.set_score(Team::Home, 2).unwrap();
    shutdown(sender, sender_join).await;

    let mut health = listener.watch_health();
    tokio::time::timeout(
        Duration::from_secs(1),
        health.wait_for(|h| h.peer == PeerStatus::Offline),
    )
    .await
    .expect("offline notice not seen")
    .unwrap();
    assert_eq!(listener.snapshot().board().team(Team::Home).score(), 2);

    shutdown(listener, listener_join).await;
}

#[tokio::test]
async fn test_listener_does_not_rebroadcast() {
    let port = next_port();
    let raw = UdpSocket::bind(loopback(port + 1)).await.unwrap();
    let (listener, listener_join) = start_peer(port, port + 1, Mode::AutomaticListen, SourceFilter::any()).await;

    let mut buf = [0u8; 1500];
    let quiet = tokio::time::timeout(Duration::from_millis(300), raw.recv_from(&mut buf)).await;
    assert!(quiet.is_err(), "listener sent a packet");

    shutdown(listener, listener_join).await;
}

#[tokio::test]
async fn test_shutdown_completes_without_peer() {
    let port = next_port();
    let transport = NetworkTransport::bind(TransportConfig {
        bind_addr: loopback(port),
        peer_addr: SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), port)),
        failsafe_window: Duration::from_millis(200),
        ..Default::default()
    })
    .await
    .unwrap();
    let config = EngineConfig {
        initial_mode: Mode::Manual,
        ..Default::default()
    };
    let (handle, join) = Engine::start(config, Some(transport), None).unwrap();
    shutdown(handle, join).await;
}
