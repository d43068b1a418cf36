mod command;
mod machine;
mod events;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub use command::{Command, OperatorCommand};
pub use machine::{EngineCore, InboundOutcome, ModeChange};
pub use events::{EngineEvent, Health, LinkHealth, NetworkHealth, PeerStatus};

use crate::config::EngineConfig;
use crate::decoder::{HardwareLink, LinkHandle, LinkStats, LinkStatsSource, OpenLink, decoder_for};
use crate::net::{
    NetworkCounters, NetworkStats, NetworkTransport, Packet, SourceFilter, TransportStatus,
    TransportTasks,
};
use crate::state::{
    ControlMode, DisplayOptions, FieldMask, GameState, NetworkRole, Rgb, Scoreboard, SportMode,
    Team,
};
use crate::timing::sleep_until;

const EVENT_CAPACITY: usize = 256;
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("engine has shut down")]
pub struct EngineClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Shutdown,
}

/// Owner task for the game state. All mutation requests arrive on one
/// channel and are applied here in order, so readers only ever see whole
/// snapshots.
pub struct Engine {
    core: EngineCore,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<Arc<GameState>>,
    health_tx: watch::Sender<Health>,
    events: broadcast::Sender<EngineEvent>,
    outbound: watch::Sender<Option<Scoreboard>>,
    filter: watch::Sender<SourceFilter>,
    transport: Option<NetworkTransport>,
    tasks: Option<TransportTasks>,
    counters: Option<Arc<NetworkCounters>>,
    link: Option<LinkHandle>,
}

impl Engine {
    /// Spawns the owner task, the socket tasks and the serial reader. Must be
    /// called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        transport: Option<NetworkTransport>,
        link: Option<OpenLink>,
    ) -> io::Result<(EngineHandle, JoinHandle<()>)> {
        let session = transport.as_ref().map_or(0, NetworkTransport::session);
        let mut core = EngineCore::new(&config, session);
        if transport.is_some() {
            core.set_network_health(NetworkHealth::Ok);
        }
        if link.is_some() {
            core.set_link_health(LinkHealth::Waiting);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(Arc::new(core.state().clone()));
        let (health_tx, health_rx) = watch::channel(core.health().clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outbound_tx, outbound_rx) =
            watch::channel(core.publishes().then(|| core.board().clone()));
        let initial_filter = transport
            .as_ref()
            .map(|t| t.config().source_filter)
            .unwrap_or_default();
        let (filter_tx, filter_rx) = watch::channel(initial_filter);

        let link = match link {
            Some(open) => {
                log::info!("Reading scoreboard data from {}", open.path());
                Some(HardwareLink::spawn(
                    open,
                    decoder_for(config.sport),
                    command_tx.clone(),
                    state_rx.clone(),
                )?)
            }
            None => None,
        };
        let tasks = transport
            .as_ref()
            .map(|t| t.spawn(command_tx.clone(), outbound_rx, filter_rx));
        let counters = transport.as_ref().map(NetworkTransport::counters);

        let handle = EngineHandle {
            commands: command_tx,
            state: state_rx,
            health: health_rx,
            events: events.clone(),
            network: counters.clone(),
            link: link.as_ref().map(LinkHandle::stats_source),
        };

        log::info!("Engine started in {} mode", core.mode().as_str());
        let engine = Engine {
            core,
            commands: command_rx,
            state_tx,
            health_tx,
            events,
            outbound: outbound_tx,
            filter: filter_tx,
            transport,
            tasks,
            counters,
            link,
        };

        Ok((handle, tokio::spawn(engine.run())))
    }

    async fn run(mut self) {
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_tick = self.core.next_clock_tick();
            let step = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => Step::Shutdown,
                },
                _ = sleep_until(next_tick) => {
                    let fields = self.core.tick(Instant::now());
                    self.publish(fields);
                    Step::Continue
                }
                _ = housekeeping.tick() => {
                    self.core.check_peer(Instant::now());
                    Step::Continue
                }
            };
            self.publish_health();

            if step == Step::Shutdown {
                break;
            }
        }

        self.shutdown().await;
    }

    fn handle(&mut self, command: Command) -> Step {
        let now = Instant::now();
        match command {
            Command::Operator(op) => {
                let fields = self.core.apply_operator(&op, now);
                self.publish(fields);
            }
            Command::SetControlMode(control) => {
                let change = self.core.set_control_mode(control, now);
                self.mode_changed(change);
            }
            Command::SetNetworkRole(role) => {
                let change = self.core.set_network_role(role, now);
                self.mode_changed(change);
            }
            Command::SetDisplay(display) => {
                let fields = self.core.set_display(display);
                self.publish(fields);
            }
            Command::SetSourceFilter(filter) => {
                log::info!("Accepting packets from {}", filter);
                self.filter.send_replace(filter);
            }
            Command::Decoded(update) => {
                let fields = self.core.apply_decoded(update, now);
                self.publish(fields);
            }
            Command::Link(status) => {
                self.core.set_link_health(status.into());
            }
            Command::Inbound { from, packet } => self.inbound(from, &packet, now),
            Command::Transport(status) => {
                let network = match status {
                    TransportStatus::Recovered => NetworkHealth::Ok,
                    TransportStatus::SendFailed(reason) | TransportStatus::ReceiveFailed(reason) => {
                        NetworkHealth::Degraded { reason }
                    }
                };
                self.core.set_network_health(network);
            }
            Command::Shutdown => return Step::Shutdown,
        }
        Step::Continue
    }

    fn inbound(&mut self, from: SocketAddr, packet: &Packet, now: Instant) {
        match self.core.apply_inbound(from, packet, now) {
            InboundOutcome::Applied(fields) => self.publish(fields),
            InboundOutcome::Stale => {
                if let Some(counters) = &self.counters {
                    counters.record_stale();
                }
            }
            InboundOutcome::Rejected | InboundOutcome::Echo | InboundOutcome::PeerOffline => {}
        }
    }

    fn mode_changed(&mut self, change: ModeChange) {
        if !change.transition.changed() {
            return;
        }
        let _ = self.events.send(EngineEvent::ModeChanged {
            from: change.transition.from,
            to: change.transition.to,
        });
        self.publish(change.fields);

        // A new sender announces its whole state at once; a listener stops
        // heartbeating.
        let outbound = self.core.publishes().then(|| self.core.board().clone());
        self.outbound.send_replace(outbound);
    }

    fn publish(&mut self, fields: FieldMask) {
        if fields.is_empty() {
            return;
        }
        let state = Arc::new(self.core.state().clone());
        self.state_tx.send_replace(Arc::clone(&state));
        let _ = self.events.send(EngineEvent::Changed { fields, state });

        if self.core.publishes() && fields.intersects(FieldMask::replicated()) {
            self.outbound.send_replace(Some(self.core.board().clone()));
        }
    }

    fn publish_health(&mut self) {
        let current = self.core.health();
        let modified = self.health_tx.send_if_modified(|published| {
            if *published == *current {
                false
            } else {
                *published = current.clone();
                true
            }
        });
        if modified {
            log::info!(
                "Health: link {}, network {:?}, peer {}",
                current.link.as_str(),
                current.network,
                current.peer.as_str()
            );
            let _ = self.events.send(EngineEvent::Health(current.clone()));
        }
    }

    async fn shutdown(mut self) {
        log::info!("Shutting down");
        let _ = self.events.send(EngineEvent::ShuttingDown);

        self.core.halt_clock();
        if let Some(link) = &self.link {
            link.stop();
        }
        self.commands.close();

        // The last coalesced snapshot goes out before the offline notice,
        // and both share the failsafe window.
        if let Some(transport) = self.transport.take() {
            let window = transport.config().failsafe_window;
            let started = Instant::now();
            if let Some(tasks) = self.tasks.take() {
                tasks.shutdown(window).await;
            }
            let remaining = window.saturating_sub(started.elapsed());
            match transport.send_failsafe(remaining).await {
                Ok(()) => log::info!("Sent offline notice"),
                Err(e) => log::warn!("Offline notice not delivered: {}", e),
            }
        }

        if let Some(link) = self.link.take() {
            log::debug!("Closing serial link on {}", link.path());
            if tokio::task::spawn_blocking(move || link.join()).await.is_err() {
                log::error!("Failed to join serial link thread");
            }
        }
        log::info!("Engine stopped");
    }
}

/// Cloneable front end to the engine. Commands are queued and applied in
/// order; reads return the latest complete snapshot.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<Arc<GameState>>,
    health: watch::Receiver<Health>,
    events: broadcast::Sender<EngineEvent>,
    network: Option<Arc<NetworkCounters>>,
    link: Option<LinkStatsSource>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) -> Result<(), EngineClosed> {
        self.commands.send(command).map_err(|_| EngineClosed)
    }

    fn operator(&self, command: OperatorCommand) -> Result<(), EngineClosed> {
        self.send(Command::Operator(command))
    }

    pub fn set_score(&self, team: Team, value: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetScore { team, value })
    }

    pub fn adjust_score(&self, team: Team, delta: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::AdjustScore { team, delta })
    }

    pub fn set_fouls(&self, team: Team, value: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetFouls { team, value })
    }

    pub fn adjust_fouls(&self, team: Team, delta: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::AdjustFouls { team, delta })
    }

    pub fn set_period(&self, value: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetPeriod(value))
    }

    pub fn adjust_period(&self, delta: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::AdjustPeriod(delta))
    }

    pub fn set_clock(&self, minutes: i32, seconds: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetClock { minutes, seconds })
    }

    pub fn set_clock_tenths(&self, tenths: i32) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetClockTenths(tenths))
    }

    pub fn start_clock(&self) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::StartClock)
    }

    pub fn stop_clock(&self) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::StopClock)
    }

    pub fn set_count_down(&self, count_down: bool) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetCountDown(count_down))
    }

    pub fn set_shot_clock(&self, tenths: Option<i32>) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetShotClock(tenths))
    }

    pub fn set_sport_mode(&self, sport: SportMode) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetSport(sport))
    }

    pub fn set_team_name(&self, team: Team, name: impl Into<String>) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetTeamName {
            team,
            name: name.into(),
        })
    }

    pub fn set_team_color(&self, team: Team, color: Rgb) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetTeamColor { team, color })
    }

    pub fn set_team_logo(&self, team: Team, logo: impl Into<String>) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetTeamLogo {
            team,
            logo: logo.into(),
        })
    }

    pub fn set_font_family(&self, font: impl Into<String>) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetFontFamily(font.into()))
    }

    pub fn set_weight_class(&self, weight: impl Into<String>) -> Result<(), EngineClosed> {
        self.operator(OperatorCommand::SetWeightClass(weight.into()))
    }

    pub fn set_display_options(&self, display: DisplayOptions) -> Result<(), EngineClosed> {
        self.send(Command::SetDisplay(display))
    }

    pub fn set_control_mode(&self, control: ControlMode) -> Result<(), EngineClosed> {
        self.send(Command::SetControlMode(control))
    }

    pub fn set_network_role(&self, role: NetworkRole) -> Result<(), EngineClosed> {
        self.send(Command::SetNetworkRole(role))
    }

    pub fn set_source_filter(&self, filter: SourceFilter) -> Result<(), EngineClosed> {
        self.send(Command::SetSourceFilter(filter))
    }

    /// Arms the failsafe and stops the engine. Await the join handle returned
    /// by [`Engine::start`] to know when it has finished.
    pub fn request_shutdown(&self) -> Result<(), EngineClosed> {
        self.send(Command::Shutdown)
    }

    pub fn snapshot(&self) -> Arc<GameState> {
        Arc::clone(&self.state.borrow())
    }

    pub fn health(&self) -> Health {
        self.health.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<Arc<GameState>> {
        self.state.clone()
    }

    pub fn watch_health(&self) -> watch::Receiver<Health> {
        self.health.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn network_stats(&self) -> Option<NetworkStats> {
        self.network.as_ref().map(|c| c.snapshot())
    }

    pub fn link_stats(&self) -> Option<LinkStats> {
        self.link.as_ref().map(LinkStatsSource::snapshot)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;

    async fn changed_to<F>(rx: &mut watch::Receiver<Arc<GameState>>, check: F) -> Arc<GameState>
    where
        F: Fn(&GameState) -> bool,
    {
        let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| check(s)))
            .await
            .expect("timed out waiting for state")
            .expect("engine dropped");
        Arc::clone(&state)
    }

    #[tokio::test]
    async fn test_operator_edits_publish_snapshots() {
        let config = EngineConfig {
            initial_mode: Mode::Manual,
            ..Default::default()
        };
        let (handle, join) = Engine::start(config, None, None).unwrap();
        let mut events = handle.subscribe();
        let mut state = handle.watch_state();

        handle.set_score(Team::Home, 1500).unwrap();
        let snapshot = changed_to(&mut state, |s| s.board().team(Team::Home).score() != 0).await;
        assert_eq!(snapshot.board().team(Team::Home).score(), 999);

        match events.recv().await.unwrap() {
            EngineEvent::Changed { fields, .. } => assert_eq!(fields, FieldMask::HOME_SCORE),
            other => panic!("unexpected event {other:?}"),
        }

        handle.request_shutdown().unwrap();
        join.await.unwrap();
        assert!(handle.set_score(Team::Home, 1).is_err());
    }

    #[tokio::test]
    async fn test_listen_mode_ignores_operator() {
        let (handle, join) = Engine::start(EngineConfig::default(), None, None).unwrap();
        handle.set_score(Team::Away, 10).unwrap();
        handle.set_control_mode(ControlMode::Manual).unwrap();
        handle.set_score(Team::Away, 11).unwrap();

        let mut state = handle.watch_state();
        let snapshot = changed_to(&mut state, |s| s.board().team(Team::Away).score() != 0).await;
        assert_eq!(snapshot.board().team(Team::Away).score(), 11);
        assert_eq!(snapshot.network_role(), NetworkRole::Send);

        handle.request_shutdown().unwrap();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_clock_ticks_under_manual_authority() {
        let config = EngineConfig {
            initial_mode: Mode::Manual,
            ..Default::default()
        };
        let (handle, join) = Engine::start(config, None, None).unwrap();
        let mut state = handle.watch_state();

        handle.set_clock_tenths(5).unwrap();
        handle.start_clock().unwrap();
        let done = changed_to(&mut state, |s| s.board().clock_tenths() == 0).await;
        assert!(!done.board().clock_running());

        handle.request_shutdown().unwrap();
        join.await.unwrap();
    }
}
