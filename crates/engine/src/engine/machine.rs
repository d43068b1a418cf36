use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::command::OperatorCommand;
use super::events::{Health, LinkHealth, NetworkHealth, PeerStatus};
use crate::clock::ClockEngine;
use crate::config::EngineConfig;
use crate::mode::{Mode, ModeArbiter, Source, Transition};
use crate::net::{Freshness, Packet, Payload, PeerTracker};
use crate::state::{
    ControlMode, DisplayOptions, FieldMask, FieldUpdate, GameState, MAX_CLOCK_TENTHS, NetworkRole,
    Scoreboard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Applied(FieldMask),
    /// Valid and fresh, but this instance is not listening.
    Rejected,
    Stale,
    Echo,
    PeerOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub transition: Transition,
    pub fields: FieldMask,
}

/// The single writer of `GameState`.
///
/// Every mutation goes through here and is gated by the arbiter. The core is
/// synchronous and takes `now` explicitly; the async owner loop in
/// [`super::Engine`] only feeds it messages and timer wakeups.
#[derive(Debug)]
pub struct EngineCore {
    state: GameState,
    arbiter: ModeArbiter,
    clock: ClockEngine,
    peers: PeerTracker,
    health: Health,
    peer_timeout: Duration,
}

impl EngineCore {
    pub fn new(config: &EngineConfig, own_session: u32) -> Self {
        let mut state = GameState::new(config.initial_mode);
        state.board_mut().set_sport(config.sport);
        state.set_display(config.display);
        Self {
            state,
            arbiter: ModeArbiter::new(config.initial_mode),
            clock: ClockEngine::new(),
            peers: PeerTracker::new(own_session),
            health: Health::default(),
            peer_timeout: config.peer_timeout,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn board(&self) -> &Scoreboard {
        self.state.board()
    }

    pub fn mode(&self) -> Mode {
        self.arbiter.mode()
    }

    pub fn arbiter(&self) -> &ModeArbiter {
        &self.arbiter
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn publishes(&self) -> bool {
        self.arbiter.publishes()
    }

    pub fn clock_is_ticking(&self) -> bool {
        self.clock.is_running()
    }

    pub fn next_clock_tick(&self) -> Option<Instant> {
        self.clock.next_tick_at()
    }

    pub fn set_control_mode(&mut self, control: ControlMode, now: Instant) -> ModeChange {
        let transition = self.arbiter.set_control_mode(control);
        self.after_transition(transition, now)
    }

    pub fn set_network_role(&mut self, role: NetworkRole, now: Instant) -> ModeChange {
        let transition = self.arbiter.set_network_role(role);
        self.after_transition(transition, now)
    }

    fn after_transition(&mut self, transition: Transition, now: Instant) -> ModeChange {
        let fields = self.state.set_mode(self.arbiter.mode());
        self.sync_clock(now);
        ModeChange { transition, fields }
    }

    /// The local clock only ticks under manual authority. Entering Manual
    /// with the clock flagged running continues from the shown value.
    fn sync_clock(&mut self, now: Instant) {
        let board = self.state.board();
        if !self.arbiter.clock_engine_enabled() {
            if self.clock.is_running() {
                log::debug!("Local clock stopped, authority moved to {}", self.arbiter.mode().as_str());
            }
            self.clock.stop();
        } else if board.clock_running() && !self.clock.is_running() {
            self.clock.start(now, board.clock_tenths(), board.count_down());
        }
    }

    /// Stops local ticking without touching the shown value.
    pub fn halt_clock(&mut self) {
        self.clock.stop();
    }

    pub fn set_display(&mut self, display: DisplayOptions) -> FieldMask {
        self.state.set_display(display)
    }

    pub fn apply_operator(&mut self, command: &OperatorCommand, now: Instant) -> FieldMask {
        if !self.arbiter.admit(Source::Operator) {
            return FieldMask::empty();
        }

        let board = self.state.board_mut();
        let mask = match command {
            OperatorCommand::SetScore { team, value } => board.set_score(*team, *value),
            OperatorCommand::AdjustScore { team, delta } => board.adjust_score(*team, *delta),
            OperatorCommand::SetFouls { team, value } => board.set_fouls(*team, *value),
            OperatorCommand::AdjustFouls { team, delta } => board.adjust_fouls(*team, *delta),
            OperatorCommand::SetPeriod(value) => board.set_period(*value),
            OperatorCommand::AdjustPeriod(delta) => {
                let period = board.period() as i32;
                board.set_period(period.saturating_add(*delta))
            }
            OperatorCommand::SetClock { minutes, seconds } => {
                let tenths = minutes
                    .saturating_mul(60)
                    .saturating_add(*seconds)
                    .saturating_mul(10);
                board.set_clock_tenths(tenths)
            }
            OperatorCommand::SetClockTenths(tenths) => board.set_clock_tenths(*tenths),
            OperatorCommand::StartClock => {
                let at_limit = if board.count_down() {
                    board.clock_tenths() == 0
                } else {
                    board.clock_tenths() == MAX_CLOCK_TENTHS
                };
                if at_limit {
                    log::debug!("Ignoring clock start at {}", board.clock_display());
                    FieldMask::empty()
                } else {
                    board.set_clock_running(true)
                }
            }
            OperatorCommand::StopClock => board.set_clock_running(false),
            OperatorCommand::SetCountDown(count_down) => board.set_count_down(*count_down),
            OperatorCommand::SetShotClock(tenths) => board.set_shot_clock_tenths(*tenths),
            OperatorCommand::SetSport(sport) => board.set_sport(*sport),
            OperatorCommand::SetTeamName { team, name } => board.set_team_name(*team, name),
            OperatorCommand::SetTeamColor { team, color } => board.set_team_color(*team, *color),
            OperatorCommand::SetTeamLogo { team, logo } => board.set_team_logo(*team, logo),
            OperatorCommand::SetFontFamily(font) => board.set_font_family(font),
            OperatorCommand::SetWeightClass(weight) => board.set_weight_class(weight),
        };

        if command.touches_clock() {
            self.reconcile_clock(mask, now);
        }
        mask
    }

    fn reconcile_clock(&mut self, mask: FieldMask, now: Instant) {
        if !self.arbiter.clock_engine_enabled() {
            return;
        }
        let board = self.state.board();
        if !board.clock_running() {
            self.clock.stop();
        } else if mask.contains(FieldMask::CLOCK_RUNNING) {
            self.clock.start(now, board.clock_tenths(), board.count_down());
        } else if mask.intersects(FieldMask::CLOCK | FieldMask::COUNT_DOWN) {
            self.clock.rebase(now, board.clock_tenths(), board.count_down());
        }
    }

    /// Applies one decoded hardware frame as a unit.
    pub fn apply_decoded(&mut self, update: FieldUpdate, now: Instant) -> FieldMask {
        if !self.arbiter.admit(Source::Decoder) {
            return FieldMask::empty();
        }
        let mut update = update;
        if self.arbiter.clock_engine_enabled() {
            // The local clock owns running state under manual authority.
            update.clock_running = None;
        }
        let mask = self.state.board_mut().apply(&update);
        if mask.contains(FieldMask::CLOCK) {
            let board = self.state.board();
            self.clock.rebase(now, board.clock_tenths(), board.count_down());
        }
        mask
    }

    pub fn apply_inbound(&mut self, from: SocketAddr, packet: &Packet, now: Instant) -> InboundOutcome {
        match self.peers.classify(from, packet.header, now) {
            Freshness::OwnEcho => return InboundOutcome::Echo,
            Freshness::Stale => return InboundOutcome::Stale,
            Freshness::Fresh | Freshness::NewSession => {}
        }

        match &packet.payload {
            Payload::Offline => {
                log::info!("Peer {} went offline", from);
                self.health.peer = PeerStatus::Offline;
                InboundOutcome::PeerOffline
            }
            Payload::Snapshot(board) => {
                self.health.peer = PeerStatus::Online;
                if !self.arbiter.admit(Source::Network) {
                    return InboundOutcome::Rejected;
                }
                InboundOutcome::Applied(self.state.board_mut().merge_from(board))
            }
        }
    }

    /// Advances the local clock to `now`.
    pub fn tick(&mut self, now: Instant) -> FieldMask {
        if !self.arbiter.clock_engine_enabled() {
            self.clock.stop();
            return FieldMask::empty();
        }
        let Some(step) = self.clock.advance(now) else {
            return FieldMask::empty();
        };
        let board = self.state.board_mut();
        let mut mask = board.set_clock_tenths(step.tenths as i32);
        if step.expired {
            log::info!("Clock expired at {}", board.clock_display());
            mask |= board.set_clock_running(false);
        }
        mask
    }

    /// Marks a quiet peer as silent. Returns whether health changed.
    pub fn check_peer(&mut self, now: Instant) -> bool {
        if self.health.peer == PeerStatus::Online && self.peers.is_timed_out(now, self.peer_timeout) {
            log::warn!("No packets from peer for {:?}", self.peer_timeout);
            self.health.peer = PeerStatus::Silent;
            return true;
        }
        false
    }

    pub fn set_link_health(&mut self, link: LinkHealth) -> bool {
        if self.health.link == link {
            return false;
        }
        self.health.link = link;
        true
    }

    pub fn set_network_health(&mut self, network: NetworkHealth) -> bool {
        if self.health.network == network {
            return false;
        }
        self.health.network = network;
        true
    }
}
