mod clock;
mod team;

use bitflags::bitflags;

use crate::mode::Mode;

pub use clock::{ClockDisplay, is_fast_clock};
pub use team::{Rgb, Team, TeamState};

use team::replace;

pub const MAX_SCORE: u16 = 999;
pub const MAX_FOULS: u8 = 99;
pub const MAX_PERIOD: u8 = 9;
pub const MAX_CLOCK_TENTHS: u16 = 59_999;
pub const MAX_SHOT_CLOCK_TENTHS: u16 = 999;
pub const FAST_CLOCK_THRESHOLD_TENTHS: u16 = 600;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_LOGO_LEN: usize = 64;
pub const MAX_FONT_LEN: usize = 64;
pub const MAX_WEIGHT_CLASS_LEN: usize = 32;

bitflags! {
    /// Set of fields touched by one accepted mutation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldMask: u32 {
        const HOME_SCORE = 1 << 0;
        const AWAY_SCORE = 1 << 1;
        const HOME_FOULS = 1 << 2;
        const AWAY_FOULS = 1 << 3;
        const PERIOD = 1 << 4;
        const CLOCK = 1 << 5;
        const CLOCK_RUNNING = 1 << 6;
        const COUNT_DOWN = 1 << 7;
        const FAST_CLOCK = 1 << 8;
        const SHOT_CLOCK = 1 << 9;
        const WEIGHT_CLASS = 1 << 10;
        const SPORT_MODE = 1 << 11;
        const HOME_NAME = 1 << 12;
        const AWAY_NAME = 1 << 13;
        const HOME_COLOR = 1 << 14;
        const AWAY_COLOR = 1 << 15;
        const HOME_LOGO = 1 << 16;
        const AWAY_LOGO = 1 << 17;
        const FONT = 1 << 18;
        const CONTROL_MODE = 1 << 19;
        const NETWORK_ROLE = 1 << 20;
        const DISPLAY = 1 << 21;
    }
}

impl FieldMask {
    pub fn score(team: Team) -> Self {
        match team {
            Team::Home => Self::HOME_SCORE,
            Team::Away => Self::AWAY_SCORE,
        }
    }

    pub fn fouls(team: Team) -> Self {
        match team {
            Team::Home => Self::HOME_FOULS,
            Team::Away => Self::AWAY_FOULS,
        }
    }

    pub fn name(team: Team) -> Self {
        match team {
            Team::Home => Self::HOME_NAME,
            Team::Away => Self::AWAY_NAME,
        }
    }

    pub fn color(team: Team) -> Self {
        match team {
            Team::Home => Self::HOME_COLOR,
            Team::Away => Self::AWAY_COLOR,
        }
    }

    pub fn logo(team: Team) -> Self {
        match team {
            Team::Home => Self::HOME_LOGO,
            Team::Away => Self::AWAY_LOGO,
        }
    }

    /// Fields carried in a snapshot packet.
    pub fn replicated() -> Self {
        Self::all() - (Self::CONTROL_MODE | Self::NETWORK_ROLE | Self::DISPLAY)
    }

    fn when(self, changed: bool) -> Self {
        if changed { self } else { Self::empty() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SportMode {
    Volleyball,
    #[default]
    Basketball,
    Wrestling,
}

impl SportMode {
    pub const ALL: [SportMode; 3] = [
        SportMode::Volleyball,
        SportMode::Basketball,
        SportMode::Wrestling,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            SportMode::Volleyball => 0,
            SportMode::Basketball => 1,
            SportMode::Wrestling => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SportMode::Volleyball),
            1 => Some(SportMode::Basketball),
            2 => Some(SportMode::Wrestling),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SportMode::Volleyball => "volleyball",
            SportMode::Basketball => "basketball",
            SportMode::Wrestling => "wrestling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkRole {
    Send,
    #[default]
    Listen,
}

/// Local per-sport presentation toggles. Never replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    pub show_shot_clock: bool,
    pub show_fouls: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            show_shot_clock: true,
            show_fouls: true,
        }
    }
}

/// Partial update produced by a hardware frame. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub home_fouls: Option<i32>,
    pub away_fouls: Option<i32>,
    pub period: Option<i32>,
    pub clock_tenths: Option<i32>,
    pub clock_running: Option<bool>,
    pub shot_clock_tenths: Option<i32>,
    pub weight_class: Option<String>,
}

impl FieldUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The replicated part of the game state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoreboard {
    home: TeamState,
    away: TeamState,
    period: u8,
    clock_tenths: u16,
    clock_running: bool,
    count_down: bool,
    shot_clock_tenths: Option<u16>,
    weight_class: String,
    sport: SportMode,
    font_family: String,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self {
            home: TeamState::default(),
            away: TeamState::default(),
            period: 0,
            clock_tenths: 0,
            clock_running: false,
            count_down: true,
            shot_clock_tenths: None,
            weight_class: String::new(),
            sport: SportMode::default(),
            font_family: String::new(),
        }
    }
}

impl Scoreboard {
    pub fn team(&self, team: Team) -> &TeamState {
        match team {
            Team::Home => &self.home,
            Team::Away => &self.away,
        }
    }

    fn team_mut(&mut self, team: Team) -> &mut TeamState {
        match team {
            Team::Home => &mut self.home,
            Team::Away => &mut self.away,
        }
    }

    pub fn period(&self) -> u8 {
        self.period
    }

    pub fn clock_tenths(&self) -> u16 {
        self.clock_tenths
    }

    pub fn clock_running(&self) -> bool {
        self.clock_running
    }

    pub fn count_down(&self) -> bool {
        self.count_down
    }

    pub fn fast_clock(&self) -> bool {
        is_fast_clock(self.clock_tenths)
    }

    pub fn clock_display(&self) -> ClockDisplay {
        ClockDisplay::from_tenths(self.clock_tenths)
    }

    pub fn shot_clock_tenths(&self) -> Option<u16> {
        self.shot_clock_tenths
    }

    pub fn weight_class(&self) -> &str {
        &self.weight_class
    }

    pub fn sport(&self) -> SportMode {
        self.sport
    }

    pub fn font_family(&self) -> &str {
        &self.font_family
    }

    pub fn set_score(&mut self, team: Team, value: i32) -> FieldMask {
        let changed = self.team_mut(team).set_score(value);
        FieldMask::score(team).when(changed)
    }

    pub fn adjust_score(&mut self, team: Team, delta: i32) -> FieldMask {
        let current = self.team(team).score() as i32;
        self.set_score(team, current.saturating_add(delta))
    }

    pub fn set_fouls(&mut self, team: Team, value: i32) -> FieldMask {
        let changed = self.team_mut(team).set_fouls(value);
        FieldMask::fouls(team).when(changed)
    }

    pub fn adjust_fouls(&mut self, team: Team, delta: i32) -> FieldMask {
        let current = self.team(team).fouls() as i32;
        self.set_fouls(team, current.saturating_add(delta))
    }

    pub fn set_period(&mut self, value: i32) -> FieldMask {
        let clamped = value.clamp(0, MAX_PERIOD as i32) as u8;
        FieldMask::PERIOD.when(replace(&mut self.period, clamped))
    }

    /// Sets the clock and flags a fast-clock flip alongside the value change.
    pub fn set_clock_tenths(&mut self, value: i32) -> FieldMask {
        let clamped = value.clamp(0, MAX_CLOCK_TENTHS as i32) as u16;
        let was_fast = self.fast_clock();
        let mut mask = FieldMask::CLOCK.when(replace(&mut self.clock_tenths, clamped));
        if was_fast != self.fast_clock() {
            mask |= FieldMask::FAST_CLOCK;
        }
        mask
    }

    pub fn set_clock_running(&mut self, running: bool) -> FieldMask {
        FieldMask::CLOCK_RUNNING.when(replace(&mut self.clock_running, running))
    }

    pub fn set_count_down(&mut self, count_down: bool) -> FieldMask {
        FieldMask::COUNT_DOWN.when(replace(&mut self.count_down, count_down))
    }

    pub fn set_shot_clock_tenths(&mut self, value: Option<i32>) -> FieldMask {
        let clamped = value.map(|v| v.clamp(0, MAX_SHOT_CLOCK_TENTHS as i32) as u16);
        FieldMask::SHOT_CLOCK.when(replace(&mut self.shot_clock_tenths, clamped))
    }

    pub fn set_weight_class(&mut self, value: &str) -> FieldMask {
        let value = truncate_utf8(value, MAX_WEIGHT_CLASS_LEN);
        FieldMask::WEIGHT_CLASS.when(replace(&mut self.weight_class, value))
    }

    pub fn set_sport(&mut self, sport: SportMode) -> FieldMask {
        FieldMask::SPORT_MODE.when(replace(&mut self.sport, sport))
    }

    pub fn set_team_name(&mut self, team: Team, name: &str) -> FieldMask {
        let changed = self.team_mut(team).set_name(name);
        FieldMask::name(team).when(changed)
    }

    pub fn set_team_color(&mut self, team: Team, color: Rgb) -> FieldMask {
        let changed = self.team_mut(team).set_color(color);
        FieldMask::color(team).when(changed)
    }

    pub fn set_team_logo(&mut self, team: Team, logo: &str) -> FieldMask {
        let changed = self.team_mut(team).set_logo(logo);
        FieldMask::logo(team).when(changed)
    }

    pub fn set_font_family(&mut self, font: &str) -> FieldMask {
        let font = truncate_utf8(font, MAX_FONT_LEN);
        FieldMask::FONT.when(replace(&mut self.font_family, font))
    }

    /// Applies every present field of a decoded frame as one unit.
    pub fn apply(&mut self, update: &FieldUpdate) -> FieldMask {
        let mut mask = FieldMask::empty();
        if let Some(v) = update.home_score {
            mask |= self.set_score(Team::Home, v);
        }
        if let Some(v) = update.away_score {
            mask |= self.set_score(Team::Away, v);
        }
        if let Some(v) = update.home_fouls {
            mask |= self.set_fouls(Team::Home, v);
        }
        if let Some(v) = update.away_fouls {
            mask |= self.set_fouls(Team::Away, v);
        }
        if let Some(v) = update.period {
            mask |= self.set_period(v);
        }
        if let Some(v) = update.clock_tenths {
            mask |= self.set_clock_tenths(v);
        }
        if let Some(running) = update.clock_running {
            mask |= self.set_clock_running(running);
        }
        if let Some(v) = update.shot_clock_tenths {
            mask |= self.set_shot_clock_tenths(Some(v));
        }
        if let Some(v) = &update.weight_class {
            mask |= self.set_weight_class(v);
        }
        mask
    }

    /// Copies every field of `incoming` through the clamping setters.
    pub fn merge_from(&mut self, incoming: &Scoreboard) -> FieldMask {
        let mut mask = FieldMask::empty();
        for team in [Team::Home, Team::Away] {
            let src = incoming.team(team);
            mask |= self.set_score(team, src.score() as i32);
            mask |= self.set_fouls(team, src.fouls() as i32);
            mask |= self.set_team_name(team, src.name());
            mask |= self.set_team_color(team, src.color());
            mask |= self.set_team_logo(team, src.logo());
        }
        mask |= self.set_period(incoming.period as i32);
        mask |= self.set_clock_tenths(incoming.clock_tenths as i32);
        mask |= self.set_clock_running(incoming.clock_running);
        mask |= self.set_count_down(incoming.count_down);
        mask |= self.set_shot_clock_tenths(incoming.shot_clock_tenths.map(i32::from));
        mask |= self.set_weight_class(&incoming.weight_class);
        mask |= self.set_sport(incoming.sport);
        mask |= self.set_font_family(&incoming.font_family);
        mask
    }
}

/// The canonical record: replicated scoreboard plus local authority and
/// presentation settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameState {
    board: Scoreboard,
    control_mode: ControlMode,
    network_role: NetworkRole,
    display: DisplayOptions,
}

impl GameState {
    pub fn new(mode: Mode) -> Self {
        let mut state = Self::default();
        state.set_mode(mode);
        state
    }

    pub fn board(&self) -> &Scoreboard {
        &self.board
    }

    pub(crate) fn board_mut(&mut self) -> &mut Scoreboard {
        &mut self.board
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn network_role(&self) -> NetworkRole {
        self.network_role
    }

    pub fn display(&self) -> DisplayOptions {
        self.display
    }

    pub fn fast_clock(&self) -> bool {
        self.board.fast_clock()
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) -> FieldMask {
        let control = FieldMask::CONTROL_MODE.when(replace(&mut self.control_mode, mode.control_mode()));
        let role = FieldMask::NETWORK_ROLE.when(replace(&mut self.network_role, mode.network_role()));
        control | role
    }

    pub(crate) fn set_display(&mut self, display: DisplayOptions) -> FieldMask {
        FieldMask::DISPLAY.when(replace(&mut self.display, display))
    }
}

pub(crate) fn truncate_utf8(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_owned();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp_at_mutation() {
        let mut board = Scoreboard::default();
        for value in [i32::MIN, -1, 0, 500, 999, 1000, i32::MAX] {
            board.set_score(Team::Home, value);
            assert!(board.team(Team::Home).score() <= MAX_SCORE);
            board.set_fouls(Team::Away, value);
            assert!(board.team(Team::Away).fouls() <= MAX_FOULS);
            board.set_period(value);
            assert!(board.period() <= MAX_PERIOD);
            board.set_clock_tenths(value);
            assert!(board.clock_tenths() <= MAX_CLOCK_TENTHS);
        }
        board.set_score(Team::Home, 1000);
        assert_eq!(board.team(Team::Home).score(), 999);
        board.set_period(-3);
        assert_eq!(board.period(), 0);
    }

    #[test]
    fn test_adjust_score_saturates() {
        let mut board = Scoreboard::default();
        assert_eq!(board.adjust_score(Team::Away, -1), FieldMask::empty());
        assert_eq!(board.adjust_score(Team::Away, 3), FieldMask::AWAY_SCORE);
        assert_eq!(board.team(Team::Away).score(), 3);
        board.adjust_score(Team::Away, i32::MAX);
        assert_eq!(board.team(Team::Away).score(), 999);
    }

    #[test]
    fn test_clock_change_reports_fast_clock_flip() {
        let mut board = Scoreboard::default();
        assert_eq!(board.set_clock_tenths(601), FieldMask::CLOCK);
        assert!(!board.fast_clock());
        assert_eq!(
            board.set_clock_tenths(599),
            FieldMask::CLOCK | FieldMask::FAST_CLOCK
        );
        assert!(board.fast_clock());
        assert_eq!(board.set_clock_tenths(598), FieldMask::CLOCK);
        assert_eq!(
            board.set_clock_tenths(0),
            FieldMask::CLOCK | FieldMask::FAST_CLOCK
        );
    }

    #[test]
    fn test_apply_partial_update() {
        let mut board = Scoreboard::default();
        board.set_score(Team::Away, 7);
        let update = FieldUpdate {
            home_score: Some(42),
            period: Some(2),
            ..Default::default()
        };
        let mask = board.apply(&update);
        assert_eq!(mask, FieldMask::HOME_SCORE | FieldMask::PERIOD);
        assert_eq!(board.team(Team::Home).score(), 42);
        assert_eq!(board.team(Team::Away).score(), 7);
    }

    #[test]
    fn test_merge_from_reports_only_differences() {
        let mut local = Scoreboard::default();
        let mut remote = Scoreboard::default();
        remote.set_score(Team::Home, 12);
        remote.set_team_name(Team::Away, "Visitors");
        let mask = local.merge_from(&remote);
        assert_eq!(mask, FieldMask::HOME_SCORE | FieldMask::AWAY_NAME);
        assert_eq!(local, remote);
        assert!(local.merge_from(&remote).is_empty());
    }

    #[test]
    fn test_manual_mode_forces_send_role() {
        let state = GameState::new(Mode::Manual);
        assert_eq!(state.control_mode(), ControlMode::Manual);
        assert_eq!(state.network_role(), NetworkRole::Send);
    }
}
