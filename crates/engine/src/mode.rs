use crate::state::{ControlMode, NetworkRole};

/// Authority state. `Manual` always implies the Send role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Manual,
    AutomaticSend,
    #[default]
    AutomaticListen,
}

impl Mode {
    pub fn from_parts(control: ControlMode, role: NetworkRole) -> Self {
        match (control, role) {
            (ControlMode::Manual, _) => Mode::Manual,
            (ControlMode::Automatic, NetworkRole::Send) => Mode::AutomaticSend,
            (ControlMode::Automatic, NetworkRole::Listen) => Mode::AutomaticListen,
        }
    }

    pub fn control_mode(self) -> ControlMode {
        match self {
            Mode::Manual => ControlMode::Manual,
            Mode::AutomaticSend | Mode::AutomaticListen => ControlMode::Automatic,
        }
    }

    pub fn network_role(self) -> NetworkRole {
        match self {
            Mode::Manual | Mode::AutomaticSend => NetworkRole::Send,
            Mode::AutomaticListen => NetworkRole::Listen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::AutomaticSend => "automatic/send",
            Mode::AutomaticListen => "automatic/listen",
        }
    }
}

/// A party that may try to mutate the game state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Decoder,
    Operator,
    Network,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Decoder => "decoder",
            Source::Operator => "operator",
            Source::Network => "network",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub decoder: u64,
    pub operator: u64,
    pub network: u64,
}

/// Decides who may write to the game state and which network role is live.
#[derive(Debug, Clone)]
pub struct ModeArbiter {
    mode: Mode,
    automatic_role: NetworkRole,
    rejections: RejectionCounts,
}

impl Default for ModeArbiter {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

impl ModeArbiter {
    pub fn new(initial: Mode) -> Self {
        let automatic_role = match initial {
            Mode::AutomaticListen => NetworkRole::Listen,
            Mode::Manual | Mode::AutomaticSend => NetworkRole::Send,
        };
        Self {
            mode: initial,
            automatic_role,
            rejections: RejectionCounts::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn control_mode(&self) -> ControlMode {
        self.mode.control_mode()
    }

    pub fn network_role(&self) -> NetworkRole {
        self.mode.network_role()
    }

    pub fn rejections(&self) -> RejectionCounts {
        self.rejections
    }

    pub fn set_control_mode(&mut self, control: ControlMode) -> Transition {
        let role = match control {
            ControlMode::Manual => NetworkRole::Send,
            ControlMode::Automatic => self.automatic_role,
        };
        self.transition_to(Mode::from_parts(control, role))
    }

    /// While in Manual the role is only remembered for the next return to
    /// Automatic; the effective role stays Send.
    pub fn set_network_role(&mut self, role: NetworkRole) -> Transition {
        self.automatic_role = role;
        match self.mode {
            Mode::Manual => self.transition_to(Mode::Manual),
            Mode::AutomaticSend | Mode::AutomaticListen => {
                self.transition_to(Mode::from_parts(ControlMode::Automatic, role))
            }
        }
    }

    fn transition_to(&mut self, next: Mode) -> Transition {
        let transition = Transition {
            from: self.mode,
            to: next,
        };
        if transition.changed() {
            log::info!("Mode {} -> {}", transition.from.as_str(), transition.to.as_str());
        }
        self.mode = next;
        transition
    }

    pub fn authorizes(&self, source: Source) -> bool {
        match source {
            Source::Decoder | Source::Operator => self.mode != Mode::AutomaticListen,
            Source::Network => self.mode == Mode::AutomaticListen,
        }
    }

    /// Checks authority and records a rejection for diagnostics.
    pub fn admit(&mut self, source: Source) -> bool {
        if self.authorizes(source) {
            return true;
        }
        match source {
            Source::Decoder => self.rejections.decoder += 1,
            Source::Operator => self.rejections.operator += 1,
            Source::Network => self.rejections.network += 1,
        }
        log::trace!(
            "Rejected {} mutation in {} mode",
            source.as_str(),
            self.mode.as_str()
        );
        false
    }

    pub fn clock_engine_enabled(&self) -> bool {
        self.mode == Mode::Manual
    }

    pub fn publishes(&self) -> bool {
        self.network_role() == NetworkRole::Send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_manual_implies_send(arbiter: &ModeArbiter) {
        if arbiter.control_mode() == ControlMode::Manual {
            assert_eq!(arbiter.network_role(), NetworkRole::Send);
        }
    }

    #[test]
    fn test_initial_state_is_listen() {
        let arbiter = ModeArbiter::default();
        assert_eq!(arbiter.mode(), Mode::AutomaticListen);
        assert!(arbiter.authorizes(Source::Network));
        assert!(!arbiter.authorizes(Source::Decoder));
        assert!(!arbiter.authorizes(Source::Operator));
    }

    #[test]
    fn test_transition_table() {
        let mut arbiter = ModeArbiter::default();

        let t = arbiter.set_control_mode(ControlMode::Manual);
        assert_eq!((t.from, t.to), (Mode::AutomaticListen, Mode::Manual));
        assert!(!arbiter.authorizes(Source::Network));
        assert!(arbiter.authorizes(Source::Operator));

        let t = arbiter.set_control_mode(ControlMode::Automatic);
        assert_eq!(t.to, Mode::AutomaticListen);

        let t = arbiter.set_network_role(NetworkRole::Send);
        assert_eq!(t.to, Mode::AutomaticSend);
        assert!(arbiter.authorizes(Source::Decoder));
        assert!(arbiter.publishes());

        let t = arbiter.set_network_role(NetworkRole::Listen);
        assert_eq!(t.to, Mode::AutomaticListen);
        assert!(!arbiter.publishes());
    }

    #[test]
    fn test_manual_returns_to_last_role() {
        let mut arbiter = ModeArbiter::new(Mode::AutomaticSend);
        arbiter.set_control_mode(ControlMode::Manual);
        assert_eq!(
            arbiter.set_control_mode(ControlMode::Automatic).to,
            Mode::AutomaticSend
        );
    }

    #[test]
    fn test_role_change_in_manual_is_deferred() {
        let mut arbiter = ModeArbiter::new(Mode::Manual);
        let t = arbiter.set_network_role(NetworkRole::Listen);
        assert!(!t.changed());
        assert_eq!(arbiter.network_role(), NetworkRole::Send);
        assert_eq!(
            arbiter.set_control_mode(ControlMode::Automatic).to,
            Mode::AutomaticListen
        );
    }

    #[test]
    fn test_manual_implies_send_after_every_transition() {
        let mut arbiter = ModeArbiter::default();
        let controls = [ControlMode::Manual, ControlMode::Automatic];
        let roles = [NetworkRole::Send, NetworkRole::Listen];
        for control in controls {
            for role in roles {
                arbiter.set_control_mode(control);
                assert_manual_implies_send(&arbiter);
                arbiter.set_network_role(role);
                assert_manual_implies_send(&arbiter);
            }
        }
    }

    #[test]
    fn test_rejections_are_counted() {
        let mut arbiter = ModeArbiter::default();
        assert!(!arbiter.admit(Source::Decoder));
        assert!(!arbiter.admit(Source::Operator));
        assert!(arbiter.admit(Source::Network));
        assert_eq!(arbiter.rejections().decoder, 1);
        assert_eq!(arbiter.rejections().operator, 1);
        assert_eq!(arbiter.rejections().network, 0);
    }
}
