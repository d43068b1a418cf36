use std::sync::Arc;

use crate::decoder::LinkStatus;
use crate::mode::Mode;
use crate::state::{FieldMask, GameState};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// One accepted mutation. `state` is the snapshot right after it.
    Changed {
        fields: FieldMask,
        state: Arc<GameState>,
    },
    ModeChanged {
        from: Mode,
        to: Mode,
    },
    Health(Health),
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkHealth {
    #[default]
    Disabled,
    /// Open, no frame yet.
    Waiting,
    Active,
    Silent,
    Failed,
}

impl LinkHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkHealth::Disabled => "disabled",
            LinkHealth::Waiting => "waiting",
            LinkHealth::Active => "active",
            LinkHealth::Silent => "silent",
            LinkHealth::Failed => "failed",
        }
    }
}

impl From<LinkStatus> for LinkHealth {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Active => LinkHealth::Active,
            LinkStatus::Silent => LinkHealth::Silent,
            LinkStatus::Failed => LinkHealth::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkHealth {
    #[default]
    Disabled,
    Ok,
    Degraded {
        reason: String,
    },
}

impl NetworkHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, NetworkHealth::Degraded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerStatus {
    #[default]
    Unknown,
    Online,
    Silent,
    /// The peer announced a clean shutdown.
    Offline,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Unknown => "unknown",
            PeerStatus::Online => "online",
            PeerStatus::Silent => "silent",
            PeerStatus::Offline => "offline",
        }
    }
}

/// Degraded-state indicator for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Health {
    pub link: LinkHealth,
    pub network: NetworkHealth,
    pub peer: PeerStatus,
}

impl Health {
    pub fn is_degraded(&self) -> bool {
        matches!(self.link, LinkHealth::Silent | LinkHealth::Failed) || self.network.is_degraded()
    }
}
