use std::net::SocketAddr;

use crate::decoder::LinkStatus;
use crate::net::{Packet, SourceFilter, TransportStatus};
use crate::state::{ControlMode, DisplayOptions, FieldUpdate, NetworkRole, Rgb, SportMode, Team};

/// An edit made by the operator. Subject to the arbiter like any other source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    SetScore { team: Team, value: i32 },
    AdjustScore { team: Team, delta: i32 },
    SetFouls { team: Team, value: i32 },
    AdjustFouls { team: Team, delta: i32 },
    SetPeriod(i32),
    AdjustPeriod(i32),
    SetClock { minutes: i32, seconds: i32 },
    SetClockTenths(i32),
    StartClock,
    StopClock,
    SetCountDown(bool),
    SetShotClock(Option<i32>),
    SetSport(SportMode),
    SetTeamName { team: Team, name: String },
    SetTeamColor { team: Team, color: Rgb },
    SetTeamLogo { team: Team, logo: String },
    SetFontFamily(String),
    SetWeightClass(String),
}

impl OperatorCommand {
    /// Clock edits need the local clock engine re-anchored.
    pub fn touches_clock(&self) -> bool {
        matches!(
            self,
            OperatorCommand::SetClock { .. }
                | OperatorCommand::SetClockTenths(_)
                | OperatorCommand::StartClock
                | OperatorCommand::StopClock
                | OperatorCommand::SetCountDown(_)
        )
    }
}

/// Everything the owner task consumes, in arrival order.
#[derive(Debug)]
pub enum Command {
    Operator(OperatorCommand),
    SetControlMode(ControlMode),
    SetNetworkRole(NetworkRole),
    SetDisplay(DisplayOptions),
    SetSourceFilter(SourceFilter),
    Decoded(FieldUpdate),
    Link(LinkStatus),
    Inbound { from: SocketAddr, packet: Packet },
    Transport(TransportStatus),
    Shutdown,
}
