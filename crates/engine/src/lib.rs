pub mod clock;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod mode;
pub mod net;
pub mod state;
pub mod timing;

pub use clock::{ClockEngine, ClockStep, TICK_INTERVAL};
pub use config::{DEFAULT_BAUD_RATE, EngineConfig, LinkConfig, TransportConfig};
pub use decoder::{
    DecodeError, DecoderStats, FieldLayout, FrameDecoder, HardwareLink, LinkError, LinkHandle,
    LinkStats, LinkStatus, OpenLink, RtdDecoder, decoder_for, detect_port,
};
pub use engine::{
    Command, Engine, EngineClosed, EngineCore, EngineEvent, EngineHandle, Health, InboundOutcome,
    LinkHealth, NetworkHealth, OperatorCommand, PeerStatus,
};
pub use mode::{Mode, ModeArbiter, Source, Transition};
pub use net::{
    DEFAULT_PORT, NetworkStats, NetworkTransport, Packet, PacketError, PacketHeader, Payload,
    SourceFilter, TransportError, TransportStatus,
};
pub use state::{
    ClockDisplay, ControlMode, DisplayOptions, FieldMask, FieldUpdate, GameState, NetworkRole, Rgb,
    Scoreboard, SportMode, Team,
};
pub use timing::{Backoff, BackoffConfig};
