mod layout;
mod link;
mod rtd;

pub use layout::{FieldKind, FieldLayout, FieldSpec, parse_clock, parse_int, parse_period};
pub use link::{
    HardwareLink, LinkError, LinkHandle, LinkStats, LinkStatsSource, LinkStatus, OpenLink,
    SilenceMonitor, detect_port,
};
pub use rtd::{MAX_FRAME_LEN, RtdDecoder, RtdFrame, RtdFramer, checksum, encode_frame};

use crate::state::{FieldUpdate, SportMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("checksum mismatch: frame says {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("no terminator within {0} bytes")]
    Oversized(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_ok: u64,
    pub checksum_failures: u64,
    pub malformed: u64,
    pub oversized: u64,
    pub bytes_discarded: u64,
}

impl DecoderStats {
    pub fn record_error(&mut self, error: &DecodeError) {
        match error {
            DecodeError::Checksum { .. } => self.checksum_failures += 1,
            DecodeError::Malformed(_) => self.malformed += 1,
            DecodeError::Oversized(_) => self.oversized += 1,
        }
    }

    pub fn frames_dropped(&self) -> u64 {
        self.checksum_failures + self.malformed + self.oversized
    }
}

/// Turns raw link bytes into field updates for one device family.
///
/// `push` may be handed any slice of the stream; implementations keep their
/// own buffer across calls and drop invalid frames without surfacing them.
pub trait FrameDecoder: Send {
    fn name(&self) -> &'static str;

    fn push(&mut self, bytes: &[u8]) -> Vec<FieldUpdate>;

    fn set_sport(&mut self, sport: SportMode);

    fn stats(&self) -> DecoderStats;
}

pub fn decoder_for(sport: SportMode) -> Box<dyn FrameDecoder> {
    Box::new(RtdDecoder::new(FieldLayout::for_sport(sport)))
}
