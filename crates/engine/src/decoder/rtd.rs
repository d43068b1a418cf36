use super::layout::FieldLayout;
use super::{DecodeError, DecoderStats, FrameDecoder};
use crate::state::{FieldUpdate, SportMode};

const SYN: u8 = 0x16;
const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const EOT: u8 = 0x04;
const ETB: u8 = 0x17;

const HEADER_LEN: usize = 10;
const OFFSET_DIGITS: usize = 4;
// SOH + header + STX + EOT + 2 checksum digits + ETB
const MIN_FRAME_LEN: usize = 1 + HEADER_LEN + 1 + 1 + 2 + 1;
pub const MAX_FRAME_LEN: usize = 512;

const DEFAULT_ADDRESS: &[u8; 6] = b"004210";

/// One checksum-validated RTD frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtdFrame {
    pub address: u32,
    pub offset: usize,
    pub text: Vec<u8>,
}

/// Modulo-256 byte sum used by RTD frames.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Builds a wire frame, used for loopback testing and simulators.
pub fn encode_frame(offset: u16, text: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + 1 + text.len());
    frame.push(SYN);
    frame.push(SOH);
    frame.extend_from_slice(DEFAULT_ADDRESS);
    frame.extend_from_slice(format!("{:04}", offset % 10_000).as_bytes());
    frame.push(STX);
    frame.extend_from_slice(text.as_bytes());
    frame.push(EOT);
    let sum = checksum(&frame[1..]);
    frame.extend_from_slice(format!("{:02X}", sum).as_bytes());
    frame.push(ETB);
    frame
}

/// Accumulates link bytes and splits them into frames.
#[derive(Debug, Default)]
pub struct RtdFramer {
    buffer: Vec<u8>,
    discarded: u64,
}

impl RtdFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Option<Result<RtdFrame, DecodeError>> {
        let Some(start) = self.buffer.iter().position(|&b| b == SOH) else {
            self.discard(self.buffer.len());
            return None;
        };
        self.discard(start);

        // A second SOH before the terminator means the first frame was cut short.
        let boundary = self.buffer[1..]
            .iter()
            .position(|&b| b == SOH || b == ETB)
            .map(|i| i + 1);

        match boundary {
            Some(end) if self.buffer[end] == ETB => {
                let frame: Vec<u8> = self.buffer.drain(..=end).collect();
                Some(parse_frame(&frame))
            }
            Some(next_soh) => {
                self.discard(next_soh);
                Some(Err(DecodeError::Malformed("frame interrupted by new start")))
            }
            None if self.buffer.len() > MAX_FRAME_LEN => {
                self.discard(1);
                Some(Err(DecodeError::Oversized(MAX_FRAME_LEN)))
            }
            None => None,
        }
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let dropped = self.buffer.drain(..count);
        self.discarded += dropped.filter(|&b| b != SYN).count() as u64;
    }
}

fn parse_frame(frame: &[u8]) -> Result<RtdFrame, DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::Malformed("frame too short"));
    }

    let header = &frame[1..1 + HEADER_LEN];
    if !header.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::Malformed("non-numeric header"));
    }
    if frame[1 + HEADER_LEN] != STX {
        return Err(DecodeError::Malformed("missing STX"));
    }

    let eot_index = frame.len() - 4;
    if frame[eot_index] != EOT {
        return Err(DecodeError::Malformed("missing EOT"));
    }

    let expected = parse_hex_byte(&frame[eot_index + 1..eot_index + 3])
        .ok_or(DecodeError::Malformed("non-hex checksum"))?;
    let computed = checksum(&frame[..=eot_index]);
    if expected != computed {
        return Err(DecodeError::Checksum { expected, computed });
    }

    let text = &frame[2 + HEADER_LEN..eot_index];
    if text.iter().any(|b| b.is_ascii_control()) {
        return Err(DecodeError::Malformed("control byte in text"));
    }

    let (address, offset) = header.split_at(HEADER_LEN - OFFSET_DIGITS);
    Ok(RtdFrame {
        address: ascii_number(address) as u32,
        offset: ascii_number(offset),
        text: text.to_vec(),
    })
}

fn ascii_number(digits: &[u8]) -> usize {
    digits
        .iter()
        .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize)
}

fn parse_hex_byte(digits: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(digits).ok()?;
    u8::from_str_radix(text, 16).ok()
}

/// Daktronics RTD decoder: mirrors the device's data segment and reports the
/// fields each valid frame touched.
#[derive(Debug)]
pub struct RtdDecoder {
    framer: RtdFramer,
    layout: FieldLayout,
    segment: Vec<u8>,
    last_clock: Option<i32>,
    stats: DecoderStats,
}

impl RtdDecoder {
    pub fn new(layout: FieldLayout) -> Self {
        Self {
            framer: RtdFramer::new(),
            segment: vec![b' '; layout.segment_len()],
            layout,
            last_clock: None,
            stats: DecoderStats::default(),
        }
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    fn apply_frame(&mut self, frame: &RtdFrame) -> Option<FieldUpdate> {
        let start = frame.offset;
        if start >= self.segment.len() {
            return None;
        }
        let end = (start + frame.text.len()).min(self.segment.len());
        self.segment[start..end].copy_from_slice(&frame.text[..end - start]);

        let mut update = self.layout.extract(&self.segment, start, end);
        if let Some(clock) = update.clock_tenths {
            update.clock_running = Some(self.last_clock.is_some_and(|prev| prev != clock));
            self.last_clock = Some(clock);
        }

        (!update.is_empty()).then_some(update)
    }
}

impl FrameDecoder for RtdDecoder {
    fn name(&self) -> &'static str {
        "daktronics-rtd"
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<FieldUpdate> {
        self.framer.push(bytes);

        let mut updates = Vec::new();
        while let Some(result) = self.framer.next_frame() {
            match result {
                Ok(frame) => {
                    self.stats.frames_ok += 1;
                    if let Some(update) = self.apply_frame(&frame) {
                        updates.push(update);
                    }
                }
                Err(e) => {
                    self.stats.record_error(&e);
                    log::debug!("Dropped RTD frame: {}", e);
                }
            }
        }
        self.stats.bytes_discarded = self.framer.discarded();

        updates
    }

    fn set_sport(&mut self, sport: SportMode) {
        if self.layout.sport == sport {
            return;
        }
        log::info!("Decoder layout switched to {}", sport.as_str());
        self.layout = FieldLayout::for_sport(sport);
        self.segment = vec![b' '; self.layout.segment_len()];
        self.last_clock = None;
    }

    fn stats(&self) -> DecoderStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basketball() -> RtdDecoder {
        RtdDecoder::new(FieldLayout::for_sport(SportMode::Basketball))
    }

    fn corrupt_checksum(mut frame: Vec<u8>) -> Vec<u8> {
        let index = frame.len() - 2;
        frame[index] = if frame[index] == b'0' { b'1' } else { b'0' };
        frame
    }

    #[test]
    fn test_encode_then_parse_frame() {
        let bytes = encode_frame(107, "  42");
        let mut framer = RtdFramer::new();
        framer.push(&bytes);
        let frame = framer.next_frame().unwrap().unwrap();
        assert_eq!(frame.address, 4210);
        assert_eq!(frame.offset, 107);
        assert_eq!(frame.text, b"  42");
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_frames_split_across_reads() {
        let bytes = encode_frame(107, "  42");
        let mut decoder = basketball();
        let (first, second) = bytes.split_at(7);
        assert!(decoder.push(first).is_empty());
        let updates = decoder.push(second);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].home_score, Some(42));
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut bytes = encode_frame(107, "   3");
        bytes.extend(encode_frame(111, "   5"));
        let updates = basketball().push(&bytes);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].home_score, Some(3));
        assert_eq!(updates[1].away_score, Some(5));
    }

    #[test]
    fn test_bad_checksum_dropped_then_next_frame_applies() {
        let mut decoder = basketball();

        let updates = decoder.push(&corrupt_checksum(encode_frame(107, "  99")));
        assert!(updates.is_empty());
        assert_eq!(decoder.stats().checksum_failures, 1);

        let updates = decoder.push(&encode_frame(107, "  42"));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].home_score, Some(42));
        assert_eq!(decoder.stats().frames_ok, 1);
    }

    #[test]
    fn test_garbage_between_frames_is_skipped() {
        let mut bytes = b"\xff\x00noise".to_vec();
        bytes.extend(encode_frame(0, "12:00"));
        bytes.extend(b"junk");
        bytes.extend(encode_frame(141, " 2"));
        let mut decoder = basketball();
        let updates = decoder.push(&bytes);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].clock_tenths, Some(7200));
        assert_eq!(updates[1].period, Some(2));
        assert!(decoder.stats().bytes_discarded >= 8);
    }

    #[test]
    fn test_truncated_frame_does_not_swallow_next() {
        let mut bytes = encode_frame(107, "  77");
        bytes.truncate(9);
        bytes.extend(encode_frame(111, "  12"));
        let mut decoder = basketball();
        let updates = decoder.push(&bytes);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].home_score, None);
        assert_eq!(updates[0].away_score, Some(12));
        assert_eq!(decoder.stats().malformed, 1);
    }

    #[test]
    fn test_unterminated_stream_is_bounded() {
        let mut decoder = basketball();
        let mut bytes = vec![SOH];
        bytes.extend(std::iter::repeat_n(b'7', MAX_FRAME_LEN + 10));
        assert!(decoder.push(&bytes).is_empty());
        assert_eq!(decoder.stats().oversized, 1);
        assert!(decoder.framer.buffered() <= MAX_FRAME_LEN);

        let updates = decoder.push(&encode_frame(107, "   8"));
        assert_eq!(updates[0].home_score, Some(8));
    }

    #[test]
    fn test_clock_running_inferred_from_changes() {
        let mut decoder = basketball();
        let first = decoder.push(&encode_frame(0, " 5:00"));
        assert_eq!(first[0].clock_running, Some(false));
        let second = decoder.push(&encode_frame(0, " 4:59"));
        assert_eq!(second[0].clock_tenths, Some(2990));
        assert_eq!(second[0].clock_running, Some(true));
        let third = decoder.push(&encode_frame(0, " 4:59"));
        assert_eq!(third[0].clock_running, Some(false));
    }

    #[test]
    fn test_frame_past_segment_is_ignored() {
        let mut decoder = basketball();
        assert!(decoder.push(&encode_frame(9000, "123")).is_empty());
        assert_eq!(decoder.stats().frames_ok, 1);
    }

    #[test]
    fn test_lowercase_checksum_accepted() {
        let mut bytes = encode_frame(107, "  10");
        let len = bytes.len();
        bytes[len - 3..len - 1].make_ascii_lowercase();
        let updates = basketball().push(&bytes);
        assert_eq!(updates[0].home_score, Some(10));
    }

    #[test]
    fn test_set_sport_switches_layout() {
        let mut decoder = basketball();
        decoder.set_sport(SportMode::Wrestling);
        assert_eq!(decoder.layout().sport, SportMode::Wrestling);
        let updates = decoder.push(&encode_frame(220, "  285   "));
        assert_eq!(updates[0].weight_class.as_deref(), Some("285"));
    }
}
