use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::state::{Rgb, Scoreboard, SportMode, Team};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_PORT: u16 = 7700;

pub const FORMAT_SNAPSHOT_V1: u8 = 0x01;
pub const FORMAT_OFFLINE_V1: u8 = 0x02;

/// Format tag, session and sequence.
pub const HEADER_LEN: usize = 1 + 4 + 4;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WireFlags: u8 {
        const CLOCK_RUNNING = 1 << 0;
        const COUNT_DOWN = 1 << 1;
        const SHOT_CLOCK = 1 << 2;
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Random per process start, so a restarted sender is not taken for a
    /// replay of old sequence numbers.
    pub session: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(session: u32, sequence: u32) -> Self {
        Self { session, sequence }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Snapshot(Scoreboard),
    /// Sent once when the sender shuts down cleanly.
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown format tag {0:#04x}")]
    UnknownFormat(u8),
    #[error("packet truncated")]
    Truncated,
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("invalid sport mode {0}")]
    InvalidSport(u8),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("encoded packet is {0} bytes, limit is {MAX_PACKET_SIZE}")]
    TooLarge(usize),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Payload) -> Self {
        Self { header, payload }
    }

    pub fn encode(&self) -> Result<Bytes, PacketError> {
        match &self.payload {
            Payload::Snapshot(board) => encode_snapshot(self.header, board),
            Payload::Offline => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN);
                put_header(&mut buf, FORMAT_OFFLINE_V1, self.header);
                Ok(buf.freeze())
            }
        }
    }

    /// Parses a datagram. The format tag is checked before anything else, so
    /// an unrecognized version is never partially read.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let mut buf = data;
        let format = match buf.first() {
            None => return Err(PacketError::Empty),
            Some(&tag) if tag == FORMAT_SNAPSHOT_V1 || tag == FORMAT_OFFLINE_V1 => tag,
            Some(&tag) => return Err(PacketError::UnknownFormat(tag)),
        };
        buf.advance(1);

        need(&buf, 8)?;
        let header = PacketHeader::new(buf.get_u32(), buf.get_u32());

        let payload = if format == FORMAT_SNAPSHOT_V1 {
            Payload::Snapshot(decode_scoreboard(&mut buf)?)
        } else {
            Payload::Offline
        };

        if buf.has_remaining() {
            return Err(PacketError::TrailingBytes(buf.remaining()));
        }
        Ok(Self { header, payload })
    }
}

fn put_header(buf: &mut BytesMut, format: u8, header: PacketHeader) {
    buf.put_u8(format);
    buf.put_u32(header.session);
    buf.put_u32(header.sequence);
}

fn put_str(buf: &mut BytesMut, value: &str) {
    // Scoreboard setters cap every string well below 255 bytes.
    let bytes = value.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    buf.put_slice(&bytes[..len]);
}

/// Encodes a snapshot without building an owned `Packet` first.
pub fn encode_snapshot(header: PacketHeader, board: &Scoreboard) -> Result<Bytes, PacketError> {
    let mut buf = BytesMut::with_capacity(256);
    put_header(&mut buf, FORMAT_SNAPSHOT_V1, header);

    let home = board.team(Team::Home);
    let away = board.team(Team::Away);

    let mut flags = WireFlags::empty();
    flags.set(WireFlags::CLOCK_RUNNING, board.clock_running());
    flags.set(WireFlags::COUNT_DOWN, board.count_down());
    flags.set(WireFlags::SHOT_CLOCK, board.shot_clock_tenths().is_some());

    buf.put_u16(home.score());
    buf.put_u16(away.score());
    buf.put_u8(home.fouls());
    buf.put_u8(away.fouls());
    buf.put_u8(board.period());
    buf.put_u16(board.clock_tenths());
    buf.put_u8(flags.bits());
    buf.put_u16(board.shot_clock_tenths().unwrap_or(0));
    buf.put_u8(board.sport().as_u8());

    put_str(&mut buf, board.weight_class());
    put_str(&mut buf, home.name());
    put_str(&mut buf, away.name());
    put_str(&mut buf, home.logo());
    put_str(&mut buf, away.logo());
    put_str(&mut buf, board.font_family());

    buf.put_slice(&home.color().to_bytes());
    buf.put_slice(&away.color().to_bytes());

    if buf.len() > MAX_PACKET_SIZE {
        return Err(PacketError::TooLarge(buf.len()));
    }
    Ok(buf.freeze())
}

fn need(buf: &&[u8], len: usize) -> Result<(), PacketError> {
    if buf.remaining() < len {
        Err(PacketError::Truncated)
    } else {
        Ok(())
    }
}

fn get_str(buf: &mut &[u8]) -> Result<String, PacketError> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len)?;
    let text = std::str::from_utf8(&buf[..len]).map_err(|_| PacketError::InvalidUtf8)?;
    let owned = text.to_owned();
    buf.advance(len);
    Ok(owned)
}

fn get_rgb(buf: &mut &[u8]) -> Result<Rgb, PacketError> {
    need(buf, 3)?;
    let mut bytes = [0u8; 3];
    buf.copy_to_slice(&mut bytes);
    Ok(Rgb::from_bytes(bytes))
}

// Fixed part: 2+2+1+1+1+2+1+2+1.
const SNAPSHOT_FIXED_LEN: usize = 13;

fn decode_scoreboard(buf: &mut &[u8]) -> Result<Scoreboard, PacketError> {
    need(buf, SNAPSHOT_FIXED_LEN)?;
    let home_score = buf.get_u16();
    let away_score = buf.get_u16();
    let home_fouls = buf.get_u8();
    let away_fouls = buf.get_u8();
    let period = buf.get_u8();
    let clock_tenths = buf.get_u16();
    let flags = WireFlags::from_bits_truncate(buf.get_u8());
    let shot_clock = buf.get_u16();
    let sport_raw = buf.get_u8();
    let sport = SportMode::from_u8(sport_raw).ok_or(PacketError::InvalidSport(sport_raw))?;

    let weight_class = get_str(buf)?;
    let home_name = get_str(buf)?;
    let away_name = get_str(buf)?;
    let home_logo = get_str(buf)?;
    let away_logo = get_str(buf)?;
    let font = get_str(buf)?;
    let home_color = get_rgb(buf)?;
    let away_color = get_rgb(buf)?;

    // Values from the wire go through the same clamping setters as local edits.
    let mut board = Scoreboard::default();
    board.set_score(Team::Home, home_score as i32);
    board.set_score(Team::Away, away_score as i32);
    board.set_fouls(Team::Home, home_fouls as i32);
    board.set_fouls(Team::Away, away_fouls as i32);
    board.set_period(period as i32);
    board.set_clock_tenths(clock_tenths as i32);
    board.set_clock_running(flags.contains(WireFlags::CLOCK_RUNNING));
    board.set_count_down(flags.contains(WireFlags::COUNT_DOWN));
    board.set_shot_clock_tenths(
        flags
            .contains(WireFlags::SHOT_CLOCK)
            .then_some(shot_clock as i32),
    );
    board.set_sport(sport);
    board.set_weight_class(&weight_class);
    board.set_team_name(Team::Home, &home_name);
    board.set_team_name(Team::Away, &away_name);
    board.set_team_logo(Team::Home, &home_logo);
    board.set_team_logo(Team::Away, &away_logo);
    board.set_font_family(&font);
    board.set_team_color(Team::Home, home_color);
    board.set_team_color(Team::Away, away_color);
    Ok(board)
}
