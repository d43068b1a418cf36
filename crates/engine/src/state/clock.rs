use std::fmt;

use super::FAST_CLOCK_THRESHOLD_TENTHS;

/// True when the clock shows seconds.tenths instead of minutes:seconds.
pub fn is_fast_clock(tenths: u16) -> bool {
    tenths > 0 && tenths < FAST_CLOCK_THRESHOLD_TENTHS
}

/// Which digit group of the game clock is meaningful for a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDisplay {
    Standard { minutes: u16, seconds: u8 },
    Fast { seconds: u8, tenths: u8 },
}

impl ClockDisplay {
    pub fn from_tenths(tenths: u16) -> Self {
        if is_fast_clock(tenths) {
            ClockDisplay::Fast {
                seconds: (tenths / 10) as u8,
                tenths: (tenths % 10) as u8,
            }
        } else {
            let total_seconds = tenths / 10;
            ClockDisplay::Standard {
                minutes: total_seconds / 60,
                seconds: (total_seconds % 60) as u8,
            }
        }
    }

    pub fn is_fast(&self) -> bool {
        matches!(self, ClockDisplay::Fast { .. })
    }
}

impl fmt::Display for ClockDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ClockDisplay::Standard { minutes, seconds } => write!(f, "{}:{:02}", minutes, seconds),
            ClockDisplay::Fast { seconds, tenths } => write!(f, "{}.{}", seconds, tenths),
        }
    }
}
