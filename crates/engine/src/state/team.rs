use super::{MAX_FOULS, MAX_LOGO_LEN, MAX_NAME_LEN, MAX_SCORE, truncate_utf8};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    Home,
    Away,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Home => "home",
            Team::Away => "away",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }
}

/// Per-team slice of the scoreboard. Mutators clamp and return whether the
/// stored value actually changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TeamState {
    score: u16,
    fouls: u8,
    name: String,
    color: Rgb,
    logo: String,
}

impl TeamState {
    pub fn score(&self) -> u16 {
        self.score
    }

    pub fn fouls(&self) -> u8 {
        self.fouls
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    pub fn logo(&self) -> &str {
        &self.logo
    }

    pub(crate) fn set_score(&mut self, value: i32) -> bool {
        let clamped = value.clamp(0, MAX_SCORE as i32) as u16;
        replace(&mut self.score, clamped)
    }

    pub(crate) fn set_fouls(&mut self, value: i32) -> bool {
        let clamped = value.clamp(0, MAX_FOULS as i32) as u8;
        replace(&mut self.fouls, clamped)
    }

    pub(crate) fn set_name(&mut self, name: &str) -> bool {
        replace(&mut self.name, truncate_utf8(name, MAX_NAME_LEN))
    }

    pub(crate) fn set_color(&mut self, color: Rgb) -> bool {
        replace(&mut self.color, color)
    }

    pub(crate) fn set_logo(&mut self, logo: &str) -> bool {
        replace(&mut self.logo, truncate_utf8(logo, MAX_LOGO_LEN))
    }
}

pub(crate) fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
