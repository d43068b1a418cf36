use crate::state::{FieldUpdate, SportMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    MainClock,
    HomeScore,
    AwayScore,
    HomeFouls,
    AwayFouls,
    Period,
    ShotClock,
    WeightClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub offset: usize,
    pub width: usize,
}

impl FieldSpec {
    const fn new(kind: FieldKind, offset: usize, width: usize) -> Self {
        Self {
            kind,
            offset,
            width,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.width
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.offset < end && start < self.end()
    }
}

// Zero-based positions within the All Sport 5000 RTD data segment.
const BASKETBALL: &[FieldSpec] = &[
    FieldSpec::new(FieldKind::MainClock, 0, 5),
    FieldSpec::new(FieldKind::HomeScore, 107, 4),
    FieldSpec::new(FieldKind::AwayScore, 111, 4),
    FieldSpec::new(FieldKind::Period, 141, 2),
    FieldSpec::new(FieldKind::HomeFouls, 143, 2),
    FieldSpec::new(FieldKind::AwayFouls, 145, 2),
    FieldSpec::new(FieldKind::ShotClock, 200, 3),
];

const VOLLEYBALL: &[FieldSpec] = &[
    FieldSpec::new(FieldKind::MainClock, 0, 5),
    FieldSpec::new(FieldKind::HomeScore, 107, 4),
    FieldSpec::new(FieldKind::AwayScore, 111, 4),
    FieldSpec::new(FieldKind::Period, 141, 2),
];

const WRESTLING: &[FieldSpec] = &[
    FieldSpec::new(FieldKind::MainClock, 0, 5),
    FieldSpec::new(FieldKind::HomeScore, 107, 4),
    FieldSpec::new(FieldKind::AwayScore, 111, 4),
    FieldSpec::new(FieldKind::Period, 141, 2),
    FieldSpec::new(FieldKind::WeightClass, 220, 8),
];

/// Where each field lives in a device's data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub sport: SportMode,
    pub fields: &'static [FieldSpec],
}

impl FieldLayout {
    pub fn for_sport(sport: SportMode) -> Self {
        let fields = match sport {
            SportMode::Basketball => BASKETBALL,
            SportMode::Volleyball => VOLLEYBALL,
            SportMode::Wrestling => WRESTLING,
        };
        Self { sport, fields }
    }

    pub fn segment_len(&self) -> usize {
        self.fields.iter().map(FieldSpec::end).max().unwrap_or(0)
    }

    /// Builds an update from every field overlapping `[start, end)` of `segment`.
    pub fn extract(&self, segment: &[u8], start: usize, end: usize) -> FieldUpdate {
        let mut update = FieldUpdate::default();
        for spec in self.fields.iter().filter(|s| s.overlaps(start, end)) {
            let Some(raw) = segment.get(spec.offset..spec.end()) else {
                continue;
            };
            let text = String::from_utf8_lossy(raw);
            match spec.kind {
                FieldKind::MainClock => update.clock_tenths = parse_clock(&text),
                FieldKind::HomeScore => update.home_score = parse_int(&text),
                FieldKind::AwayScore => update.away_score = parse_int(&text),
                FieldKind::HomeFouls => update.home_fouls = parse_int(&text),
                FieldKind::AwayFouls => update.away_fouls = parse_int(&text),
                FieldKind::Period => update.period = parse_period(&text),
                FieldKind::ShotClock => update.shot_clock_tenths = parse_shot_clock(&text),
                FieldKind::WeightClass => update.weight_class = parse_text(&text),
            }
        }
        update
    }
}

/// Blank or non-numeric text yields `None` so the previous value persists.
pub fn parse_int(text: &str) -> Option<i32> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Blank text yields `None` so the previous value persists.
pub fn parse_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Periods arrive as text such as "2", " 3" or "4th"; the first digit wins.
pub fn parse_period(text: &str) -> Option<i32> {
    text.chars()
        .find(|c| c.is_ascii_digit())
        .and_then(|c| c.to_digit(10))
        .map(|d| d as i32)
}

/// Parses "M:SS", "MM:SS" or fast-clock "S.T" into tenths of a second.
pub fn parse_clock(text: &str) -> Option<i32> {
    let trimmed = text.trim();
    if let Some((seconds, tenths)) = trimmed.split_once('.') {
        let seconds = parse_component(seconds)?;
        let tenths = tenths
            .chars()
            .next()
            .map(|c| c.to_digit(10).map(|d| d as i32))
            .unwrap_or(Some(0))?;
        Some(seconds * 10 + tenths)
    } else if let Some((minutes, seconds)) = trimmed.split_once(':') {
        let minutes = parse_component(minutes)?;
        let seconds = parse_component(seconds)?;
        Some((minutes * 60 + seconds) * 10)
    } else {
        None
    }
}

fn parse_shot_clock(text: &str) -> Option<i32> {
    if text.contains('.') {
        parse_clock(text)
    } else {
        parse_int(text).map(|seconds| seconds.saturating_mul(10))
    }
}

fn parse_component(text: &str) -> Option<i32> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Some(0)
    } else if trimmed.chars().all(|c| c.is_ascii_digit()) && trimmed.len() <= 4 {
        trimmed.parse().ok()
    } else {
        None
    }
}
