use std::time::{Duration, Instant};

use crate::state::MAX_CLOCK_TENTHS;

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockStep {
    pub tenths: u16,
    pub expired: bool,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    started: Instant,
    base_tenths: u16,
    count_down: bool,
    applied_ticks: u64,
}

/// Local game clock used under manual authority.
///
/// The value is always derived from whole ticks elapsed since the anchor
/// instant, so late timer wakeups never accumulate drift. Stopping drops the
/// anchor; restarting anchors fresh from the displayed value, with no
/// catch-up for the paused time.
#[derive(Debug, Default)]
pub struct ClockEngine {
    anchor: Option<Anchor>,
}

impl ClockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn start(&mut self, now: Instant, tenths: u16, count_down: bool) {
        self.anchor = Some(Anchor {
            started: now,
            base_tenths: tenths.min(MAX_CLOCK_TENTHS),
            count_down,
            applied_ticks: 0,
        });
    }

    /// Re-anchors a running clock after an external value or direction change.
    pub fn rebase(&mut self, now: Instant, tenths: u16, count_down: bool) {
        if self.anchor.is_some() {
            self.start(now, tenths, count_down);
        }
    }

    pub fn stop(&mut self) {
        self.anchor = None;
    }

    /// When the next whole tick falls due. `None` while stopped.
    pub fn next_tick_at(&self) -> Option<Instant> {
        let anchor = self.anchor.as_ref()?;
        let next = u32::try_from(anchor.applied_ticks + 1).unwrap_or(u32::MAX);
        Some(anchor.started + TICK_INTERVAL * next)
    }

    pub fn advance(&mut self, now: Instant) -> Option<ClockStep> {
        let anchor = self.anchor.as_mut()?;

        let elapsed = now.saturating_duration_since(anchor.started);
        let ticks = (elapsed.as_millis() / TICK_INTERVAL.as_millis()) as u64;
        if ticks <= anchor.applied_ticks {
            return None;
        }
        anchor.applied_ticks = ticks;

        let base = anchor.base_tenths as u64;
        let step = if anchor.count_down {
            let tenths = base.saturating_sub(ticks) as u16;
            ClockStep {
                tenths,
                expired: tenths == 0,
            }
        } else {
            let tenths = (base + ticks).min(MAX_CLOCK_TENTHS as u64) as u16;
            ClockStep {
                tenths,
                expired: tenths == MAX_CLOCK_TENTHS,
            }
        };

        if step.expired {
            self.anchor = None;
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(n: u64) -> Duration {
        TICK_INTERVAL * n as u32
    }

    #[test]
    fn test_countdown_reaches_zero_exactly() {
        let start = Instant::now();
        let mut clock = ClockEngine::new();
        clock.start(start, 100, true);

        let mut last = 100;
        for n in 1..=100 {
            let step = clock.advance(start + ticks(n)).unwrap();
            assert!(step.tenths < last);
            assert_eq!(step.tenths, (100 - n) as u16);
            assert_eq!(step.expired, n == 100);
            last = step.tenths;
        }
        assert!(!clock.is_running());
        assert_eq!(clock.advance(start + ticks(101)), None);
    }

    #[test]
    fn test_count_up_stops_at_ceiling() {
        let start = Instant::now();
        let mut clock = ClockEngine::new();
        clock.start(start, MAX_CLOCK_TENTHS - 2, false);

        assert_eq!(clock.advance(start + ticks(1)).unwrap().tenths, MAX_CLOCK_TENTHS - 1);
        let step = clock.advance(start + ticks(5)).unwrap();
        assert_eq!(step.tenths, MAX_CLOCK_TENTHS);
        assert!(step.expired);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_jitter_does_not_accumulate() {
        let start = Instant::now();
        let mut clock = ClockEngine::new();
        clock.start(start, 24_000, true);

        // Every wakeup lands 7ms late, roughly a 32 minute game.
        let mut now = start;
        let mut wakeups = 0u64;
        while wakeups < 18_000 {
            now += Duration::from_millis(107);
            clock.advance(now);
            wakeups += 1;
        }
        let elapsed_ticks = (now - start).as_millis() as u64 / 100;
        let step = clock.advance(now + Duration::from_millis(100)).unwrap();
        assert_eq!(step.tenths as u64, 24_000 - elapsed_ticks - 1);
    }

    #[test]
    fn test_late_wakeup_applies_all_elapsed_ticks_once() {
        let start = Instant::now();
        let mut clock = ClockEngine::new();
        clock.start(start, 50, true);

        assert_eq!(clock.advance(start + Duration::from_millis(350)).unwrap().tenths, 47);
        assert_eq!(clock.advance(start + Duration::from_millis(390)), None);
        assert_eq!(clock.advance(start + Duration::from_millis(400)).unwrap().tenths, 46);
    }

    #[test]
    fn test_pause_freezes_without_catch_up() {
        let start = Instant::now();
        let mut clock = ClockEngine::new();
        clock.start(start, 300, true);
        let paused_at = clock.advance(start + ticks(10)).unwrap().tenths;
        clock.stop();
        assert_eq!(clock.advance(start + ticks(50)), None);

        let resume = start + ticks(60);
        clock.start(resume, paused_at, true);
        assert_eq!(clock.advance(resume + ticks(1)).unwrap().tenths, paused_at - 1);
    }

    #[test]
    fn test_rebase_only_applies_when_running() {
        let start = Instant::now();
        let mut clock = ClockEngine::new();
        clock.rebase(start, 100, true);
        assert!(!clock.is_running());

        clock.start(start, 100, true);
        clock.rebase(start + ticks(3), 500, false);
        assert_eq!(clock.advance(start + ticks(4)).unwrap().tenths, 501);
    }
}
