use std::time::{Duration, Instant};

/// Decides when the send task transmits.
///
/// Changes within `min_interval` of the previous send collapse into one
/// packet carrying whatever is newest when the window opens. With nothing
/// new, the latest snapshot is repeated every `heartbeat` so a dropped
/// datagram does not leave the peer stale.
#[derive(Debug, Clone)]
pub struct Coalescer {
    min_interval: Duration,
    heartbeat: Duration,
    last_sent: Option<Instant>,
    dirty: bool,
}

impl Coalescer {
    pub fn new(min_interval: Duration, heartbeat: Duration) -> Self {
        Self {
            min_interval,
            heartbeat: heartbeat.max(min_interval),
            last_sent: None,
            dirty: false,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn next_send_at(&self, now: Instant, has_payload: bool) -> Option<Instant> {
        if !has_payload {
            return None;
        }
        let Some(last) = self.last_sent else {
            return Some(now);
        };
        let due = if self.dirty {
            last + self.min_interval
        } else {
            last + self.heartbeat
        };
        Some(due.max(now))
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.dirty = false;
    }

    /// Forgets send history, e.g. when publishing stops.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_millis(50);
    const BEAT: Duration = Duration::from_millis(1000);

    #[test]
    fn test_first_change_sends_immediately() {
        let now = Instant::now();
        let mut pacing = Coalescer::new(MIN, BEAT);
        pacing.mark_dirty();
        assert_eq!(pacing.next_send_at(now, true), Some(now));
        assert_eq!(pacing.next_send_at(now, false), None);
    }

    #[test]
    fn test_burst_waits_for_window() {
        let start = Instant::now();
        let mut pacing = Coalescer::new(MIN, BEAT);
        pacing.record_sent(start);

        let later = start + Duration::from_millis(10);
        pacing.mark_dirty();
        pacing.mark_dirty();
        assert_eq!(pacing.next_send_at(later, true), Some(start + MIN));

        let overdue = start + Duration::from_millis(80);
        assert_eq!(pacing.next_send_at(overdue, true), Some(overdue));
    }

    #[test]
    fn test_heartbeat_when_idle() {
        let start = Instant::now();
        let mut pacing = Coalescer::new(MIN, BEAT);
        pacing.record_sent(start);
        assert!(!pacing.is_dirty());
        assert_eq!(pacing.next_send_at(start, true), Some(start + BEAT));
    }

    #[test]
    fn test_reset_sends_next_change_at_once() {
        let start = Instant::now();
        let mut pacing = Coalescer::new(MIN, BEAT);
        pacing.record_sent(start);
        pacing.reset();
        pacing.mark_dirty();
        assert_eq!(pacing.next_send_at(start, true), Some(start));
    }
}
