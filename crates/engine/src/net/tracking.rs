use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::{PacketHeader, sequence_greater_than};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// First packet from a sender we have not heard before, or one that
    /// restarted.
    NewSession,
    /// Duplicate or reordered behind a newer packet.
    Stale,
    /// Our own broadcast looped back to us.
    OwnEcho,
}

#[derive(Debug, Clone, Copy)]
struct Peer {
    addr: SocketAddr,
    session: u32,
    last_sequence: u32,
    last_seen: Instant,
}

/// Remembers the newest packet from the current sending peer.
#[derive(Debug)]
pub struct PeerTracker {
    own_session: u32,
    peer: Option<Peer>,
}

impl PeerTracker {
    pub fn new(own_session: u32) -> Self {
        Self {
            own_session,
            peer: None,
        }
    }

    pub fn classify(&mut self, from: SocketAddr, header: PacketHeader, now: Instant) -> Freshness {
        if header.session == self.own_session {
            return Freshness::OwnEcho;
        }

        let fresh = Peer {
            addr: from,
            session: header.session,
            last_sequence: header.sequence,
            last_seen: now,
        };

        if let Some(peer) = self.peer.as_mut().filter(|p| p.session == header.session) {
            if !sequence_greater_than(header.sequence, peer.last_sequence) {
                return Freshness::Stale;
            }
            *peer = fresh;
            return Freshness::Fresh;
        }

        match self.peer {
            Some(previous) => log::info!(
                "Peer session changed: {} ({:08x}) -> {} ({:08x})",
                previous.addr,
                previous.session,
                from,
                header.session
            ),
            None => log::info!("Receiving from {} ({:08x})", from, header.session),
        }
        self.peer = Some(fresh);
        Freshness::NewSession
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.peer.map(|p| p.last_seen)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.map(|p| p.addr)
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.last_seen()
            .is_some_and(|seen| now.saturating_duration_since(seen) > timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "10.0.0.5:7700".parse().unwrap()
    }

    #[test]
    fn test_duplicates_and_reordering_are_stale() {
        let now = Instant::now();
        let mut tracker = PeerTracker::new(1);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(2, 10), now), Freshness::NewSession);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(2, 11), now), Freshness::Fresh);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(2, 11), now), Freshness::Stale);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(2, 9), now), Freshness::Stale);
    }

    #[test]
    fn test_sequence_wraps() {
        let now = Instant::now();
        let mut tracker = PeerTracker::new(1);
        tracker.classify(addr(), PacketHeader::new(2, u32::MAX), now);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(2, 0), now), Freshness::Fresh);
    }

    #[test]
    fn test_restarted_sender_is_accepted() {
        let now = Instant::now();
        let mut tracker = PeerTracker::new(1);
        tracker.classify(addr(), PacketHeader::new(2, 5000), now);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(3, 0), now), Freshness::NewSession);
        assert_eq!(tracker.classify(addr(), PacketHeader::new(3, 1), now), Freshness::Fresh);
    }

    #[test]
    fn test_own_echo_ignored() {
        let mut tracker = PeerTracker::new(42);
        let verdict = tracker.classify(addr(), PacketHeader::new(42, 1), Instant::now());
        assert_eq!(verdict, Freshness::OwnEcho);
        assert_eq!(tracker.peer_addr(), None);
    }

    #[test]
    fn test_timeout() {
        let start = Instant::now();
        let mut tracker = PeerTracker::new(1);
        assert!(!tracker.is_timed_out(start, Duration::from_secs(3)));
        tracker.classify(addr(), PacketHeader::new(2, 1), start);
        assert!(!tracker.is_timed_out(start + Duration::from_secs(3), Duration::from_secs(3)));
        assert!(tracker.is_timed_out(start + Duration::from_secs(4), Duration::from_secs(3)));
    }
}
