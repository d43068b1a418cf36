use std::fmt;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;

/// Optional single allowed sender. Empty accepts everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceFilter(Option<IpAddr>);

impl SourceFilter {
    pub const fn any() -> Self {
        Self(None)
    }

    pub const fn only(ip: IpAddr) -> Self {
        Self(Some(ip))
    }

    pub fn allowed(&self) -> Option<IpAddr> {
        self.0
    }

    /// IPv4-mapped IPv6 senders compare equal to their IPv4 form.
    pub fn accepts(&self, from: &SocketAddr) -> bool {
        match self.0 {
            None => true,
            Some(allowed) => allowed.to_canonical() == from.ip().to_canonical(),
        }
    }
}

impl FromStr for SourceFilter {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }
        trimmed.parse().map(Self::only)
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("any"),
            Some(ip) => write!(f, "{}", ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn from(ip: [u8; 4]) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::from(ip), 7700))
    }

    #[test]
    fn test_filter_matches_only_configured_sender() {
        let filter: SourceFilter = "10.0.0.5".parse().unwrap();
        assert!(filter.accepts(&from([10, 0, 0, 5])));
        assert!(!filter.accepts(&from([10, 0, 0, 9])));
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let filter: SourceFilter = "".parse().unwrap();
        assert_eq!(filter, SourceFilter::any());
        assert!(filter.accepts(&from([192, 168, 1, 20])));
    }

    #[test]
    fn test_mapped_ipv6_sender_matches() {
        let filter = SourceFilter::only(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        let mapped = Ipv4Addr::new(10, 0, 0, 5).to_ipv6_mapped();
        assert!(filter.accepts(&SocketAddr::from((mapped, 7700))));
        assert!(!filter.accepts(&SocketAddr::from((Ipv6Addr::LOCALHOST, 7700))));
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!("10.0.0".parse::<SourceFilter>().is_err());
    }
}
