mod filter;
mod pacing;
mod protocol;
mod stats;
mod tracking;
mod transport;

pub use filter::SourceFilter;
pub use pacing::Coalescer;
pub use protocol::{
    DEFAULT_PORT, FORMAT_OFFLINE_V1, FORMAT_SNAPSHOT_V1, HEADER_LEN, MAX_PACKET_SIZE, Packet,
    PacketError, PacketHeader, Payload, WireFlags, encode_snapshot, sequence_greater_than,
};
pub use stats::{NetworkCounters, NetworkStats, rand_u32};
pub use tracking::{Freshness, PeerTracker};
pub use transport::{NetworkTransport, TransportError, TransportStatus};

pub(crate) use transport::TransportTasks;
