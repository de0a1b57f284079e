//! Core types used throughout the distribution core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Identifier of a logical bucket, `0 <= id < bucket_count`.
pub type BucketId = u32;

/// Version counter for a distribution map. Strictly increasing; used to
/// detect stale routing state.
pub type ViewId = u64;

/// Address of a node in the cluster.
///
/// Wraps a socket address so it stays `Copy` and totally ordered, which the
/// planner relies on for deterministic tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress(SocketAddr);

impl NodeAddress {
    /// Create a node address from a socket address.
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Get the underlying socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Convenience constructor for a loopback address, mostly used in tests.
    pub fn loopback(port: u16) -> Self {
        Self(SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for NodeAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
