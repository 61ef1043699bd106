//! Resolved network endpoints and the immutable snapshots that carry them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// One concrete network address a call can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    /// The socket address of the endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

/// An immutable, ordered snapshot of the endpoints resolved for a target.
///
/// Snapshots are replaced atomically on every resolution update and never
/// mutated in place: the resolver probe is the only writer, pick paths read
/// whichever snapshot is latest. The `generation` increases monotonically
/// with each published update.
///
/// Endpoints are kept sorted so that the cyclic order seen by a round-robin
/// picker is deterministic for a given address list.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    endpoints: Arc<[Endpoint]>,
    generation: u64,
}

impl EndpointSet {
    /// The snapshot a channel starts from, before the first successful
    /// resolution.
    pub fn empty() -> Self {
        Self {
            endpoints: Vec::new().into(),
            generation: 0,
        }
    }

    /// Build a snapshot from `endpoints`, sorted and deduplicated, tagged
    /// with `generation`.
    pub fn new(mut endpoints: Vec<Endpoint>, generation: u64) -> Self {
        endpoints.sort();
        endpoints.dedup();
        Self {
            endpoints: endpoints.into(),
            generation,
        }
    }

    /// The endpoints of the snapshot, in their fixed order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The logical version of the snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The number of endpoints in the snapshot.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the snapshot holds no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
