//! Load balancing policies: how one endpoint is selected per call attempt.

use crate::{ChannelError, Endpoint, EndpointSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Policy selecting which [`Endpoint`] serves a given call attempt.
///
/// `pick` is called once per call attempt against the latest published
/// [`EndpointSet`] snapshot; picks are never cached across attempts.
pub trait LoadBalance: Send + Sync + 'static {
    /// Select an endpoint from `endpoints`, or fail with
    /// [`ChannelError::NoEndpoints`] when the set is empty.
    fn pick(&self, endpoints: &EndpointSet) -> Result<Endpoint, ChannelError>;
}

/// Pass-through selector for targets that resolve to a single endpoint.
#[derive(Debug, Default)]
pub struct SingleEndpoint;

impl SingleEndpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalance for SingleEndpoint {
    fn pick(&self, endpoints: &EndpointSet) -> Result<Endpoint, ChannelError> {
        let endpoint = endpoints.endpoints().first().ok_or(ChannelError::NoEndpoints)?;
        if endpoints.len() > 1 {
            tracing::debug!(
                endpoints = endpoints.len(),
                "single-endpoint policy over a multi-endpoint set, serving the first"
            );
        }
        Ok(*endpoint)
    }
}

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
///
/// The counter is shared across concurrent callers and advanced atomically;
/// indexing is modulo the current snapshot size, so the pick stays valid
/// across endpoint set resizes.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalance for RoundRobin {
    fn pick(&self, endpoints: &EndpointSet) -> Result<Endpoint, ChannelError> {
        let set = endpoints.endpoints();
        if set.is_empty() {
            return Err(ChannelError::NoEndpoints);
        }

        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(set[slot % set.len()])
    }
}

/// Built-in load balancing policies selectable at channel build time.
///
/// When no policy is configured the channel derives one from the target:
/// static targets get [`SingleEndpoint`], dynamic targets get
/// [`RoundRobin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancePolicy {
    /// Serve every call from the single resolved endpoint.
    SingleEndpoint,
    /// Rotate through the resolved endpoints.
    RoundRobin,
}

impl BalancePolicy {
    pub(crate) fn build(self) -> std::sync::Arc<dyn LoadBalance> {
        match self {
            BalancePolicy::SingleEndpoint => std::sync::Arc::new(SingleEndpoint::new()),
            BalancePolicy::RoundRobin => std::sync::Arc::new(RoundRobin::new()),
        }
    }
}
