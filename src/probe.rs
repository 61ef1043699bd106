//! The background task that keeps a channel's endpoint set current.

use crate::{Endpoint, EndpointSet, Resolve, Target};
use std::time::Duration;
use tokio::sync::watch;

/// How often a [`ResolutionProbe`] re-resolves its target.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ProbeSchedule {
    /// Resolve until the first successful publication, then stop. Used for
    /// static targets, whose endpoint set never changes.
    Once,
    /// Re-resolve on a fixed interval for as long as the channel lives.
    Periodic(Duration),
}

impl ProbeSchedule {
    fn interval(&self) -> Duration {
        match self {
            // Retry pacing for a static target that has not resolved yet.
            ProbeSchedule::Once => Duration::from_secs(1),
            ProbeSchedule::Periodic(interval) => *interval,
        }
    }
}

/// Periodically resolves a [`Target`] and publishes immutable
/// [`EndpointSet`] snapshots through a watch channel.
///
/// The probe is the only writer of the endpoint set. A lookup failure or an
/// empty lookup result keeps the previously published set; the set is never
/// empty-and-stale at the same time.
pub(crate) struct ResolutionProbe {
    target: Target,
    resolver: Box<dyn Resolve>,
    schedule: ProbeSchedule,
    reporter: watch::Sender<EndpointSet>,
}

impl ResolutionProbe {
    pub(crate) fn new(
        target: Target,
        resolver: Box<dyn Resolve>,
        schedule: ProbeSchedule,
        reporter: watch::Sender<EndpointSet>,
    ) -> Self {
        Self {
            target,
            resolver,
            schedule,
            reporter,
        }
    }

    /// Resolve the target once and publish the result if it changed.
    ///
    /// Fails if the lookup fails or yields no addresses; the previously
    /// published set stays in place either way.
    pub(crate) async fn probe_once(&mut self) -> Result<(), anyhow::Error> {
        let addrs = self.resolver.resolve(&self.target).await?;
        anyhow::ensure!(
            !addrs.is_empty(),
            "resolution returned no addresses for `{}`",
            self.target
        );

        let mut endpoints: Vec<Endpoint> = addrs.into_iter().map(Endpoint::from).collect();
        endpoints.sort();
        endpoints.dedup();

        let (generation, changed) = {
            let current = self.reporter.borrow();
            (
                current.generation(),
                current.endpoints() != endpoints.as_slice(),
            )
        };

        if changed {
            let next = EndpointSet::new(endpoints, generation + 1);
            tracing::debug!(
                service = %self.target,
                generation = next.generation(),
                endpoints = ?next.endpoints(),
                "publishing updated endpoint set"
            );
            let _ = self.reporter.send(next);
        }

        Ok(())
    }

    /// Drive the probe to completion. Runs until the channel terminates,
    /// or, for a [`ProbeSchedule::Once`] target, until the first successful
    /// publication.
    pub(crate) async fn probe(mut self) {
        loop {
            match self.probe_once().await {
                Ok(()) => {
                    if matches!(self.schedule, ProbeSchedule::Once) {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        service = %self.target,
                        error = format!("{err:#}"),
                        "endpoint resolution failed, keeping previous endpoint set"
                    );
                }
            }
            tokio::time::sleep(self.schedule.interval()).await;
        }
    }
}
