//! Name resolution: the [`Resolve`] interface and its static and DNS
//! implementations.

use crate::Target;
use anyhow::Context;
use hickory_resolver::{system_conf, AsyncResolver, TokioAsyncResolver};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// Interface that provides functionality to acquire the socket addresses
/// currently backing a [`Target`].
///
/// Implementations report lookup failures as errors; the channel's
/// resolution probe treats them as non-fatal and retries on its next tick,
/// keeping the previous endpoint set in the meantime. If no addresses were
/// resolved, an empty set is returned.
#[async_trait::async_trait]
pub trait Resolve: Send + Sync {
    /// Return the unique [`SocketAddr`]s associated with `target`.
    async fn resolve(&self, target: &Target) -> Result<HashSet<SocketAddr>, anyhow::Error>;
}

#[async_trait::async_trait]
impl Resolve for Box<dyn Resolve> {
    async fn resolve(&self, target: &Target) -> Result<HashSet<SocketAddr>, anyhow::Error> {
        (**self).resolve(target).await
    }
}

/// Implements [`Resolve`] by querying DNS for [`Target::hostname`].
pub struct DnsResolver {
    /// The hickory resolver, which contacts the dns service directly such
    /// that we bypass os-specific dns caching.
    dns: TokioAsyncResolver,
}

impl DnsResolver {
    /// Construct a new [`DnsResolver`] from env and system configuration,
    /// e.g `resolv.conf`.
    pub async fn from_system_config() -> Result<Self, anyhow::Error> {
        let (config, mut opts) = system_conf::read_system_conf()
            .context("failed to read dns services from system configuration")?;

        // We do not want any caching on our side.
        opts.cache_size = 0;

        let dns = AsyncResolver::tokio(config, opts);

        Ok(Self { dns })
    }
}

#[async_trait::async_trait]
impl Resolve for DnsResolver {
    #[tracing::instrument(level = "debug", skip_all, fields(service = %target))]
    async fn resolve(&self, target: &Target) -> Result<HashSet<SocketAddr>, anyhow::Error> {
        let lookup = self.dns.lookup_ip(target.hostname()).await?;
        tracing::debug!("dns query expires in: {:?}", lookup.valid_until());

        Ok(lookup
            .iter()
            .map(|ip_addr| {
                tracing::debug!("result: ip {}", ip_addr);
                (ip_addr, target.port()).into()
            })
            .collect())
    }
}

/// Implements [`Resolve`] for static targets: an IP literal resolves
/// without any network traffic, a hostname is looked up once through the
/// operating system's resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticResolver;

#[async_trait::async_trait]
impl Resolve for StaticResolver {
    #[tracing::instrument(level = "debug", skip_all, fields(service = %target))]
    async fn resolve(&self, target: &Target) -> Result<HashSet<SocketAddr>, anyhow::Error> {
        if let Ok(ip) = target.hostname().parse::<IpAddr>() {
            return Ok(HashSet::from([SocketAddr::new(ip, target.port())]));
        }

        let addrs = tokio::net::lookup_host((target.hostname(), target.port()))
            .await
            .with_context(|| format!("failed to resolve static target `{target}`"))?;

        Ok(addrs.collect())
    }
}
