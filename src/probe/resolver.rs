//! Hostname resolution ahead of the transport call.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use tracing::{debug, instrument};

use super::hosts::HostsOverrideMap;

/// Forced IPv4 lookup used when a proxy must be handed an address.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns the first A record for `host`, or `None` if the lookup fails.
    async fn lookup_ipv4(&self, host: &str) -> Option<Ipv4Addr>;
}

/// Where a resolved target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// Explicit caller override; pinned at connect time.
    Override,
    /// Forced IPv4 lookup; substituted into the URL.
    Dns,
}

/// Address to dial instead of the URL's hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub addr: IpAddr,
    pub source: TargetSource,
}

/// Resolves the connect target for one hop.
///
/// Overrides win. Otherwise a lookup happens only when proxied, so the proxy
/// receives an address; `None` lets the connection (or the proxy) resolve the
/// name itself.
#[instrument(skip(resolver, overrides), fields(host = %host))]
pub async fn resolve_target(
    resolver: &dyn HostResolver,
    host: &str,
    overrides: &HostsOverrideMap,
    proxy_present: bool,
) -> Option<ResolvedTarget> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Some(addr) = overrides.get(bare) {
        debug!(%addr, "Using hosts override");
        return Some(ResolvedTarget {
            addr,
            source: TargetSource::Override,
        });
    }
    if !proxy_present || bare.parse::<IpAddr>().is_ok() {
        return None;
    }
    let addr = resolver.lookup_ipv4(bare).await?;
    debug!(%addr, "Pre-resolved target for proxy");
    Some(ResolvedTarget {
        addr: IpAddr::V4(addr),
        source: TargetSource::Dns,
    })
}

/// DNS resolver: hickory A-record lookup with a system resolver fallback.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Creates a resolver using the default upstream configuration, IPv4 only.
    #[must_use]
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }

    async fn system_lookup(host: &str) -> Option<Ipv4Addr> {
        let addrs = tokio::net::lookup_host((host, 0)).await.ok()?;
        addrs.into_iter().find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn lookup_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => {
                let found = lookup.iter().find_map(|ip| match ip {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                });
                if found.is_some() {
                    return found;
                }
            }
            Err(e) => debug!(host, error = %e, "A-record lookup failed, trying system resolver"),
        }
        Self::system_lookup(host).await
    }
}
