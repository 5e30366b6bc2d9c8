//! Address lookup used by the proxy builders
//!
//! Hostnames on dataplanes, zone ingresses and zone egresses are resolved to
//! IP addresses at build time. IP literals never hit the resolver.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::{ConvoyError, Result};

/// Resolves a hostname to a single IP address
#[async_trait]
pub trait LookupIp: Send + Sync {
    /// Resolve a hostname
    async fn lookup(&self, host: &str) -> anyhow::Result<IpAddr>;

    /// Resolve an address that may already be an IP literal
    async fn resolve(&self, address: &str) -> Result<IpAddr> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        self.lookup(address)
            .await
            .map_err(|source| ConvoyError::Lookup {
                host: address.to_string(),
                source,
            })
    }
}

/// Lookup backed by the operating system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl LookupIp for SystemLookup {
    async fn lookup(&self, host: &str) -> anyhow::Result<IpAddr> {
        let mut addrs = tokio::net::lookup_host((host, 0)).await?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| anyhow::anyhow!("no addresses found for {}", host))
    }
}
