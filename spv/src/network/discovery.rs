//! DNS seed discovery.

use std::net::SocketAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;

use bisonwire::ChainParams;

/// Resolves the chain's DNS seeds into dialable addresses.
pub struct DnsDiscovery {
    resolver: TokioResolver,
}

impl DnsDiscovery {
    pub fn new() -> Self {
        let resolver = hickory_resolver::Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .with_options(ResolverOpts::default())
        .build();
        DnsDiscovery { resolver }
    }

    /// Queries every seed, returning whatever resolved. Failures are
    /// logged and skipped; an empty result just means the address book
    /// has to carry us.
    pub async fn discover(&self, params: &'static ChainParams) -> Vec<SocketAddr> {
        let mut addresses = Vec::new();
        for seed in params.dns_seeds {
            match self.resolver.lookup_ip(*seed).await {
                Ok(lookup) => {
                    let before = addresses.len();
                    addresses
                        .extend(lookup.iter().map(|ip| SocketAddr::new(ip, params.default_port)));
                    tracing::debug!(seed, count = addresses.len() - before, "DNS seed resolved");
                }
                Err(e) => {
                    tracing::warn!(seed, error = %e, "DNS seed lookup failed");
                }
            }
        }
        addresses
    }
}

impl Default for DnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
