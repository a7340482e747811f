//! Country lookup for firewall rules.
//!
//! The lookup database itself is external; the firewall only needs
//! "client IP to ISO 3166 alpha-2 code, or unknown".

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use super::rate_limit::{Clock, SystemClock};
use super::IpNetwork;

/// Resolves an address to an upper-case ISO2 country code.
pub trait CountryResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Option<String>;
}

/// Fixed network → country table.
#[derive(Debug, Clone, Default)]
pub struct StaticCountryResolver {
    table: Vec<(IpNetwork, String)>,
}

impl StaticCountryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, network: IpNetwork, country: &str) -> Self {
        self.table.push((network, country.to_ascii_uppercase()));
        self
    }
}

impl CountryResolver for StaticCountryResolver {
    fn resolve(&self, ip: IpAddr) -> Option<String> {
        self.table
            .iter()
            .filter(|(net, _)| net.contains(ip))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, cc)| cc.clone())
    }
}

type Loader = Box<dyn Fn() -> anyhow::Result<Arc<dyn CountryResolver>> + Send + Sync>;

/// TTL cache in front of a resolver that is only built on first use.
///
/// If the loader fails, every lookup answers unknown and the failure is
/// logged once.
pub struct CachedCountryResolver {
    loader: Loader,
    inner: OnceCell<Option<Arc<dyn CountryResolver>>>,
    cache: DashMap<IpAddr, (Option<String>, u64)>,
    ttl_ms: u64,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl CachedCountryResolver {
    pub fn new<F>(ttl: Duration, loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn CountryResolver>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            inner: OnceCell::new(),
            cache: DashMap::new(),
            ttl_ms: ttl.as_millis() as u64,
            max_entries: 50_000,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Whether the underlying resolver has been built.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.get().is_some()
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn resolver(&self) -> Option<&Arc<dyn CountryResolver>> {
        self.inner
            .get_or_init(|| match (self.loader)() {
                Ok(r) => {
                    info!("Country resolver loaded");
                    Some(r)
                }
                Err(e) => {
                    warn!(error = %e, "Country resolver failed to load; countries resolve as unknown");
                    None
                }
            })
            .as_ref()
    }
}

impl CountryResolver for CachedCountryResolver {
    fn resolve(&self, ip: IpAddr) -> Option<String> {
        let now = self.clock.now_ms();
        if let Some(hit) = self.cache.get(&ip) {
            if hit.1 > now {
                return hit.0.clone();
            }
        }
        let country = self.resolver()?.resolve(ip);
        if self.cache.len() >= self.max_entries {
            self.cache.retain(|_, (_, expires)| *expires > now);
        }
        if self.cache.len() < self.max_entries {
            self.cache
                .insert(ip, (country.clone(), now.saturating_add(self.ttl_ms)));
        }
        country
    }
}
