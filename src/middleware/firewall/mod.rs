//! IP/country filtering and per-IP rate limiting.

mod geo;
mod rate_limit;

pub use geo::{CachedCountryResolver, CountryResolver, StaticCountryResolver};
pub use rate_limit::{
    Clock, FixedWindowLimiter, ManualClock, RateLimit, RateLimitAlgorithm, RateLimiter,
    SlidingWindowLimiter, SystemClock,
};

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

use ipnet::IpNet;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use super::{Middleware, Next, PathRules, PipelineError};
use crate::http::{HandlerResponse, Request};
use crate::server::Session;

/// An address block in CIDR notation. A bare address is a /32 (or /128).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork(IpNet);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid network `{0}`")]
pub struct InvalidNetwork(pub String);

impl IpNetwork {
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.0, ip) {
            // IPv4-mapped IPv6 peers still match IPv4 rules.
            (IpNet::V4(net), IpAddr::V6(ip)) => {
                ip.to_ipv4_mapped().is_some_and(|v4| net.contains(&v4))
            }
            (net, ip) => net.contains(&ip),
        }
    }
}

impl From<IpNet> for IpNetwork {
    fn from(net: IpNet) -> Self {
        Self(net)
    }
}

impl FromStr for IpNetwork {
    type Err = InvalidNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self(net));
        }
        s.parse::<IpAddr>()
            .map(|addr| Self(IpNet::from(addr)))
            .map_err(|_| InvalidNetwork(s.to_string()))
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<'de> Deserialize<'de> for IpNetwork {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Access rules for one path prefix.
///
/// Deny lists are checked first. If any allow list is non-empty, a client
/// must match one of them. The rate limit applies last.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FirewallRule {
    pub deny_ips: Vec<IpNetwork>,
    pub allow_ips: Vec<IpNetwork>,
    pub deny_countries: Vec<String>,
    pub allow_countries: Vec<String>,
    pub rate_limit: Option<RateLimit>,
}

impl FirewallRule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn deny_ip(mut self, network: IpNetwork) -> Self {
        self.deny_ips.push(network);
        self
    }

    #[must_use]
    pub fn allow_ip(mut self, network: IpNetwork) -> Self {
        self.allow_ips.push(network);
        self
    }

    #[must_use]
    pub fn deny_country(mut self, iso2: &str) -> Self {
        self.deny_countries.push(iso2.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn allow_country(mut self, iso2: &str) -> Self {
        self.allow_countries.push(iso2.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    fn needs_country(&self) -> bool {
        !self.deny_countries.is_empty() || !self.allow_countries.is_empty()
    }
}

/// Outcome of evaluating a request against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    DeniedIp,
    DeniedCountry,
    NotAllowed,
    RateLimited,
}

impl Verdict {
    #[must_use]
    pub fn status(self) -> Option<u16> {
        match self {
            Verdict::Allow => None,
            Verdict::RateLimited => Some(429),
            _ => Some(403),
        }
    }
}

struct CompiledRule {
    rule: FirewallRule,
    limiter: Option<Box<dyn RateLimiter>>,
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("rule", &self.rule)
            .field("limited", &self.limiter.is_some())
            .finish()
    }
}

/// Builder for [`FirewallMiddleware`].
pub struct FirewallBuilder {
    rules: Vec<(String, FirewallRule)>,
    default_rule: Option<FirewallRule>,
    trust_forwarded: bool,
    resolver: Option<Arc<dyn CountryResolver>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl FirewallBuilder {
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that sets them.
    #[must_use]
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    #[must_use]
    pub fn country_resolver(mut self, resolver: Arc<dyn CountryResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rule for every path under `prefix`; the longest matching prefix wins.
    #[must_use]
    pub fn rule(mut self, prefix: &str, rule: FirewallRule) -> Self {
        self.rules.push((prefix.to_string(), rule));
        self
    }

    /// Rule for paths no prefix covers.
    #[must_use]
    pub fn default_rule(mut self, rule: FirewallRule) -> Self {
        self.default_rule = Some(rule);
        self
    }

    /// Cap on tracked client addresses per limiter.
    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    #[must_use]
    pub fn build(self) -> FirewallMiddleware {
        let compile = |rule: FirewallRule| CompiledRule {
            limiter: rule
                .rate_limit
                .map(|rl| rl.limiter(Arc::clone(&self.clock), self.max_entries)),
            rule,
        };
        let mut rules = PathRules::new();
        for (prefix, rule) in self.rules.iter().cloned() {
            if rule.needs_country() && self.resolver.is_none() {
                warn!(prefix = %prefix, "Firewall rule uses countries but no country resolver is set");
            }
            rules = rules.prefix(&prefix, compile(rule));
        }
        if let Some(rule) = self.default_rule.clone() {
            rules = rules.catch_all(compile(rule));
        }
        FirewallMiddleware {
            rules,
            trust_forwarded: self.trust_forwarded,
            resolver: self.resolver,
        }
    }
}

/// Rejects requests by client address, country, or rate.
///
/// Denied clients get `403`, rate-limited ones `429` with `Retry-After`.
/// Paths without a matching rule pass straight through.
pub struct FirewallMiddleware {
    rules: PathRules<CompiledRule>,
    trust_forwarded: bool,
    resolver: Option<Arc<dyn CountryResolver>>,
}

impl fmt::Debug for FirewallMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirewallMiddleware")
            .field("rules", &self.rules)
            .field("trust_forwarded", &self.trust_forwarded)
            .finish()
    }
}

impl FirewallMiddleware {
    #[must_use]
    pub fn builder() -> FirewallBuilder {
        FirewallBuilder {
            rules: Vec::new(),
            default_rule: None,
            trust_forwarded: false,
            resolver: None,
            clock: Arc::new(SystemClock),
            max_entries: 100_000,
        }
    }

    /// Client address for this request.
    #[must_use]
    pub fn client_ip(&self, req: &Request, peer: Option<IpAddr>) -> IpAddr {
        if self.trust_forwarded {
            let forwarded = req
                .header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok())
                .or_else(|| req.header("x-real-ip").and_then(|v| v.trim().parse().ok()));
            if let Some(ip) = forwarded {
                return ip;
            }
        }
        peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Evaluate `ip` against the rule for `path`, counting it against the
    /// rule's rate limit when the access checks pass.
    pub fn evaluate(&self, path: &str, ip: IpAddr) -> (Verdict, Option<&str>) {
        let Some((key, compiled)) = self.rules.resolve_with_key(path) else {
            return (Verdict::Allow, None);
        };
        let rule = &compiled.rule;

        if rule.deny_ips.iter().any(|n| n.contains(ip)) {
            return (Verdict::DeniedIp, Some(key));
        }
        let country = if rule.needs_country() {
            self.resolver.as_ref().and_then(|r| r.resolve(ip))
        } else {
            None
        };
        if let Some(cc) = &country {
            if rule.deny_countries.iter().any(|d| d.eq_ignore_ascii_case(cc)) {
                return (Verdict::DeniedCountry, Some(key));
            }
        }
        if !rule.allow_ips.is_empty() || !rule.allow_countries.is_empty() {
            let by_ip = rule.allow_ips.iter().any(|n| n.contains(ip));
            let by_country = country.as_ref().is_some_and(|cc| {
                rule.allow_countries
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(cc))
            });
            if !by_ip && !by_country {
                return (Verdict::NotAllowed, Some(key));
            }
        }
        if let Some(limiter) = &compiled.limiter {
            if !limiter.check(ip) {
                return (Verdict::RateLimited, Some(key));
            }
        }
        (Verdict::Allow, Some(key))
    }

    fn retry_after(&self, path: &str) -> u64 {
        self.rules
            .resolve(path)
            .and_then(|c| c.limiter.as_ref())
            .map_or(1, |l| l.window().as_secs().max(1))
    }
}

impl Middleware for FirewallMiddleware {
    fn name(&self) -> &'static str {
        "firewall"
    }

    fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
        let peer = session.peer().map(|a| a.ip());
        let ip = self.client_ip(session.request(), peer);
        let path = session.request().path.clone();
        let (verdict, rule) = self.evaluate(&path, ip);
        match verdict.status() {
            None => {
                debug!(client_ip = %ip, rule = ?rule, "Firewall passed");
                next.run(session)
            }
            Some(429) => {
                let retry = self.retry_after(&path);
                warn!(client_ip = %ip, path = %path, rule = ?rule, retry_after = retry, "Rate limit exceeded");
                session.send(
                    HandlerResponse::error(429, "Too Many Requests")
                        .with_header("retry-after", retry.to_string()),
                )?;
                Ok(())
            }
            Some(status) => {
                warn!(client_ip = %ip, path = %path, rule = ?rule, verdict = ?verdict, "Firewall rejected request");
                session.send(HandlerResponse::error(status, "Forbidden"))?;
                Ok(())
            }
        }
    }
}
