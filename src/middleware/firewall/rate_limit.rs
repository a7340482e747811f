//! Per-IP rate limiters.
//!
//! Both limiters keep one entry per client address and sweep stale entries
//! opportunistically: every `sweep_every` checks, entries idle for longer
//! than their TTL are dropped, then the least recently seen entries are
//! evicted until the table is back under `max_entries`.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

/// Clock moved by hand, for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    FixedWindow,
    SlidingWindow,
}

/// Rate limit settings for one firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub limit: u32,
    #[serde(deserialize_with = "window_secs::deserialize", rename = "window_secs")]
    pub window: Duration,
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
}

mod window_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl RateLimit {
    #[must_use]
    pub fn fixed(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            algorithm: RateLimitAlgorithm::FixedWindow,
        }
    }

    #[must_use]
    pub fn sliding(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            algorithm: RateLimitAlgorithm::SlidingWindow,
        }
    }

    /// Build the limiter for these settings.
    #[must_use]
    pub fn limiter(&self, clock: Arc<dyn Clock>, max_entries: usize) -> Box<dyn RateLimiter> {
        match self.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                Box::new(FixedWindowLimiter::new(self.limit, self.window, clock).max_entries(max_entries))
            }
            RateLimitAlgorithm::SlidingWindow => Box::new(
                SlidingWindowLimiter::new(self.limit, self.window, clock).max_entries(max_entries),
            ),
        }
    }
}

/// Decides whether one more request from `ip` fits the budget.
pub trait RateLimiter: Send + Sync {
    /// Record a request and return whether it is allowed.
    fn check(&self, ip: IpAddr) -> bool;

    /// Drop stale entries now.
    fn sweep(&self);

    /// Tracked client addresses.
    fn tracked(&self) -> usize;

    fn window(&self) -> Duration;
}

const DEFAULT_MAX_ENTRIES: usize = 100_000;
const SWEEP_EVERY: u64 = 1024;

const COUNT_BITS: u32 = 24;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

#[inline]
fn pack(start_ms: u64, count: u64) -> u64 {
    (start_ms << COUNT_BITS) | (count & COUNT_MASK)
}

#[inline]
fn unpack(state: u64) -> (u64, u64) {
    (state >> COUNT_BITS, state & COUNT_MASK)
}

struct FixedEntry {
    /// Window start (ms since limiter creation, upper 40 bits) and count
    /// (lower 24 bits), updated with compare-and-swap.
    state: AtomicU64,
    last_seen: AtomicU64,
}

/// Fixed-window counter per IP.
///
/// The window starts with the first request after the previous one expired.
/// The request that pushes the count past `limit` is the one rejected. As
/// with any fixed window, up to twice the limit can pass around a window
/// edge.
pub struct FixedWindowLimiter {
    limit: u64,
    window_ms: u64,
    origin_ms: u64,
    clock: Arc<dyn Clock>,
    entries: DashMap<IpAddr, FixedEntry>,
    max_entries: usize,
    checks: AtomicU64,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let origin_ms = clock.now_ms();
        Self {
            limit: u64::from(limit),
            window_ms: window.as_millis().max(1) as u64,
            origin_ms,
            clock,
            entries: DashMap::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            checks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.origin_ms)
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, ip: IpAddr) -> bool {
        let now = self.elapsed_ms();
        let allowed = {
            let entry = match self.entries.get(&ip) {
                Some(entry) => entry,
                None => self
                    .entries
                    .entry(ip)
                    .or_insert_with(|| FixedEntry {
                        state: AtomicU64::new(pack(now, 0)),
                        last_seen: AtomicU64::new(now),
                    })
                    .downgrade(),
            };
            entry.last_seen.store(now, Ordering::Relaxed);
            loop {
                let current = entry.state.load(Ordering::Acquire);
                let (start, count) = unpack(current);
                let (next, allowed) = if now.saturating_sub(start) >= self.window_ms {
                    (pack(now, 1), self.limit >= 1)
                } else {
                    let count = (count + 1).min(COUNT_MASK);
                    (pack(start, count), count <= self.limit)
                };
                if entry
                    .state
                    .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break allowed;
                }
            }
        };
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1
            || self.entries.len() > self.max_entries
        {
            self.sweep();
        }
        allowed
    }

    fn sweep(&self) {
        let now = self.elapsed_ms();
        let ttl = self.window_ms;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_sub(e.last_seen.load(Ordering::Relaxed)) < ttl);
        let by_age: Vec<(IpAddr, u64)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.last_seen.load(Ordering::Relaxed)))
            .collect();
        evict_oldest(&self.entries, by_age, self.max_entries);
        debug!(
            before,
            after = self.entries.len(),
            "Fixed window limiter swept"
        );
    }

    fn tracked(&self) -> usize {
        self.entries.len()
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

struct SlidingEntry {
    stamps: VecDeque<u64>,
    last_seen: u64,
}

/// Sliding-window log per IP: timestamps of recent requests.
///
/// Each request is recorded, timestamps older than the window are evicted,
/// and the request is allowed when at most `limit` remain.
pub struct SlidingWindowLimiter {
    limit: usize,
    window_ms: u64,
    clock: Arc<dyn Clock>,
    entries: DashMap<IpAddr, SlidingEntry>,
    max_entries: usize,
    checks: AtomicU64,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit: limit as usize,
            window_ms: window.as_millis().max(1) as u64,
            clock,
            entries: DashMap::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            checks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, ip: IpAddr) -> bool {
        let now = self.clock.now_ms();
        let allowed = {
            let mut entry = self.entries.entry(ip).or_insert_with(|| SlidingEntry {
                stamps: VecDeque::with_capacity(self.limit.min(64) + 1),
                last_seen: now,
            });
            entry.last_seen = now;
            entry.stamps.push_back(now);
            if let Some(cutoff) = now.checked_sub(self.window_ms) {
                while entry.stamps.front().is_some_and(|&t| t < cutoff) {
                    entry.stamps.pop_front();
                }
            }
            let allowed = entry.stamps.len() <= self.limit;
            // Anything beyond limit + 1 cannot change the outcome.
            while entry.stamps.len() > self.limit + 1 {
                entry.stamps.pop_front();
            }
            allowed
        };
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1
            || self.entries.len() > self.max_entries
        {
            self.sweep();
        }
        allowed
    }

    fn sweep(&self) {
        let now = self.clock.now_ms();
        self.entries
            .retain(|_, e| now.saturating_sub(e.last_seen) < self.window_ms);
        let by_age: Vec<(IpAddr, u64)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.last_seen))
            .collect();
        evict_oldest(&self.entries, by_age, self.max_entries);
    }

    fn tracked(&self) -> usize {
        self.entries.len()
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn evict_oldest<V>(entries: &DashMap<IpAddr, V>, mut by_age: Vec<(IpAddr, u64)>, max: usize) {
    if by_age.len() <= max {
        return;
    }
    let excess = by_age.len() - max;
    by_age.sort_unstable_by_key(|&(_, seen)| seen);
    for (ip, _) in by_age.into_iter().take(excess) {
        entries.remove(&ip);
    }
}
