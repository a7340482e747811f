use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::middleware::{Clock, SystemClock};

/// One cached file or rendered directory listing.
///
/// Entries are immutable; a refresh swaps in a new `Arc`, so readers never
/// observe a half-written entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub last_modified: SystemTime,
    expires_at_ms: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// In-memory file cache keyed by absolute filesystem path.
///
/// Directory listings are stored under the directory's own path, so
/// invalidating a file also drops its parent's listing.
pub struct StaticFileCache {
    entries: DashMap<PathBuf, Arc<CacheEntry>>,
    ttl_ms: u64,
    max_entry_size: usize,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for StaticFileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFileCache")
            .field("entries", &self.entries.len())
            .field("ttl_ms", &self.ttl_ms)
            .field("max_entry_size", &self.max_entry_size)
            .finish()
    }
}

impl StaticFileCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms: ttl.as_millis() as u64,
            max_entry_size: 1024 * 1024,
            max_entries: 10_000,
            clock: Arc::new(SystemClock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Files larger than this are streamed from disk and never cached.
    #[must_use]
    pub fn max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    #[must_use]
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn accepts(&self, len: u64) -> bool {
        len <= self.max_entry_size as u64
    }

    /// Live entry for `path`; expired entries are removed on the way.
    pub fn get(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now_ms();
        let found = self.entries.get(path).map(|e| Arc::clone(e.value()));
        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), "Static cache hit");
                Some(entry)
            }
            Some(_) => {
                self.entries
                    .remove_if(path, |_, e| e.is_expired(self.clock.now_ms()));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a fresh entry. Returns it, or `None` when it is too large.
    pub fn insert(
        &self,
        path: PathBuf,
        bytes: Bytes,
        content_type: &'static str,
        last_modified: SystemTime,
    ) -> Option<Arc<CacheEntry>> {
        if bytes.len() > self.max_entry_size {
            return None;
        }
        if self.entries.len() >= self.max_entries {
            self.sweep();
        }
        let entry = Arc::new(CacheEntry {
            bytes,
            content_type,
            last_modified,
            expires_at_ms: self.clock.now_ms().saturating_add(self.ttl_ms),
        });
        if self.entries.len() < self.max_entries || self.entries.contains_key(&path) {
            self.entries.insert(path, Arc::clone(&entry));
        }
        Some(entry)
    }

    /// Drop `path` and its parent directory's listing.
    pub fn invalidate(&self, path: &Path) {
        let removed = self.entries.remove(path).is_some();
        let parent = path
            .parent()
            .is_some_and(|p| self.entries.remove(p).is_some());
        if removed || parent {
            debug!(path = %path.display(), parent, "Static cache invalidated");
        }
    }

    /// Remove expired entries.
    pub fn sweep(&self) {
        let now = self.clock.now_ms();
        self.entries.retain(|_, e| !e.is_expired(now));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::ManualClock;

    fn cache(clock: &Arc<ManualClock>) -> StaticFileCache {
        StaticFileCache::new(Duration::from_secs(60)).with_clock(Arc::clone(clock) as Arc<dyn Clock>)
    }

    #[test]
    fn test_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let c = cache(&clock);
        let p = PathBuf::from("/srv/a.txt");
        c.insert(p.clone(), Bytes::from_static(b"a"), "text/plain", SystemTime::UNIX_EPOCH);
        assert!(c.get(&p).is_some());
        clock.advance(Duration::from_secs(60));
        assert!(c.get(&p).is_none());
        assert!(c.is_empty());
        assert_eq!(c.stats().hits, 1);
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn test_invalidate_drops_parent_listing() {
        let clock = Arc::new(ManualClock::new(0));
        let c = cache(&clock);
        let dir = PathBuf::from("/srv/docs");
        let file = dir.join("a.txt");
        let other = PathBuf::from("/srv/b.txt");
        for p in [&dir, &file, &other] {
            c.insert(p.clone(), Bytes::from_static(b"x"), "text/plain", SystemTime::UNIX_EPOCH);
        }
        c.invalidate(&file);
        assert!(c.get(&file).is_none());
        assert!(c.get(&dir).is_none());
        assert!(c.get(&other).is_some());
    }

    #[test]
    fn test_size_limits() {
        let clock = Arc::new(ManualClock::new(0));
        let c = cache(&clock).max_entry_size(4).max_entries(1);
        assert!(c
            .insert("/big".into(), Bytes::from_static(b"12345"), "text/plain", SystemTime::UNIX_EPOCH)
            .is_none());
        c.insert("/a".into(), Bytes::from_static(b"1"), "text/plain", SystemTime::UNIX_EPOCH);
        c.insert("/b".into(), Bytes::from_static(b"1"), "text/plain", SystemTime::UNIX_EPOCH);
        assert_eq!(c.len(), 1);
        clock.advance(Duration::from_secs(61));
        c.sweep();
        assert!(c.is_empty());
    }
}
