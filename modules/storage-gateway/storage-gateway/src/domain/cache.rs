//! Short-TTL result cache keyed by case-folded normalized path.

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) < self.ttl
    }
}

/// Token taken before fetching a value; a fill is dropped if the cache was
/// invalidated since the token was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(u64);

/// TTL cache with write-driven invalidation.
///
/// A fetch that raced with an invalidation never lands: [`ResultCache::set`]
/// compares the [`FillToken`] against the invalidation epoch under the same
/// lock invalidations take. Expired entries are swept by `set` at most once
/// per TTL, so keys that are never read again do not pile up.
pub struct ResultCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    epoch: RwLock<u64>,
    last_sweep: Mutex<Instant>,
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> ResultCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            epoch: RwLock::new(0),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Fresh value for `key`; expired entries are evicted on the way.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let lookup = self
            .entries
            .get(key)
            .map(|e| e.is_fresh(now).then(|| e.value.clone()));
        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, e| !e.is_fresh(now));
                None
            }
            None => None,
        }
    }

    #[must_use]
    pub fn fill_token(&self) -> FillToken {
        FillToken(*self.epoch.read())
    }

    /// Store `value` unless an invalidation happened after `token` was taken.
    /// Returns whether the value was stored.
    pub fn set(&self, key: &str, value: V, ttl: Duration, token: FillToken) -> bool {
        let epoch = self.epoch.read();
        if *epoch != token.0 || ttl.is_zero() {
            return false;
        }
        let now = Instant::now();
        self.sweep_expired(now, ttl);
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                cached_at: now,
                ttl,
            },
        );
        true
    }

    fn sweep_expired(&self, now: Instant, interval: Duration) {
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < interval {
                return;
            }
            *last = now;
        }
        self.entries.retain(|_, e| e.is_fresh(now));
    }

    pub fn invalidate(&self, key: &str) {
        let mut epoch = self.epoch.write();
        *epoch = epoch.wrapping_add(1);
        self.entries.remove(key);
    }

    /// Drop `prefix` and every key below it.
    pub fn invalidate_subtree(&self, prefix: &str) {
        let mut epoch = self.epoch.write();
        *epoch = epoch.wrapping_add(1);
        self.entries.retain(|key, _| !is_within(key, prefix));
    }

    pub fn clear(&self) {
        let mut epoch = self.epoch.write();
        *epoch = epoch.wrapping_add(1);
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
}

/// `key` equals `prefix` or lies below it.
pub(crate) fn is_within(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
