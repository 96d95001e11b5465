// In-memory answer cache and request throttle
// Both are process-local and non-durable: losing them costs latency, never
// correctness. Expiry is lazy, checked against the deadline at read time.


use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL-bounded key/value cache behind a mutex.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    #[inline]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    #[inline]
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    fn set_at(&self, key: &str, value: V, ttl: Duration, now: Instant) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop everything, expired or not. Used when the underlying data
    /// changes out from under cached answers (index reset).
    #[inline]
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.clear();
    }

    /// Drop every expired entry. Lazy read-time expiry keeps the cache
    /// correct on its own; this is for long-lived processes that want the
    /// memory back.
    #[inline]
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }
}

impl<V: Clone> Default for TtlCache<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed-window request throttle, one counter per identity.
///
/// Fixed windows (rather than sliding) keep the state O(1) per identity.
/// A burst straddling two windows can briefly see up to 2x the limit; that
/// is an accepted trade-off here.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    #[inline]
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `identity` and report whether it exceeded the
    /// quota. The first request after a window lapses resets the count to 1.
    #[inline]
    pub fn is_limited(&self, identity: &str, limit: u32, window: Duration) -> bool {
        self.is_limited_at(identity, limit, window, Instant::now())
    }

    fn is_limited_at(
        &self,
        identity: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");

        match windows.get_mut(identity) {
            None => {
                windows.insert(
                    identity.to_string(),
                    Window {
                        count: 1,
                        resets_at: now + window,
                    },
                );
                false
            }
            Some(entry) if now >= entry.resets_at => {
                entry.count = 1;
                entry.resets_at = now + window;
                false
            }
            Some(entry) if entry.count >= limit => {
                debug!("Identity '{}' is over its rate limit", identity);
                true
            }
            Some(entry) => {
                entry.count += 1;
                false
            }
        }
    }

    /// Forget the current window for an identity.
    #[inline]
    pub fn reset(&self, identity: &str) {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        windows.remove(identity);
    }
}

impl Default for RateLimiter {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
