//! L1 in-memory cache. Ephemeral, per-process, never authoritative — a
//! miss always falls through to the remote provider, and every local
//! mutation invalidates the entry instead of trying to keep it coherent.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: Option<String>,
    inserted_at: Instant,
}

/// Bounded-TTL cache keyed by KV key, storing the last known raw value
/// (`None` represents a cached "key does not exist").
pub struct L1Cache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl L1Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns `Some(cached_value)` if present and not expired.
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: &str, value: Option<String>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove a key, used whenever a local mutation (set/delete) happens
    /// so a stale value is never served instead of being re-fetched.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn get_then_put_round_trips() {
        let cache = L1Cache::new(Duration::from_secs(10));
        assert!(cache.get("k").is_none());
        cache.put("k", Some("v".to_string()));
        assert_eq!(cache.get("k"), Some(Some("v".to_string())));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = L1Cache::new(Duration::from_millis(20));
        cache.put("k", Some("v".to_string()));
        sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = L1Cache::new(Duration::from_secs(10));
        cache.put("k", Some("v".to_string()));
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn caches_absence() {
        let cache = L1Cache::new(Duration::from_secs(10));
        cache.put("k", None);
        assert_eq!(cache.get("k"), Some(None));
    }
}
