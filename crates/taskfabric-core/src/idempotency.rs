use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

/// Bounded LRU map with per-entry TTL, used to make redelivered messages
/// idempotent.
///
/// Two independently configured instances exist in the system: one inside
/// each agent (dedupes inbound work requests by `request_id`) and one inside
/// the orchestrator (dedupes inbound work results by the same key). Both
/// share these eviction semantics:
///
/// - `get` on an entry older than the TTL evicts it and reports a miss;
///   a hit marks the entry most-recently-used.
/// - `set` at capacity evicts the least-recently-used entry first.
pub struct IdempotencyCache<V> {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<CacheState<V>>,
}

struct CacheState<V> {
    entries: HashMap<Uuid, CacheEntry<V>>,
    clock: u64,
}

impl<V: Clone> IdempotencyCache<V> {
    /// Creates a cache holding at most `max_size` entries for up to `ttl`.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl,
            inner: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Looks up `key`, evicting it first if its TTL has elapsed.
    pub fn get(&self, key: Uuid) -> Option<V> {
        let mut state = self.inner.lock();
        let expired = match state.entries.get(&key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            state.entries.remove(&key);
            return None;
        }
        state.clock += 1;
        let clock = state.clock;
        state.entries.get_mut(&key).map(|entry| {
            entry.last_used = clock;
            entry.value.clone()
        })
    }

    /// Inserts or overwrites `key`, evicting the least-recently-used entry
    /// first when at capacity.
    pub fn set(&self, key: Uuid, value: V) {
        let mut state = self.inner.lock();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            if let Some(lru) = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k)
            {
                state.entries.remove(&lru);
            }
        }
        state.clock += 1;
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            last_used: state.clock,
        };
        state.entries.insert(key, entry);
    }

    /// Number of live entries (including any not yet lazily expired).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get_within_ttl() {
        let cache = IdempotencyCache::new(10, Duration::from_secs(300));
        let key = Uuid::new_v4();
        cache.set(key, "result".to_string());
        assert_eq!(cache.get(key), Some("result".to_string()));
    }

    #[test]
    fn test_miss_on_absent_key() {
        let cache: IdempotencyCache<String> = IdempotencyCache::new(10, Duration::from_secs(300));
        assert_eq!(cache.get(Uuid::new_v4()), None);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = IdempotencyCache::new(10, Duration::from_millis(1));
        let key = Uuid::new_v4();
        cache.set(key, 42u32);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = IdempotencyCache::new(3, Duration::from_secs(300));
        let keys: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

        cache.set(keys[0], 0u32);
        cache.set(keys[1], 1);
        cache.set(keys[2], 2);
        // Touch the oldest so it becomes most-recently-used.
        assert_eq!(cache.get(keys[0]), Some(0));

        cache.set(keys[3], 3);
        assert_eq!(cache.len(), 3);
        // keys[1] was least-recently-used and must be gone.
        assert_eq!(cache.get(keys[1]), None);
        assert_eq!(cache.get(keys[0]), Some(0));
        assert_eq!(cache.get(keys[3]), Some(3));
    }

    #[test]
    fn test_untouched_oldest_evicted_after_overflow() {
        let cache = IdempotencyCache::new(3, Duration::from_secs(300));
        let keys: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, key) in keys.iter().enumerate() {
            cache.set(*key, i as u32);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(keys[0]), None);
        assert_eq!(cache.get(keys[3]), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = IdempotencyCache::new(2, Duration::from_secs(300));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.set(a, 1u32);
        cache.set(b, 2);
        cache.set(a, 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(a), Some(10));
        assert_eq!(cache.get(b), Some(2));
    }
}
