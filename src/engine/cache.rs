//! # Match Cache Module
//!
//! A size- and time-bounded LRU cache for expensive match computations.
//! Capacity is expressed in estimated bytes rather than entry count, and an
//! entry older than the TTL is treated as absent on next access. A single
//! mutex covers both the recency order and the size accounting so concurrent
//! matcher workers cannot corrupt either.

use crate::engine::matcher::MatchResult;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default capacity: 2 GiB of estimated entry sizes.
pub const DEFAULT_MAX_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Default time-to-live: two hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7200);

/// Recursive size estimation for cached values, in bytes.
///
/// Strings and byte buffers report their length, scalar numerics a fixed 8
/// bytes, composite values the sum of their elements, and anything opaque a
/// conservative 64 bytes.
pub trait CacheCost {
    fn cost(&self) -> usize;
}

/// Conservative estimate for opaque values.
pub const OPAQUE_COST: usize = 64;

macro_rules! scalar_cost {
    ($($t:ty),*) => {
        $(impl CacheCost for $t {
            fn cost(&self) -> usize {
                8
            }
        })*
    };
}

scalar_cost!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool);

impl CacheCost for String {
    fn cost(&self) -> usize {
        self.len()
    }
}

impl CacheCost for &str {
    fn cost(&self) -> usize {
        self.len()
    }
}

impl<T: CacheCost> CacheCost for Vec<T> {
    fn cost(&self) -> usize {
        self.iter().map(CacheCost::cost).sum()
    }
}

impl<T: CacheCost> CacheCost for Option<T> {
    fn cost(&self) -> usize {
        self.as_ref().map(CacheCost::cost).unwrap_or(0)
    }
}

impl<A: CacheCost, B: CacheCost> CacheCost for (A, B) {
    fn cost(&self) -> usize {
        self.0.cost() + self.1.cost()
    }
}

struct Entry<V> {
    value: V,
    timestamp: Instant,
    size: usize,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Recency order, least-recently-used at the front.
    order: VecDeque<K>,
    current_size: usize,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.current_size -= entry.size;
        Some(entry)
    }
}

/// Size/TTL-bounded LRU cache.
///
/// Best effort by contract: no operation here is ever a source of failures.
pub struct LruTtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_size: usize,
    ttl: Duration,
}

/// Cache from a (screen, template) fingerprint to a previously computed match.
pub type MatchCache = LruTtlCache<String, MatchResult>;

impl<K: Eq + Hash + Clone, V: Clone + CacheCost> LruTtlCache<K, V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                current_size: 0,
            }),
            max_size,
            ttl,
        }
    }

    /// Look up a value, promoting it to most-recently-used on a hit.
    ///
    /// An entry older than the TTL is dropped, its size released, and treated
    /// as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.timestamp.elapsed() > self.ttl,
        };

        if expired {
            inner.remove(key);
            return None;
        }

        inner.touch(key);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert a value as most-recently-used, evicting LRU entries until the
    /// size budget is respected.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        // Re-insertion must not double count the old entry's size.
        inner.remove(&key);

        let size = value.cost();
        while inner.current_size + size > self.max_size && !inner.entries.is_empty() {
            if let Some(lru) = inner.order.front().cloned() {
                inner.remove(&lru);
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                timestamp: Instant::now(),
                size,
            },
        );
        inner.current_size += size;
    }

    /// TTL-aware membership check; does not promote the entry. An expired
    /// entry is dropped and its size released, exactly as on `get`.
    pub fn contains(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let expired = match inner.entries.get(key) {
            None => return false,
            Some(entry) => entry.timestamp.elapsed() > self.ttl,
        };

        if expired {
            inner.remove(key);
            return false;
        }
        true
    }

    /// Drop everything and reset the size accounting.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
        inner.current_size = 0;
    }

    /// Sum of size estimates over all live entries.
    pub fn current_size(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").current_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_size_estimation_rule() {
        assert_eq!("abcdef".to_string().cost(), 6);
        assert_eq!(42u32.cost(), 8);
        assert_eq!(1.5f64.cost(), 8);
        // Composite values sum their elements.
        assert_eq!(vec![1u64, 2, 3].cost(), 24);
        assert_eq!(vec!["ab".to_string(), "cde".to_string()].cost(), 5);
        assert_eq!((7u32, "xy").cost(), 10);
        assert_eq!(Option::<u64>::None.cost(), 0);
    }

    #[test]
    fn test_eviction_is_strictly_lru() {
        // Three 8-byte entries fit; the fourth evicts the oldest.
        let cache: LruTtlCache<&str, u64> = LruTtlCache::new(24, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.current_size(), 24);

        cache.put("d", 4);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert!(cache.contains(&"d"));
        assert_eq!(cache.current_size(), 24);
    }

    #[test]
    fn test_get_promotes_and_protects_from_eviction() {
        let cache: LruTtlCache<&str, u64> = LruTtlCache::new(24, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);

        // Touching "a" makes "b" the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("d", 4);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
    }

    #[test]
    fn test_reinsertion_does_not_double_count() {
        let cache: LruTtlCache<&str, String> = LruTtlCache::new(1024, Duration::from_secs(60));
        cache.put("k", "aaaa".to_string());
        assert_eq!(cache.current_size(), 4);
        cache.put("k", "aaaaaaaa".to_string());
        assert_eq!(cache.current_size(), 8);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry_releases_exact_size() {
        let cache: LruTtlCache<&str, String> = LruTtlCache::new(1024, Duration::from_millis(40));
        cache.put("stale", "0123456789".to_string());
        cache.put("unrelated", "xy".to_string());
        assert_eq!(cache.current_size(), 12);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"stale"), None);
        // Only the expired entry's estimate is released.
        assert_eq!(cache.current_size(), 2);
    }

    #[test]
    fn test_contains_releases_expired_entry_size() {
        let cache: LruTtlCache<&str, String> = LruTtlCache::new(1024, Duration::from_millis(40));
        cache.put("stale", "0123456789".to_string());
        assert_eq!(cache.current_size(), 10);

        thread::sleep(Duration::from_millis(60));
        // Membership checks observe expiry the same way get does: the entry
        // is dropped and its estimate comes off the running total.
        assert!(!cache.contains(&"stale"));
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear_resets_accounting() {
        let cache: LruTtlCache<&str, u64> = LruTtlCache::new(1024, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_oversized_entry_still_inserts_after_draining() {
        // An entry larger than the whole budget evicts everything else but is
        // still stored; the cache never refuses a put.
        let cache: LruTtlCache<&str, String> = LruTtlCache::new(8, Duration::from_secs(60));
        cache.put("small", "abcd".to_string());
        cache.put("big", "0123456789abcdef".to_string());
        assert!(!cache.contains(&"small"));
        assert!(cache.contains(&"big"));
        assert_eq!(cache.len(), 1);
    }
}
